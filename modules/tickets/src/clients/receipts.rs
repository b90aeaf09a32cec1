use super::{ensure_success, gateway_base_url, with_correlation, ClientError, ReceiptsService};
use crate::entities::{IssueReceiptRequest, IssueReceiptResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::MessageContext;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const RECEIPTS_PATH: &str = "/receipts-api/receipts";

#[derive(Serialize)]
struct PutReceiptBody<'a> {
    ticket_id: &'a str,
    price: GatewayMoney<'a>,
}

/// Price as the receipts API names its fields
#[derive(Serialize)]
struct GatewayMoney<'a> {
    money_amount: &'a str,
    money_currency: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ReceiptBody {
    #[serde(default)]
    number: String,
    #[serde(default)]
    issued_at: Option<DateTime<Utc>>,
}

/// Receipts API client going through the gateway
#[derive(Debug, Clone)]
pub struct ReceiptsClient {
    http: reqwest::Client,
    base_url: String,
}

impl ReceiptsClient {
    pub fn new(http: reqwest::Client, gateway_addr: &str) -> Self {
        Self {
            http,
            base_url: gateway_base_url(gateway_addr),
        }
    }
}

#[async_trait]
impl ReceiptsService for ReceiptsClient {
    async fn issue_receipt(
        &self,
        ctx: &MessageContext,
        request: IssueReceiptRequest,
    ) -> Result<IssueReceiptResponse, ClientError> {
        let url = format!("{}{}", self.base_url, RECEIPTS_PATH);
        let body = PutReceiptBody {
            ticket_id: &request.ticket_id,
            price: GatewayMoney {
                money_amount: &request.price.amount,
                money_currency: &request.price.currency,
            },
        };

        let response = with_correlation(self.http.put(&url).json(&body), ctx)
            .send()
            .await
            .map_err(|source| ClientError::Request {
                endpoint: RECEIPTS_PATH.to_string(),
                source,
            })?;
        let response = ensure_success(RECEIPTS_PATH, response).await?;

        // Accepted means issued; an unreadable body must not fail the handler
        let receipt = match response.json::<ReceiptBody>().await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(
                    ticket_id = %request.ticket_id,
                    error = %e,
                    "Receipt issued but response body could not be decoded"
                );
                ReceiptBody::default()
            }
        };

        debug!(
            ticket_id = %request.ticket_id,
            receipt_number = %receipt.number,
            "Receipt issued"
        );

        Ok(IssueReceiptResponse {
            receipt_number: receipt.number,
            issued_at: receipt.issued_at.unwrap_or_else(Utc::now),
        })
    }
}
