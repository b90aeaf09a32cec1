use super::{ensure_success, gateway_base_url, with_correlation, ClientError, SpreadsheetsService};
use async_trait::async_trait;
use event_bus::MessageContext;
use serde::Serialize;

#[derive(Serialize)]
struct AppendRowBody {
    columns: Vec<String>,
}

/// Spreadsheets API client going through the gateway
#[derive(Debug, Clone)]
pub struct SpreadsheetsClient {
    http: reqwest::Client,
    base_url: String,
}

impl SpreadsheetsClient {
    pub fn new(http: reqwest::Client, gateway_addr: &str) -> Self {
        Self {
            http,
            base_url: gateway_base_url(gateway_addr),
        }
    }
}

#[async_trait]
impl SpreadsheetsService for SpreadsheetsClient {
    async fn append_row(
        &self,
        ctx: &MessageContext,
        sheet: &str,
        row: Vec<String>,
    ) -> Result<(), ClientError> {
        let endpoint = format!("/spreadsheets-api/sheets/{}/rows", sheet);
        let url = format!("{}{}", self.base_url, endpoint);

        let response = with_correlation(
            self.http.post(&url).json(&AppendRowBody { columns: row }),
            ctx,
        )
        .send()
        .await
        .map_err(|source| ClientError::Request {
            endpoint: endpoint.clone(),
            source,
        })?;
        ensure_success(&endpoint, response).await?;

        Ok(())
    }
}
