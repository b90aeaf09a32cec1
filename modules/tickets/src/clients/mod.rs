//! Side-effect clients used by the ticket handlers.
//!
//! Handlers depend on the [`ReceiptsService`] and [`SpreadsheetsService`]
//! capabilities only. The HTTP implementations talk to the gateway; the
//! mocks record calls for component tests.

pub mod mock;
mod receipts;
mod spreadsheets;

pub use receipts::ReceiptsClient;
pub use spreadsheets::SpreadsheetsClient;

use crate::entities::{IssueReceiptRequest, IssueReceiptResponse};
use async_trait::async_trait;
use event_bus::MessageContext;

/// Header carrying the correlation id on outgoing gateway requests
pub const CORRELATION_ID_HEADER: &str = "Correlation-ID";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status code {status} from {endpoint}: {body}")]
    UnexpectedStatus {
        endpoint: String,
        status: u16,
        body: String,
    },
}

#[async_trait]
pub trait ReceiptsService: Send + Sync {
    async fn issue_receipt(
        &self,
        ctx: &MessageContext,
        request: IssueReceiptRequest,
    ) -> Result<IssueReceiptResponse, ClientError>;
}

#[async_trait]
pub trait SpreadsheetsService: Send + Sync {
    async fn append_row(
        &self,
        ctx: &MessageContext,
        sheet: &str,
        row: Vec<String>,
    ) -> Result<(), ClientError>;
}

/// Base URL for the gateway; a bare `host:port` is treated as plain HTTP
pub(crate) fn gateway_base_url(gateway_addr: &str) -> String {
    let trimmed = gateway_addr.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Attach the context correlation id, if any, to a gateway request
pub(crate) fn with_correlation(
    builder: reqwest::RequestBuilder,
    ctx: &MessageContext,
) -> reqwest::RequestBuilder {
    match ctx.correlation_id() {
        Some(id) => builder.header(CORRELATION_ID_HEADER, id),
        None => builder,
    }
}

/// Turn a non-2xx response into [`ClientError::UnexpectedStatus`]
pub(crate) async fn ensure_success(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::UnexpectedStatus {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}
