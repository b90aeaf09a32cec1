//! In-memory clients recording every call, for component tests and local runs.

use super::{ClientError, ReceiptsService, SpreadsheetsService};
use crate::entities::{IssueReceiptRequest, IssueReceiptResponse};
use async_trait::async_trait;
use chrono::Utc;
use event_bus::MessageContext;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ReceiptsMock {
    issued: Mutex<Vec<IssueReceiptRequest>>,
}

impl ReceiptsMock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issued_receipts(&self) -> Vec<IssueReceiptRequest> {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ReceiptsService for ReceiptsMock {
    async fn issue_receipt(
        &self,
        _ctx: &MessageContext,
        request: IssueReceiptRequest,
    ) -> Result<IssueReceiptResponse, ClientError> {
        self.issued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        Ok(IssueReceiptResponse {
            receipt_number: Uuid::new_v4().to_string(),
            issued_at: Utc::now(),
        })
    }
}

#[derive(Debug, Default)]
pub struct SpreadsheetsMock {
    rows: Mutex<HashMap<String, Vec<Vec<String>>>>,
}

impl SpreadsheetsMock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows appended to `sheet`, in order
    pub fn rows(&self, sheet: &str) -> Vec<Vec<String>> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sheet)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SpreadsheetsService for SpreadsheetsMock {
    async fn append_row(
        &self,
        _ctx: &MessageContext,
        sheet: &str,
        row: Vec<String>,
    ) -> Result<(), ClientError> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(sheet.to_string())
            .or_default()
            .push(row);
        Ok(())
    }
}
