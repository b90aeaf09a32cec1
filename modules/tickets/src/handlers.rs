//! Business handlers for ticket booking events.

use crate::clients::{ReceiptsService, SpreadsheetsService};
use crate::entities::{IssueReceiptRequest, TicketBookingCanceled, TicketBookingConfirmed};
use anyhow::Context;
use event_bus::MessageContext;
use event_consumer::{EventHandler, MessageGuard};
use std::sync::Arc;
use tracing::info;

pub const ISSUE_RECEIPT_HANDLER: &str = "issue-receipt-handler";
pub const APPEND_TO_TRACKER_HANDLER: &str = "append-to-tracker-handler";
pub const CANCEL_TICKET_HANDLER: &str = "cancel-ticket-handler";

pub const TICKETS_TO_PRINT_SHEET: &str = "tickets-to-print";
pub const TICKETS_TO_REFUND_SHEET: &str = "tickets-to-refund";

/// Message known to break every handler; acked without processing
pub const POISON_MESSAGE_ID: &str = "2beaf5bc-d5e4-4653-b075-2b36bbf28949";

pub fn message_guard() -> MessageGuard {
    MessageGuard::with_poison_ids([POISON_MESSAGE_ID])
}

#[derive(Clone)]
pub struct TicketHandlers {
    receipts: Arc<dyn ReceiptsService>,
    spreadsheets: Arc<dyn SpreadsheetsService>,
}

impl TicketHandlers {
    pub fn new(
        receipts: Arc<dyn ReceiptsService>,
        spreadsheets: Arc<dyn SpreadsheetsService>,
    ) -> Self {
        Self {
            receipts,
            spreadsheets,
        }
    }

    pub async fn issue_receipt(
        &self,
        ctx: &MessageContext,
        event: TicketBookingConfirmed,
    ) -> anyhow::Result<()> {
        let request = IssueReceiptRequest {
            ticket_id: event.ticket_id,
            price: event.price,
        };
        let response = self
            .receipts
            .issue_receipt(ctx, request)
            .await
            .context("failed to issue receipt")?;

        info!(
            receipt_number = %response.receipt_number,
            issued_at = %response.issued_at,
            "Receipt issued"
        );
        Ok(())
    }

    pub async fn append_to_tracker(
        &self,
        ctx: &MessageContext,
        event: TicketBookingConfirmed,
    ) -> anyhow::Result<()> {
        let row = vec![
            event.ticket_id,
            event.customer_email,
            event.price.amount,
            event.price.currency,
        ];
        self.spreadsheets
            .append_row(ctx, TICKETS_TO_PRINT_SHEET, row)
            .await
            .context("failed to append ticket to tracker")
    }

    pub async fn cancel_ticket(
        &self,
        ctx: &MessageContext,
        event: TicketBookingCanceled,
    ) -> anyhow::Result<()> {
        let row = vec![
            event.ticket_id,
            event.customer_email,
            event.price.amount,
            event.price.currency,
        ];
        self.spreadsheets
            .append_row(ctx, TICKETS_TO_REFUND_SHEET, row)
            .await
            .context("failed to append ticket to refund sheet")
    }

    /// Event handler bindings registered at startup
    pub fn event_handlers(&self) -> Vec<EventHandler> {
        let issue = self.clone();
        let track = self.clone();
        let cancel = self.clone();

        vec![
            EventHandler::consumer(
                ISSUE_RECEIPT_HANDLER,
                move |ctx: MessageContext, event: TicketBookingConfirmed| {
                    let handlers = issue.clone();
                    async move { handlers.issue_receipt(&ctx, event).await }
                },
            ),
            EventHandler::consumer(
                APPEND_TO_TRACKER_HANDLER,
                move |ctx: MessageContext, event: TicketBookingConfirmed| {
                    let handlers = track.clone();
                    async move { handlers.append_to_tracker(&ctx, event).await }
                },
            ),
            EventHandler::consumer(
                CANCEL_TICKET_HANDLER,
                move |ctx: MessageContext, event: TicketBookingCanceled| {
                    let handlers = cancel.clone();
                    async move { handlers.cancel_ticket(&ctx, event).await }
                },
            ),
        ]
    }
}
