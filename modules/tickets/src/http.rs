//! HTTP ingress
//!
//! - `GET /health`: liveness, answers `ok`
//! - `POST /tickets-status`: turns a batch of ticket statuses into booking
//!   events. The whole batch is validated before anything is published, so an
//!   unknown status rejects the request with nothing emitted.

use crate::clients::CORRELATION_ID_HEADER;
use crate::entities::{
    TicketBookingCanceled, TicketBookingConfirmed, TicketStatus, TicketsStatusRequest,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json,
};
use event_bus::MessageContext;
use event_consumer::{middleware::new_correlation_id, EventPublisher, PublishError};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub events: EventPublisher,
}

pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", get(health))
        .route("/tickets-status", post(post_tickets_status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Error response wrapper
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unknown ticket status '{status}' for ticket {ticket_id}")]
    UnknownStatus { ticket_id: String, status: String },

    #[error("failed to publish ticket event: {0}")]
    Publish(#[from] PublishError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::UnknownStatus { .. } => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Publish(e) => {
                error!(error = %e, "Failed to publish ticket event");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to publish ticket event".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

enum TicketEvent {
    Confirmed(TicketBookingConfirmed),
    Canceled(TicketBookingCanceled),
}

impl TryFrom<TicketStatus> for TicketEvent {
    type Error = ApiError;

    fn try_from(ticket: TicketStatus) -> Result<Self, Self::Error> {
        match ticket.status.as_str() {
            "confirmed" => Ok(TicketEvent::Confirmed(TicketBookingConfirmed::new(
                ticket.ticket_id,
                ticket.customer_email,
                ticket.price,
            ))),
            "canceled" => Ok(TicketEvent::Canceled(TicketBookingCanceled::new(
                ticket.ticket_id,
                ticket.customer_email,
                ticket.price,
            ))),
            _ => Err(ApiError::UnknownStatus {
                ticket_id: ticket.ticket_id,
                status: ticket.status,
            }),
        }
    }
}

async fn post_tickets_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TicketsStatusRequest>,
) -> Result<Response, ApiError> {
    let correlation_id = headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(new_correlation_id);
    let ctx = MessageContext::new().with_correlation_id(correlation_id.clone());

    let events = request
        .tickets
        .into_iter()
        .map(TicketEvent::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    for event in &events {
        match event {
            TicketEvent::Confirmed(event) => state.events.publish(&ctx, event).await?,
            TicketEvent::Canceled(event) => state.events.publish(&ctx, event).await?,
        }
    }

    info!(
        correlation_id = %correlation_id,
        tickets = events.len(),
        "Ticket statuses published"
    );

    Ok((StatusCode::OK, [(CORRELATION_ID_HEADER, correlation_id)]).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use event_bus::{InMemoryBus, CORRELATION_ID_METADATA_KEY, TYPE_METADATA_KEY};
    use event_consumer::CorrelationPublisher;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(bus: &InMemoryBus) -> axum::Router {
        router(AppState {
            events: EventPublisher::new(Arc::new(CorrelationPublisher::new(bus.clone()))),
        })
    }

    fn ticket(id: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "ticket_id": id,
            "status": status,
            "customer_email": "a@b.com",
            "price": {"amount": "50", "currency": "USD"}
        })
    }

    fn tickets_request(
        tickets: Vec<serde_json::Value>,
        correlation_id: Option<&str>,
    ) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/tickets-status")
            .header("content-type", "application/json");
        if let Some(id) = correlation_id {
            builder = builder.header(CORRELATION_ID_HEADER, id);
        }
        builder
            .body(Body::from(
                serde_json::to_vec(&serde_json::json!({ "tickets": tickets })).unwrap(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let bus = InMemoryBus::new();
        let response = app(&bus)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_statuses_published_as_events() {
        let bus = InMemoryBus::new();
        let response = app(&bus)
            .oneshot(tickets_request(
                vec![ticket("T1", "confirmed"), ticket("T2", "canceled")],
                Some("corr-123"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CORRELATION_ID_HEADER], "corr-123");

        let confirmed = bus.published("TicketBookingConfirmed");
        assert_eq!(confirmed.len(), 1);
        assert_eq!(
            confirmed[0].metadata.get(TYPE_METADATA_KEY),
            "TicketBookingConfirmed"
        );
        assert_eq!(
            confirmed[0].metadata.get(CORRELATION_ID_METADATA_KEY),
            "corr-123"
        );
        let event: TicketBookingConfirmed = serde_json::from_slice(&confirmed[0].payload).unwrap();
        assert_eq!(event.ticket_id, "T1");

        let canceled = bus.published("TicketBookingCanceled");
        assert_eq!(canceled.len(), 1);
        let event: TicketBookingCanceled = serde_json::from_slice(&canceled[0].payload).unwrap();
        assert_eq!(event.ticket_id, "T2");
    }

    #[tokio::test]
    async fn test_correlation_id_generated_when_missing() {
        let bus = InMemoryBus::new();
        let response = app(&bus)
            .oneshot(tickets_request(vec![ticket("T1", "confirmed")], None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let echoed = response.headers()[CORRELATION_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();
        assert!(echoed.starts_with("gen_"));

        let published = bus.published("TicketBookingConfirmed");
        assert_eq!(published[0].metadata.get(CORRELATION_ID_METADATA_KEY), echoed);
    }

    #[tokio::test]
    async fn test_unknown_status_rejects_whole_batch() {
        let bus = InMemoryBus::new();
        let response = app(&bus)
            .oneshot(tickets_request(
                vec![ticket("T1", "confirmed"), ticket("T2", "unknown")],
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("unknown"));

        assert!(bus.published("TicketBookingConfirmed").is_empty());
        assert!(bus.published("TicketBookingCanceled").is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_rejected() {
        let bus = InMemoryBus::new();
        let response = app(&bus)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tickets-status")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }
}
