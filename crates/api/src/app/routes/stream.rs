//! Streaming subscription endpoint (Server-Sent Events) and client inspection.
//!
//! Each `GET /stream/events` becomes one registered client. Frames flow
//! notifier writer -> bounded channel -> SSE response body. The connection is
//! unregistered when the response body is dropped (peer hung up) or when the
//! notifier evicts it, whichever happens first.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    Json,
    extract::{Extension, Path},
    http::{StatusCode, header},
    response::{
        IntoResponse,
        sse::{Event as SseEvent, Sse},
    },
};
use tokio_stream::{Stream, wrappers::ReceiverStream};

use stockwire_core::ClientId;
use stockwire_events::{ChannelSink, EventFrame, Notifier};

use crate::app::errors;

/// Frames buffered between the client's writer and the HTTP body.
const STREAM_BUFFER: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /stream/events
///
/// Opens a long-lived SSE stream. The first frame is `connected` with the
/// assigned `client_id`; `heartbeat` and `update` frames follow.
pub async fn stream_events(Extension(notifier): Extension<Notifier>) -> axum::response::Response {
    let (sink, rx) = ChannelSink::channel(STREAM_BUFFER);
    let client_id = notifier.subscribe(Arc::new(sink));

    let stream = FrameStream {
        frames: ReceiverStream::new(rx),
        _subscription: Subscription {
            notifier,
            client_id,
        },
    };

    ([(header::CACHE_CONTROL, "no-cache")], Sse::new(stream)).into_response()
}

/// GET /stream/clients
pub async fn list_clients(Extension(notifier): Extension<Notifier>) -> axum::response::Response {
    let clients = notifier.clients();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "count": clients.len(),
            "clients": clients,
        })),
    )
        .into_response()
}

/// GET /stream/clients/:id
pub async fn get_client(
    Extension(notifier): Extension<Notifier>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let client_id = match id.parse::<ClientId>() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid client id"),
    };

    match notifier.client(client_id) {
        Some(summary) => (StatusCode::OK, Json(summary)).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "client not connected"),
    }
}

/// DELETE /stream/clients/:id
///
/// Closes a subscriber's stream. Idempotent: an unknown id reports
/// `"removed": false` rather than an error.
pub async fn disconnect_client(
    Extension(notifier): Extension<Notifier>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let client_id = match id.parse::<ClientId>() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid client id"),
    };

    let removed = notifier.unsubscribe(client_id);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "client_id": client_id.to_string(),
            "removed": removed,
        })),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream plumbing
// ─────────────────────────────────────────────────────────────────────────────

/// Unregisters its client when the response body goes away.
struct Subscription {
    notifier: Notifier,
    client_id: ClientId,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.notifier.unsubscribe(self.client_id) {
            tracing::debug!(client_id = %self.client_id, "stream closed by peer");
        }
    }
}

struct FrameStream {
    frames: ReceiverStream<EventFrame>,
    _subscription: Subscription,
}

impl Stream for FrameStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames)
            .poll_next(cx)
            .map(|next| next.map(|frame| Ok(to_sse_event(&frame))))
    }
}

fn to_sse_event(frame: &EventFrame) -> SseEvent {
    SseEvent::default()
        .event(frame.event_type().as_str())
        .data(frame.data())
}
