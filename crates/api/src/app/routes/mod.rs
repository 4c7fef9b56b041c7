use axum::{Router, routing::get};

pub mod stream;
pub mod system;

/// Router for the notification endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/stream", get(stream::stream_events))
        .route("/stream/events", get(stream::stream_events))
        .route("/stream/clients", get(stream::list_clients))
        .route(
            "/stream/clients/:id",
            get(stream::get_client).delete(stream::disconnect_client),
        )
}
