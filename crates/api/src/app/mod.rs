//! HTTP application wiring (Axum router + notifier handle).
//!
//! - `routes/`: HTTP routes + handlers
//! - `errors.rs`: consistent error responses

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use stockwire_events::Notifier;

pub mod errors;
pub mod routes;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
///
/// Mutation handlers living elsewhere publish through the same `notifier`.
pub fn build_app(notifier: Notifier) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/version", get(routes::system::version))
        .merge(routes::router())
        .layer(Extension(notifier))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
