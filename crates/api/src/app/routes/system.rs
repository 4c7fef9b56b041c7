use axum::http::StatusCode;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn version() -> &'static str {
    concat!("stockwire ", env!("CARGO_PKG_VERSION"))
}
