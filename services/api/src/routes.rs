use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

pub(crate) fn router() -> Router {
    Router::new().route("/HealthCheck", get(healthcheck))
}

/// Liveness only; says nothing about the engine's collaborators.
pub(crate) async fn healthcheck() -> StatusCode {
    StatusCode::OK
}
