//! Request routing for the status API.

use super::state::AppState;
use super::{handlers, response};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use std::convert::Infallible;
use std::sync::Arc;

/// Route prefix for all API endpoints.
const API_PREFIX: &str = "/api/v1";

/// Route an incoming request to the appropriate handler.
pub async fn route(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    tracing::debug!(method = %method, path = %path, "Routing request");

    if method == Method::GET && path == "/health" {
        return Ok(handlers::health::get_health(&state));
    }

    let Some(path) = path.strip_prefix(API_PREFIX) else {
        return Ok(response::not_found("No such endpoint"));
    };

    let response = match (method, path) {
        (Method::GET, "/status") => handlers::status::get_fleet_status(&state),
        (Method::GET, p) if p.starts_with("/status/") => {
            handlers::status::get_identity_status(&state, p.trim_start_matches("/status/"))
        }
        (Method::POST, "/reconcile") => handlers::reconcile::trigger(&state),
        _ => response::not_found("No such endpoint"),
    };

    Ok(response)
}
