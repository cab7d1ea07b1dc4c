//! Health endpoint.

use crate::api::response;
use crate::api::state::AppState;
use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;
use serde::Serialize;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    summary: crate::status::FleetSummary,
    message: String,
}

/// `GET /health` - liveness plus the fleet summary.
pub fn get_health(state: &AppState) -> Response<Full<Bytes>> {
    let summary = state.status().summary();
    let message = summary.message();
    response::ok(&HealthBody {
        status: "ok",
        summary,
        message,
    })
}
