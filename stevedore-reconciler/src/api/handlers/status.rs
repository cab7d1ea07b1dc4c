//! Status endpoints.

use crate::api::response;
use crate::api::state::AppState;
use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;
use serde::Serialize;
use std::str::FromStr;
use stevedore_core::types::{ManifestId, ManifestKind};

#[derive(Serialize)]
struct FleetBody {
    summary: crate::status::FleetSummary,
    identities: Vec<crate::status::IdentityStatus>,
}

/// `GET /api/v1/status` - every tracked identity plus the fleet summary.
pub fn get_fleet_status(state: &AppState) -> Response<Full<Bytes>> {
    let registry = state.status();
    response::ok(&FleetBody {
        summary: registry.summary(),
        identities: registry.snapshot(),
    })
}

/// `GET /api/v1/status/{kind}/{name}` - one identity.
pub fn get_identity_status(state: &AppState, suffix: &str) -> Response<Full<Bytes>> {
    let Some((kind, name)) = suffix.split_once('/') else {
        return response::bad_request("Expected /api/v1/status/{kind}/{name}");
    };
    let Ok(kind) = ManifestKind::from_str(kind) else {
        return response::bad_request("Unknown kind (expected 'deployment' or 'service')");
    };
    if name.is_empty() {
        return response::bad_request("Identity name must not be empty");
    }

    let identity = ManifestId::new(kind, name);
    match state.status().get(&identity) {
        Some(status) => response::ok(&status),
        None => response::not_found(&format!("No status for {}", identity)),
    }
}
