//! Manual reconcile trigger.

use crate::api::response;
use crate::api::state::AppState;
use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;

/// `POST /api/v1/reconcile` - start a reconcile cycle immediately.
pub fn trigger(state: &AppState) -> Response<Full<Bytes>> {
    state.handle.trigger_reconcile();
    tracing::info!("Reconcile cycle triggered via API");
    response::accepted(&serde_json::json!({ "triggered": true }))
}
