//! Operator-facing HTTP status API.
//!
//! A small hyper-based surface over the controller handle:
//!
//! - `GET /health` - liveness plus the fleet summary
//! - `GET /api/v1/status` - status of every tracked identity
//! - `GET /api/v1/status/{kind}/{name}` - status of one identity
//! - `POST /api/v1/reconcile` - trigger an immediate reconcile cycle

pub mod handlers;
mod response;
mod router;
mod server;
mod state;

pub use server::{ApiServer, ServerConfig};
pub use state::AppState;
