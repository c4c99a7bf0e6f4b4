//! HTTP and WebSocket front end for the Harrow scan pipeline.
//!
//! `POST /api/scans` starts a session, `GET /ws?id=` attaches the single
//! push connection for it, and the remaining routes expose snapshots.

pub mod app;
pub mod handlers;
pub mod infra;
pub mod routes;

pub use app::create_app;
pub use infra::app_state::AppState;
