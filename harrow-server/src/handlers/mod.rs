pub mod handle_websocket;
pub mod scan;
pub mod system;

use harrow_core::ScanId;
use serde::Deserialize;

use crate::infra::errors::{AppError, AppResult};

/// `?id=<scan_id>` as used by every per-session route.
#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    pub id: Option<String>,
}

impl ScanQuery {
    pub fn scan_id(&self) -> AppResult<ScanId> {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ScanId::from)
            .ok_or_else(|| AppError::bad_request("id query parameter is required"))
    }
}
