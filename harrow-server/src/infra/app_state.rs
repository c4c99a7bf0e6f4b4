use harrow_config::Config;
use harrow_core::{ScanService, SessionRegistry, Toolkit};
use std::{fmt, sync::Arc};

use crate::infra::websocket::ConnectionManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scans: ScanService,
    pub websocket_manager: ConnectionManager,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("bind_address", &self.config.bind_address())
            .field("dev_mode", &self.config.dev_mode)
            .field("scans", &self.scans)
            .field("websocket_manager", &self.websocket_manager)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire the push channel, session registry and scan service around
    /// `toolkit`.
    pub fn new(config: Config, toolkit: Toolkit) -> Self {
        let websocket_manager =
            ConnectionManager::new(config.websocket.write_wait);
        let registry =
            Arc::new(SessionRegistry::new(Arc::new(websocket_manager.clone())));
        let scans =
            ScanService::new(registry, toolkit, config.pipeline.clone());

        Self {
            config: Arc::new(config),
            scans,
            websocket_manager,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
