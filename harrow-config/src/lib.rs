//! Configuration for the Harrow scan server.
//!
//! Values come from three layers, highest precedence first: process
//! environment (after loading `.env`), an optional `harrow.toml`, and the
//! built-in defaults. The merged [`Config`] is checked by guard rails that
//! reject unsafe combinations and collect softer [`ConfigWarnings`].

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    Config, ConfigMetadata, CorsConfig, ServerConfig, WebSocketConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
