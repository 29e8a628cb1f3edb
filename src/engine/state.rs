use serde::{Deserialize, Serialize};

use crate::engine::config::OverlayConfig;
use crate::engine::errors::ErrorStatus;

/// Everything the overlay remembers about itself, live view or not.
///
/// The persisted half (URL, user agent, zoom, background mode) survives teardown and is
/// re-applied on the next init. `ready` and `status` describe the current instance only
/// and are never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayState {
    pub home_url: String,
    /// Empty means the engine's default.
    pub user_agent: String,
    pub zoom: f64,
    pub no_background: bool,
    #[serde(skip)]
    pub ready: bool,
    /// Instance-level status: `Uninitialized`, `ControlError` or `Ready`.
    #[serde(skip)]
    pub status: ErrorStatus,
}

impl From<&OverlayConfig> for OverlayState {
    fn from(config: &OverlayConfig) -> Self {
        Self {
            home_url: config.home_url.clone(),
            user_agent: config.user_agent.clone().unwrap_or_default(),
            zoom: config.zoom,
            no_background: config.no_background,
            ready: false,
            status: ErrorStatus::Uninitialized,
        }
    }
}
