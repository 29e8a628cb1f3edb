pub mod bridge;
pub mod capability;
pub mod config;
pub mod errors;
pub mod events;
pub mod host;
pub mod init;
pub mod overlay;
pub mod registry;
pub mod resource;
pub mod snapshot;
pub mod state;

pub use config::{OverlayConfig, OverlayConfigError, SchemeSet};
pub use errors::{ErrorStatus, OverlayError};
pub use events::{BackendMessage, NativeEvent, OverlayEvent};
pub use host::{Host, HostNotification, Panel, ParentWindow};
pub use overlay::{Overlay, OverlayId};
pub use resource::{DirectoryFs, ResourceFs, ResourceInterceptor, ResourceRequest, ResourceResponse};

/// Default capacity of the broadcast channel that carries [`OverlayEvent`]s to the host.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
