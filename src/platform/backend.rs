use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::errors::ErrorStatus;
use crate::engine::host::ParentWindow;
use crate::engine::registry::CompletionSink;
use crate::engine::resource::ResourceInterceptor;
use crate::platform::Viewport;

/// Result of starting an init step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step finished synchronously, no completion message will follow.
    Complete,
    /// The completion arrives later as a [`BackendMessage`](crate::BackendMessage).
    Pending,
}

/// Native subscription kinds a view can hold tokens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    NavigationStarting,
    NavigationCompleted,
    LoadChanged,
    NewWindow,
    ResourceRequested,
    ScriptMessage,
    InsecureContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackToken {
    pub kind: CallbackKind,
    /// Backend-specific registration id.
    pub raw: i64,
}

/// Every native subscription a view holds. Handed back to the view on teardown so it can
/// unsubscribe before the engine object goes away.
#[derive(Debug, Default)]
pub struct CallbackTokens(Vec<CallbackToken>);

impl CallbackTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: CallbackKind, raw: i64) {
        self.0.push(CallbackToken { kind, raw });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallbackToken> {
        self.0.iter()
    }
}

impl IntoIterator for CallbackTokens {
    type Item = CallbackToken;
    type IntoIter = std::vec::IntoIter<CallbackToken>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Parameters for the environment step.
#[derive(Debug, Clone)]
pub struct EnvironmentOptions {
    /// Engine profile/cache directory.
    pub cache_dir: PathBuf,
    /// Where a bundled browser runtime may live.
    pub browser_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
}

/// A platform web engine.
pub trait NativeBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Loads the engine's client library and resolves its entry points. Idempotent.
    fn probe(&self) -> ErrorStatus;

    /// Whether views need a host window before the environment step can start.
    fn needs_parent_window(&self) -> bool {
        true
    }

    /// Creates an empty view that reports back through `sink`.
    fn create_view(&self, sink: CompletionSink) -> anyhow::Result<Box<dyn NativeView>>;
}

/// One native web view.
///
/// Init steps run in order: [`begin_environment`](NativeView::begin_environment),
/// [`begin_controller`](NativeView::begin_controller),
/// [`install_bridge`](NativeView::install_bridge), then
/// [`inject_scripts`](NativeView::inject_scripts). Every other call is only made once the
/// last step completed.
pub trait NativeView {
    fn begin_environment(&mut self, parent: Option<&ParentWindow>, options: &EnvironmentOptions) -> anyhow::Result<StepOutcome>;

    fn begin_controller(&mut self, bounds: Viewport, visible: bool) -> anyhow::Result<StepOutcome>;

    /// Subscribes to navigation and message callbacks and routes the custom schemes to
    /// `interceptor`. Only valid once the controller exists.
    fn install_bridge(&mut self, interceptor: Arc<ResourceInterceptor>) -> anyhow::Result<CallbackTokens>;

    /// Document-start script that defines `webviewMessage(s)`.
    fn message_bridge_script(&self) -> Option<&'static str> {
        None
    }

    fn inject_scripts(&mut self, scripts: &[String]) -> anyhow::Result<StepOutcome>;

    /// Drives the engine's event loop for one iteration, for backends that need it.
    fn pump(&mut self) {}

    fn navigate(&mut self, url: &str) -> anyhow::Result<()>;
    fn load_html(&mut self, html: &str, base_url: &str) -> anyhow::Result<()>;
    fn execute_script(&mut self, script: &str) -> anyhow::Result<()>;

    fn url(&self) -> Option<String>;
    fn title(&self) -> Option<String>;
    fn zoom(&self) -> Option<f64>;
    fn set_zoom(&mut self, zoom: f64) -> anyhow::Result<()>;

    /// Returns `false` when the backend cannot apply it live.
    fn set_user_agent(&mut self, user_agent: &str) -> anyhow::Result<bool>;

    /// Returns `false` when the backend cannot apply it live.
    fn set_transparent_background(&mut self, transparent: bool) -> anyhow::Result<bool>;

    fn can_go_back(&self) -> bool;
    fn can_go_forward(&self) -> bool;

    /// `None` when the engine can't be asked; callers fall back to tracked state.
    fn is_loading(&self) -> Option<bool> {
        None
    }

    fn go_back(&mut self) -> anyhow::Result<()>;
    fn go_forward(&mut self) -> anyhow::Result<()>;
    fn reload(&mut self) -> anyhow::Result<()>;
    fn stop(&mut self) -> anyhow::Result<()>;

    fn set_bounds(&mut self, bounds: Viewport) -> anyhow::Result<()>;
    fn set_visible(&mut self, visible: bool) -> anyhow::Result<()>;

    /// Starts a capture that completes with `BackendMessage::SnapshotCaptured`.
    fn capture_snapshot(&mut self, width: u32) -> anyhow::Result<()>;

    fn unsubscribe(&mut self, tokens: CallbackTokens);

    /// Destroys the native objects. Called exactly once, after `unsubscribe`.
    fn release(&mut self);
}
