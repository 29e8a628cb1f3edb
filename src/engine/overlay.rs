//! The overlay control.
//!
//! [`Overlay`] is what the host holds. It owns one native view at most, drives the init
//! state machine from the host tick, and gives every property and command a defined
//! answer whether or not the view is live:
//!
//! - properties are cached and re-applied once the view becomes ready
//! - `load_string`, `execute_script` and `capture_snapshot` return an error before ready
//! - queries return `false` and navigation commands are logged no-ops before ready
//!
//! Native callbacks reach the overlay only through its slot in the [`SlotRegistry`]; they
//! are drained on [`HostNotification::Process`].

use std::fmt::Display;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::engine::bridge::EventBridge;
use crate::engine::config::{valid_zoom, OverlayConfig};
use crate::engine::errors::{ErrorStatus, OverlayError};
use crate::engine::events::{BackendMessage, OverlayEvent};
use crate::engine::host::{Host, HostNotification, Panel, ParentWindow};
use crate::engine::init::{InitContext, InitMachine, InitPhase, InitStep, Transition};
use crate::engine::registry::{CompletionSink, SlotKey, SlotRegistry};
use crate::engine::resource::{DirectoryFs, ResourceFs, ResourceInterceptor};
use crate::engine::snapshot::SnapshotPipeline;
use crate::engine::state::OverlayState;
use crate::platform::backend::{EnvironmentOptions, NativeBackend, NativeView};
use crate::platform::Viewport;

/// A unique identifier for an overlay, represented as a UUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(Uuid);

impl OverlayId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OverlayId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for OverlayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-side web view control.
pub struct Overlay {
    id: OverlayId,
    config: OverlayConfig,
    state: OverlayState,
    backend: Arc<dyn NativeBackend>,
    fs: Arc<dyn ResourceFs>,
    registry: Arc<SlotRegistry>,
    init: InitMachine,
    /// Current slot occupancy and its receiving end, while a view exists.
    slot: Option<(SlotKey, mpsc::UnboundedReceiver<BackendMessage>)>,
    interceptor: Option<Arc<ResourceInterceptor>>,
    environment: Option<EnvironmentOptions>,
    parent: Option<ParentWindow>,
    bridge: EventBridge,
    snapshots: SnapshotPipeline,
    in_tree: bool,
    /// Last rectangle reported by the host, physical pixels.
    bounds: Viewport,
    scale: f32,
    visible: bool,
    event_tx: broadcast::Sender<OverlayEvent>,
}

impl std::fmt::Debug for Overlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overlay")
            .field("id", &self.id)
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("init", &self.init)
            .finish()
    }
}

impl Overlay {
    pub fn new(config: OverlayConfig, backend: Arc<dyn NativeBackend>) -> Result<Self, OverlayError> {
        config.validate()?;

        let fs = Arc::new(DirectoryFs::new(".", config.cache_dir.join("user")));
        let (event_tx, _first_rx) = broadcast::channel(config.event_capacity);

        Ok(Self {
            id: OverlayId::new(),
            state: OverlayState::from(&config),
            config,
            backend,
            fs,
            registry: SlotRegistry::global(),
            init: InitMachine::default(),
            slot: None,
            interceptor: None,
            environment: None,
            parent: None,
            bridge: EventBridge::default(),
            snapshots: SnapshotPipeline::default(),
            in_tree: false,
            bounds: Viewport::default(),
            scale: 1.0,
            visible: false,
            event_tx,
        })
    }

    /// Overlay on the platform's native backend.
    pub fn with_platform_backend(config: OverlayConfig) -> Result<Self, OverlayError> {
        Self::new(config, crate::platform::backends::platform_backend())
    }

    /// Serves the resource and user-data schemes from `fs`.
    pub fn with_resource_fs(mut self, fs: Arc<dyn ResourceFs>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_registry(mut self, registry: Arc<SlotRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn id(&self) -> OverlayId {
        self.id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<OverlayEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> &OverlayState {
        &self.state
    }

    pub fn phase(&self) -> InitPhase {
        self.init.phase()
    }

    pub fn is_ready(&self) -> bool {
        self.state.ready && self.init.is_ready()
    }

    /// Process-wide capability of the backend.
    pub fn capability(&self) -> ErrorStatus {
        self.backend.probe()
    }

    /// Effective status: the capability error if there is one, else the instance status.
    pub fn status(&self) -> ErrorStatus {
        let capability = self.backend.probe();
        if capability.is_ready() {
            self.state.status.clone()
        } else {
            capability
        }
    }

    // ---------- Host lifecycle ----------

    pub fn notification(&mut self, what: HostNotification, host: &dyn Host) {
        match what {
            HostNotification::EnterTree => self.enter_tree(host),
            HostNotification::ExitTree => self.exit_tree(),
            HostNotification::Process => self.process(host),
            HostNotification::Resized | HostNotification::MovedInParent => self.sync_geometry(host),
            HostNotification::VisibilityChanged => self.sync_visibility(host),
        }
    }

    fn enter_tree(&mut self, host: &dyn Host) {
        self.in_tree = true;
        self.bounds = host.window_rect();
        self.scale = host.screen_scale();
        self.visible = host.is_visible_in_tree();

        if host.is_editor_hint() {
            return;
        }
        let capability = self.backend.probe();
        if !capability.is_ready() {
            log::error!("Overlay[{}]: {} backend unavailable: {}", self.id, self.backend.name(), capability);
        }
    }

    fn exit_tree(&mut self) {
        self.in_tree = false;
        self.teardown();
    }

    fn process(&mut self, host: &dyn Host) {
        if !self.in_tree {
            return;
        }

        if self.init.phase() == InitPhase::NotStarted
            && self.state.status != ErrorStatus::ControlError
            && !host.is_editor_hint()
        {
            self.try_start(host);
        }

        if let Some(view) = self.init.any_view_mut() {
            view.pump();
        }
        self.drain();
    }

    fn sync_geometry(&mut self, host: &dyn Host) {
        self.bounds = host.window_rect();
        self.scale = host.screen_scale();

        let bounds = self.logical_bounds();
        if let Some(view) = self.init.ready_view_mut() {
            if let Err(e) = view.set_bounds(bounds) {
                log::error!("Overlay[{}]: failed to apply bounds {:?}: {}", self.id, bounds, e);
            }
        }
    }

    fn sync_visibility(&mut self, host: &dyn Host) {
        self.visible = host.is_visible_in_tree();

        let visible = self.visible;
        if let Some(view) = self.init.ready_view_mut() {
            if let Err(e) = view.set_visible(visible) {
                log::error!("Overlay[{}]: failed to apply visibility: {}", self.id, e);
            }
        }
    }

    /// What the host should draw in place of the view, if anything.
    pub fn draw(&self, host: &dyn Host) -> Option<Panel> {
        let capability = self.backend.probe();
        if !capability.is_ready() {
            return Some(Panel::Error(capability.to_string()));
        }
        if self.state.status == ErrorStatus::ControlError {
            return Some(Panel::Error(ErrorStatus::ControlError.to_string()));
        }
        if host.is_editor_hint() {
            return Some(Panel::Placeholder {
                url: self.state.home_url.clone(),
            });
        }
        None
    }

    // ---------- Init ----------

    fn try_start(&mut self, host: &dyn Host) {
        if !self.backend.probe().is_ready() {
            return;
        }

        let parent = host.parent_window();
        if parent.is_none() && self.backend.needs_parent_window() {
            log::debug!("Overlay[{}]: waiting for the host window", self.id);
            return;
        }

        let (key, rx) = self.registry.occupy(self.id);
        let sink = CompletionSink::new(key, self.registry.clone());

        let view = match self.backend.create_view(sink.clone()) {
            Ok(view) => view,
            Err(e) => {
                log::error!("Overlay[{}]: failed to create native view: {}", self.id, e);
                self.registry.release(key);
                self.state.status = ErrorStatus::ControlError;
                return;
            }
        };

        self.slot = Some((key, rx));
        self.interceptor = Some(Arc::new(ResourceInterceptor::new(
            self.config.schemes.clone(),
            self.fs.clone(),
            sink,
        )));
        self.environment = Some(EnvironmentOptions {
            cache_dir: self.config.cache_dir.clone(),
            browser_dir: host.executable_dir(),
            user_agent: Some(self.state.user_agent.clone()).filter(|ua| !ua.is_empty()),
        });
        self.parent = parent;
        self.bounds = host.window_rect();
        self.scale = host.screen_scale();
        self.visible = host.is_visible_in_tree();

        log::debug!("Overlay[{}]: starting {} view", self.id, self.backend.name());
        let Some(ctx) = self.init_context() else {
            return;
        };
        let transition = self.init.start(view, &ctx);
        self.on_transition(transition);
    }

    fn init_context(&self) -> Option<InitContext> {
        Some(InitContext {
            parent: self.parent,
            environment: self.environment.clone()?,
            bounds: self.logical_bounds(),
            visible: self.visible,
            interceptor: self.interceptor.clone()?,
            user_scripts: self.config.user_scripts.clone(),
        })
    }

    fn advance(&mut self, step: InitStep, result: Result<(), String>) {
        let Some(ctx) = self.init_context() else {
            return;
        };
        let transition = self.init.complete(step, result, &ctx);
        self.on_transition(transition);
    }

    fn on_transition(&mut self, transition: Transition) {
        match transition {
            Transition::Ready => self.on_ready(),
            Transition::Failed => {
                self.state.ready = false;
                self.state.status = ErrorStatus::ControlError;
                self.release_slot();
            }
            Transition::Advanced(phase) => log::debug!("Overlay[{}]: {:?}", self.id, phase),
            Transition::Unchanged => {}
        }
    }

    /// Applies the cached state to the fresh view: geometry, zoom, visibility, then the
    /// background and user agent, and finally the home URL.
    fn on_ready(&mut self) {
        self.state.ready = true;
        self.state.status = ErrorStatus::Ready;

        let id = self.id;
        let bounds = self.logical_bounds();
        let visible = self.visible;
        let state = self.state.clone();
        let Some(view) = self.init.ready_view_mut() else {
            return;
        };

        log_failure(id, "set_bounds", view.set_bounds(bounds));
        log_failure(id, "set_zoom", view.set_zoom(state.zoom));
        log_failure(id, "set_visible", view.set_visible(visible));
        if state.no_background {
            log_failure(id, "set_transparent_background", view.set_transparent_background(true).map(|_| ()));
        }
        if !state.user_agent.is_empty() {
            log_failure(id, "set_user_agent", view.set_user_agent(&state.user_agent).map(|_| ()));
        }
        if !state.home_url.is_empty() {
            log_failure(id, "navigate", view.navigate(&state.home_url));
        }
        log::info!("Overlay[{}]: web view ready", id);
    }

    fn drain(&mut self) {
        loop {
            let msg = match self.slot.as_mut() {
                Some((_, rx)) => match rx.try_recv() {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
                None => break,
            };
            self.handle_message(msg);
        }
    }

    fn handle_message(&mut self, msg: BackendMessage) {
        match msg {
            BackendMessage::EnvironmentCreated(result) => self.advance(InitStep::Environment, result),
            BackendMessage::ControllerCreated(result) => self.advance(InitStep::Controller, result),
            BackendMessage::ScriptsInjected(result) => self.advance(InitStep::ScriptInjection, result),
            BackendMessage::Native(event) => {
                if let Some(event) = self.bridge.translate(event) {
                    self.emit(event);
                }
            }
            BackendMessage::SnapshotCaptured(result) => {
                if let Some(event) = self.snapshots.complete(result) {
                    self.emit(event);
                }
            }
        }
    }

    fn emit(&self, event: OverlayEvent) {
        log::debug!("Overlay[{}]: {}", self.id, event);
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    fn release_slot(&mut self) {
        if let Some((key, _rx)) = self.slot.take() {
            self.registry.release(key);
        }
        self.interceptor = None;
    }

    /// Neutralizes callbacks, then releases the view. A control error stays.
    fn teardown(&mut self) {
        self.release_slot();
        self.init.teardown();
        self.snapshots.cancel();
        self.bridge.reset();
        self.environment = None;
        self.parent = None;
        self.state.ready = false;
        if self.state.status == ErrorStatus::Ready {
            self.state.status = ErrorStatus::Uninitialized;
        }
    }

    fn logical_bounds(&self) -> Viewport {
        self.bounds.to_logical(self.scale)
    }

    // ---------- Properties ----------

    pub fn set_url(&mut self, url: &str) {
        self.state.home_url = url.to_string();
        let id = self.id;
        if let Some(view) = self.init.ready_view_mut() {
            log_failure(id, "navigate", view.navigate(url));
        }
    }

    pub fn url(&self) -> String {
        self.init
            .ready_view()
            .and_then(|view| view.url())
            .unwrap_or_else(|| self.state.home_url.clone())
    }

    pub fn set_zoom_level(&mut self, zoom: f64) {
        let zoom = if valid_zoom(zoom) {
            zoom
        } else {
            log::warn!("Overlay[{}]: zoom {} out of range, clamped", self.id, zoom);
            if zoom.is_nan() { 1.0 } else { zoom.clamp(0.25, 5.0) }
        };
        self.state.zoom = zoom;

        let id = self.id;
        if let Some(view) = self.init.ready_view_mut() {
            log_failure(id, "set_zoom", view.set_zoom(zoom));
        }
    }

    pub fn zoom_level(&self) -> f64 {
        self.init
            .ready_view()
            .and_then(|view| view.zoom())
            .unwrap_or(self.state.zoom)
    }

    pub fn set_user_agent(&mut self, user_agent: &str) {
        self.state.user_agent = user_agent.to_string();

        let id = self.id;
        if let Some(view) = self.init.ready_view_mut() {
            match view.set_user_agent(user_agent) {
                Ok(true) => {}
                Ok(false) => log::debug!("Overlay[{}]: user agent applies on next init", id),
                Err(e) => log::error!("Overlay[{}]: set_user_agent failed: {}", id, e),
            }
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.state.user_agent
    }

    pub fn set_no_background(&mut self, no_background: bool) {
        self.state.no_background = no_background;

        let id = self.id;
        if let Some(view) = self.init.ready_view_mut() {
            match view.set_transparent_background(no_background) {
                Ok(true) => {}
                Ok(false) => log::debug!("Overlay[{}]: background mode applies on next init", id),
                Err(e) => log::error!("Overlay[{}]: set_transparent_background failed: {}", id, e),
            }
        }
    }

    pub fn no_background(&self) -> bool {
        self.state.no_background
    }

    // ---------- Commands ----------

    fn ready_view_or_err(&mut self) -> Result<&mut dyn NativeView, OverlayError> {
        if !self.init.is_ready() {
            let capability = self.backend.probe();
            return Err(if capability.is_ready() {
                OverlayError::NotReady
            } else {
                OverlayError::Capability(capability)
            });
        }
        self.init.ready_view_mut().ok_or(OverlayError::NotReady)
    }

    fn live_view(&mut self, op: &str) -> Option<&mut dyn NativeView> {
        let view = self.init.ready_view_mut();
        if view.is_none() {
            log::warn!("Overlay[{}]: {} called before the web view is ready", self.id, op);
        }
        view
    }

    pub fn load_string(&mut self, source: &str, url: &str) -> Result<(), OverlayError> {
        self.ready_view_or_err()?.load_html(source, url)?;
        Ok(())
    }

    /// Fire-and-forget; the script's result is not reported.
    pub fn execute_script(&mut self, script: &str) -> Result<(), OverlayError> {
        self.ready_view_or_err()?.execute_script(script)?;
        Ok(())
    }

    /// Starts a capture. The image arrives as [`OverlayEvent::SnapshotReady`].
    ///
    /// `width` is reserved; captures are taken at the view's size.
    pub fn capture_snapshot(&mut self, width: u32) -> Result<(), OverlayError> {
        if !self.init.is_ready() {
            return self.ready_view_or_err().map(|_| ());
        }
        self.snapshots.begin(width)?;
        let started = self.ready_view_or_err()?.capture_snapshot(width);
        if let Err(e) = started {
            self.snapshots.cancel();
            return Err(e.into());
        }
        Ok(())
    }

    pub fn title(&self) -> String {
        self.init
            .ready_view()
            .and_then(|view| view.title())
            .unwrap_or_default()
    }

    pub fn can_go_back(&self) -> bool {
        self.init.ready_view().map(|view| view.can_go_back()).unwrap_or(false)
    }

    pub fn can_go_forward(&self) -> bool {
        self.init.ready_view().map(|view| view.can_go_forward()).unwrap_or(false)
    }

    pub fn is_loading(&self) -> bool {
        match self.init.ready_view() {
            Some(view) => view.is_loading().unwrap_or(self.bridge.is_loading()),
            None => false,
        }
    }

    pub fn is_secure_content(&self) -> bool {
        self.init.is_ready() && self.bridge.is_secure()
    }

    pub fn go_back(&mut self) {
        let id = self.id;
        if let Some(view) = self.live_view("go_back") {
            log_failure(id, "go_back", view.go_back());
        }
    }

    pub fn go_forward(&mut self) {
        let id = self.id;
        if let Some(view) = self.live_view("go_forward") {
            log_failure(id, "go_forward", view.go_forward());
        }
    }

    pub fn reload(&mut self) {
        let id = self.id;
        if let Some(view) = self.live_view("reload") {
            log_failure(id, "reload", view.reload());
        }
    }

    pub fn stop(&mut self) {
        let id = self.id;
        if let Some(view) = self.live_view("stop") {
            log_failure(id, "stop", view.stop());
        }
    }
}

impl Drop for Overlay {
    fn drop(&mut self) {
        self.teardown();
        self.registry.remove(self.id);
    }
}

fn log_failure(id: OverlayId, op: &str, result: anyhow::Result<()>) {
    if let Err(e) = result {
        log::error!("Overlay[{}]: {} failed: {}", id, op, e);
    }
}
