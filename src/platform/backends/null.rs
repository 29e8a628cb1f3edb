//! Headless in-process backend.
//!
//! The null backend simulates a web engine without any native dependency. It keeps a
//! navigation history, answers property queries, and delivers its completions the way a
//! callback-driven engine would: queued, and posted into the overlay's slot on the next
//! [`pump`](NativeView::pump). With [`Completion::Immediate`] the init steps complete
//! synchronously instead, like WebKitGTK does.
//!
//! Every view reports into a shared [`NullEngine`], which tests and headless hosts use to
//! observe views and to inject requests and engine events.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};

use crate::engine::errors::ErrorStatus;
use crate::engine::events::{BackendMessage, NativeEvent};
use crate::engine::host::ParentWindow;
use crate::engine::init::InitStep;
use crate::engine::registry::CompletionSink;
use crate::engine::resource::{ResourceInterceptor, ResourceRequest, ResourceResponse};
use crate::engine::snapshot::{RawCapture, SourceFormat};
use crate::platform::backend::{
    CallbackKind, CallbackTokens, EnvironmentOptions, NativeBackend, NativeView, StepOutcome,
};
use crate::platform::Viewport;

const MESSAGE_BRIDGE_SCRIPT: &str = "function webviewMessage(s){window.__overlayMessages=(window.__overlayMessages||[]).concat([s]);}";

/// A property or navigation a view had applied to it.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewCall {
    Bounds(Viewport),
    Zoom(f64),
    Visible(bool),
    TransparentBackground(bool),
    UserAgent(String),
    Navigate(String),
}

/// How init steps complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    /// Steps return `Pending` and complete on the next pump.
    #[default]
    Deferred,
    /// Steps complete synchronously.
    Immediate,
}

#[derive(Default)]
struct EngineState {
    next_view: u64,
    created: usize,
    live: usize,
    navigations: Vec<String>,
    scripts: Vec<String>,
    injected: Vec<String>,
    calls: Vec<(u64, ViewCall)>,
    views: Vec<(u64, CompletionSink)>,
    interceptors: Vec<(u64, Arc<ResourceInterceptor>)>,
}

/// Shared view of everything a [`NullBackend`] created.
#[derive(Clone, Default)]
pub struct NullEngine {
    inner: Arc<Mutex<EngineState>>,
}

impl std::fmt::Debug for NullEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("NullEngine")
            .field("created", &state.created)
            .field("live", &state.live)
            .finish()
    }
}

impl NullEngine {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Views created and not yet released.
    pub fn live_views(&self) -> usize {
        self.lock().live
    }

    pub fn created_views(&self) -> usize {
        self.lock().created
    }

    /// Every URL any view loaded, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    /// Scripts run through `execute_script`.
    pub fn scripts(&self) -> Vec<String> {
        self.lock().scripts.clone()
    }

    /// Document-start scripts injected during init.
    pub fn injected_scripts(&self) -> Vec<String> {
        self.lock().injected.clone()
    }

    /// Calls applied to the newest view, oldest first.
    pub fn applied_calls(&self) -> Vec<ViewCall> {
        let state = self.lock();
        let newest = state.next_view;
        state
            .calls
            .iter()
            .filter(|(view, _)| *view == newest)
            .map(|(_, call)| call.clone())
            .collect()
    }

    /// Sends `uri` through the newest view's resource interceptor, as the engine would for
    /// a registered scheme. `None` when no view has its bridge installed.
    pub fn request(&self, uri: &str) -> Option<ResourceResponse> {
        let interceptor = self.lock().interceptors.last().map(|(_, i)| i.clone())?;
        Some(interceptor.intercept(&ResourceRequest::new(uri)))
    }

    /// Delivers a native event to every live view. Returns how many accepted it.
    pub fn emit(&self, event: NativeEvent) -> usize {
        let sinks: Vec<CompletionSink> = self.lock().views.iter().map(|(_, s)| s.clone()).collect();
        sinks
            .iter()
            .filter(|sink| sink.post(BackendMessage::Native(event.clone())))
            .count()
    }
}

/// Backend without a native engine.
#[derive(Debug)]
pub struct NullBackend {
    status: ErrorStatus,
    completion: Completion,
    fail_step: Option<InitStep>,
    engine: NullEngine,
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NullBackend {
    pub fn new() -> Self {
        Self {
            status: ErrorStatus::Ready,
            completion: Completion::Deferred,
            fail_step: None,
            engine: NullEngine::default(),
        }
    }

    /// Reports `status` from every probe, as if the engine library were in that state.
    pub fn with_status(mut self, status: ErrorStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }

    /// Makes every view fail the given init step.
    pub fn failing_at(mut self, step: InitStep) -> Self {
        self.fail_step = Some(step);
        self
    }

    pub fn engine(&self) -> NullEngine {
        self.engine.clone()
    }
}

impl NativeBackend for NullBackend {
    fn name(&self) -> &str {
        "NullBackend"
    }

    fn probe(&self) -> ErrorStatus {
        self.status.clone()
    }

    fn needs_parent_window(&self) -> bool {
        false
    }

    fn create_view(&self, sink: CompletionSink) -> Result<Box<dyn NativeView>> {
        if !self.status.is_ready() {
            return Err(anyhow!("null engine unavailable: {}", self.status));
        }

        let id = {
            let mut state = self.engine.lock();
            state.next_view += 1;
            state.created += 1;
            state.live += 1;
            let id = state.next_view;
            state.views.push((id, sink.clone()));
            id
        };

        Ok(Box::new(NullView {
            id,
            engine: self.engine.clone(),
            sink,
            completion: self.completion,
            fail_step: self.fail_step,
            queue: VecDeque::new(),
            history: Vec::new(),
            index: 0,
            title: String::new(),
            zoom: 1.0,
            user_agent: None,
            transparent: false,
            bounds: Viewport::default(),
            visible: false,
            loading: false,
            released: false,
        }))
    }
}

pub struct NullView {
    id: u64,
    engine: NullEngine,
    sink: CompletionSink,
    completion: Completion,
    fail_step: Option<InitStep>,
    queue: VecDeque<BackendMessage>,
    history: Vec<String>,
    index: usize,
    title: String,
    zoom: f64,
    user_agent: Option<String>,
    transparent: bool,
    bounds: Viewport,
    visible: bool,
    loading: bool,
    released: bool,
}

impl NullView {
    fn step(&mut self, step: InitStep) -> Result<StepOutcome> {
        let failing = self.fail_step == Some(step);
        let result = if failing {
            Err(format!("simulated {:?} failure", step))
        } else {
            Ok(())
        };

        match self.completion {
            Completion::Immediate => match result {
                Ok(()) => Ok(StepOutcome::Complete),
                Err(reason) => Err(anyhow!(reason)),
            },
            Completion::Deferred => {
                let msg = match step {
                    InitStep::Environment => BackendMessage::EnvironmentCreated(result),
                    InitStep::Controller => BackendMessage::ControllerCreated(result),
                    InitStep::ScriptInjection => BackendMessage::ScriptsInjected(result),
                };
                self.queue.push_back(msg);
                Ok(StepOutcome::Pending)
            }
        }
    }

    fn record(&self, call: ViewCall) {
        self.engine.lock().calls.push((self.id, call));
    }

    fn current(&self) -> Option<&String> {
        self.history.get(self.index)
    }

    fn start_load(&mut self, url: String, title: String) {
        self.engine.lock().navigations.push(url.clone());
        self.title = title;
        // A new load supersedes a pending completion.
        self.queue
            .retain(|m| !matches!(m, BackendMessage::Native(NativeEvent::NavigationCompleted { .. })));
        self.loading = true;
        self.sink
            .post(BackendMessage::Native(NativeEvent::NavigationStarting { url: Some(url) }));
        self.queue
            .push_back(BackendMessage::Native(NativeEvent::NavigationCompleted { success: true }));
    }

    fn push_history(&mut self, url: &str) {
        if !self.history.is_empty() {
            self.history.truncate(self.index + 1);
        }
        self.history.push(url.to_string());
        self.index = self.history.len() - 1;
    }
}

impl NativeView for NullView {
    fn begin_environment(&mut self, _parent: Option<&ParentWindow>, options: &EnvironmentOptions) -> Result<StepOutcome> {
        log::debug!("NullView[{}]: environment in {:?}", self.id, options.cache_dir);
        self.user_agent = options.user_agent.clone();
        self.step(InitStep::Environment)
    }

    fn begin_controller(&mut self, bounds: Viewport, visible: bool) -> Result<StepOutcome> {
        self.bounds = bounds;
        self.visible = visible;
        self.step(InitStep::Controller)
    }

    fn install_bridge(&mut self, interceptor: Arc<ResourceInterceptor>) -> Result<CallbackTokens> {
        self.engine.lock().interceptors.push((self.id, interceptor));

        let mut tokens = CallbackTokens::new();
        for (raw, kind) in [
            CallbackKind::NavigationStarting,
            CallbackKind::NavigationCompleted,
            CallbackKind::NewWindow,
            CallbackKind::ResourceRequested,
            CallbackKind::ScriptMessage,
        ]
        .into_iter()
        .enumerate()
        {
            tokens.push(kind, raw as i64);
        }
        Ok(tokens)
    }

    fn message_bridge_script(&self) -> Option<&'static str> {
        Some(MESSAGE_BRIDGE_SCRIPT)
    }

    fn inject_scripts(&mut self, scripts: &[String]) -> Result<StepOutcome> {
        self.engine.lock().injected.extend(scripts.iter().cloned());
        self.step(InitStep::ScriptInjection)
    }

    fn pump(&mut self) {
        let queued: Vec<BackendMessage> = self.queue.drain(..).collect();
        for msg in queued {
            if matches!(msg, BackendMessage::Native(NativeEvent::NavigationCompleted { .. })) {
                self.loading = false;
            }
            self.sink.post(msg);
        }
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        self.record(ViewCall::Navigate(url.to_string()));
        self.push_history(url);
        self.start_load(url.to_string(), url.to_string());
        Ok(())
    }

    fn load_html(&mut self, html: &str, base_url: &str) -> Result<()> {
        let url = if base_url.is_empty() { "about:blank" } else { base_url };
        self.push_history(url);
        self.start_load(url.to_string(), extract_title(html).unwrap_or_default());
        Ok(())
    }

    fn execute_script(&mut self, script: &str) -> Result<()> {
        self.engine.lock().scripts.push(script.to_string());
        Ok(())
    }

    fn url(&self) -> Option<String> {
        self.current().cloned()
    }

    fn title(&self) -> Option<String> {
        Some(self.title.clone())
    }

    fn zoom(&self) -> Option<f64> {
        Some(self.zoom)
    }

    fn set_zoom(&mut self, zoom: f64) -> Result<()> {
        self.record(ViewCall::Zoom(zoom));
        self.zoom = zoom;
        Ok(())
    }

    fn set_user_agent(&mut self, user_agent: &str) -> Result<bool> {
        self.record(ViewCall::UserAgent(user_agent.to_string()));
        self.user_agent = Some(user_agent.to_string()).filter(|ua| !ua.is_empty());
        Ok(true)
    }

    fn set_transparent_background(&mut self, transparent: bool) -> Result<bool> {
        self.record(ViewCall::TransparentBackground(transparent));
        self.transparent = transparent;
        Ok(true)
    }

    fn can_go_back(&self) -> bool {
        !self.history.is_empty() && self.index > 0
    }

    fn can_go_forward(&self) -> bool {
        self.index + 1 < self.history.len()
    }

    fn is_loading(&self) -> Option<bool> {
        Some(self.loading)
    }

    fn go_back(&mut self) -> Result<()> {
        if self.can_go_back() {
            self.index -= 1;
            let url = self.history[self.index].clone();
            self.start_load(url.clone(), url);
        }
        Ok(())
    }

    fn go_forward(&mut self) -> Result<()> {
        if self.can_go_forward() {
            self.index += 1;
            let url = self.history[self.index].clone();
            self.start_load(url.clone(), url);
        }
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        if let Some(url) = self.current().cloned() {
            let title = self.title.clone();
            self.start_load(url, title);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.loading {
            self.queue
                .retain(|m| !matches!(m, BackendMessage::Native(NativeEvent::NavigationCompleted { .. })));
            self.loading = false;
            self.sink
                .post(BackendMessage::Native(NativeEvent::NavigationCompleted { success: false }));
        }
        Ok(())
    }

    fn set_bounds(&mut self, bounds: Viewport) -> Result<()> {
        self.record(ViewCall::Bounds(bounds));
        self.bounds = bounds;
        Ok(())
    }

    fn set_visible(&mut self, visible: bool) -> Result<()> {
        self.record(ViewCall::Visible(visible));
        self.visible = visible;
        Ok(())
    }

    fn capture_snapshot(&mut self, _width: u32) -> Result<()> {
        let width = self.bounds.width.max(1);
        let height = self.bounds.height.max(1);
        // B, G, R, A in memory.
        let pixel: [u8; 4] = if self.transparent { [0, 0, 0, 0] } else { [255, 255, 255, 255] };
        let data = pixel.repeat(pixel_count(width, height));

        self.queue.push_back(BackendMessage::SnapshotCaptured(Ok(RawCapture::Pixels {
            format: SourceFormat::Argb32,
            width,
            height,
            stride: width * 4,
            data,
        })));
        Ok(())
    }

    fn unsubscribe(&mut self, tokens: CallbackTokens) {
        log::debug!("NullView[{}]: dropping {} subscriptions", self.id, tokens.len());
        let id = self.id;
        self.engine.lock().interceptors.retain(|(view, _)| *view != id);
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.queue.clear();

        let id = self.id;
        let mut state = self.engine.lock();
        state.live = state.live.saturating_sub(1);
        state.views.retain(|(view, _)| *view != id);
        state.interceptors.retain(|(view, _)| *view != id);
    }
}

impl Drop for NullView {
    fn drop(&mut self) {
        self.release();
    }
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let start = lower.find("<title>")? + "<title>".len();
    let end = lower[start..].find("</title>")? + start;
    Some(html[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::overlay::OverlayId;
    use crate::engine::registry::SlotRegistry;

    fn view_with_rx() -> (Box<dyn NativeView>, tokio::sync::mpsc::UnboundedReceiver<BackendMessage>, NullEngine) {
        let registry = Arc::new(SlotRegistry::new());
        let (key, rx) = registry.occupy(OverlayId::new());
        let backend = NullBackend::new();
        let engine = backend.engine();
        let view = backend.create_view(CompletionSink::new(key, registry)).unwrap();
        (view, rx, engine)
    }

    #[test]
    fn history_navigation() {
        let (mut view, _rx, _engine) = view_with_rx();
        view.navigate("https://a.test").unwrap();
        view.navigate("https://b.test").unwrap();
        assert!(view.can_go_back());
        assert!(!view.can_go_forward());

        view.go_back().unwrap();
        assert_eq!(view.url().as_deref(), Some("https://a.test"));
        assert!(view.can_go_forward());

        view.navigate("https://c.test").unwrap();
        assert!(!view.can_go_forward());
    }

    #[test]
    fn completion_waits_for_pump() {
        let (mut view, mut rx, _engine) = view_with_rx();
        view.navigate("https://a.test").unwrap();
        assert_eq!(view.is_loading(), Some(true));
        assert!(matches!(
            rx.try_recv(),
            Ok(BackendMessage::Native(NativeEvent::NavigationStarting { .. }))
        ));
        assert!(rx.try_recv().is_err());

        view.pump();
        assert_eq!(view.is_loading(), Some(false));
        assert!(matches!(
            rx.try_recv(),
            Ok(BackendMessage::Native(NativeEvent::NavigationCompleted { success: true }))
        ));
    }

    #[test]
    fn load_html_takes_title_from_markup() {
        let (mut view, _rx, _engine) = view_with_rx();
        view.load_html("<html><head><TITLE> Menu </TITLE></head></html>", "res://ui/")
            .unwrap();
        assert_eq!(view.title().as_deref(), Some("Menu"));
        assert_eq!(view.url().as_deref(), Some("res://ui/"));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn pixel_count_does_not_overflow_u32() {
        assert_eq!(pixel_count(70_000, 70_000), 4_900_000_000);
    }

    #[test]
    fn snapshot_covers_the_bounds() {
        let (mut view, mut rx, _engine) = view_with_rx();
        view.set_bounds(Viewport::new(0, 0, 3, 2)).unwrap();
        view.capture_snapshot(0).unwrap();
        view.pump();
        match rx.try_recv() {
            Ok(BackendMessage::SnapshotCaptured(Ok(RawCapture::Pixels { width, height, stride, data, .. }))) => {
                assert_eq!((width, height, stride), (3, 2, 12));
                assert_eq!(data.len(), 24);
            }
            _ => panic!("expected a pixel capture"),
        }
    }

    #[test]
    fn applied_calls_are_recorded_per_view() {
        let (mut view, _rx, engine) = view_with_rx();
        view.set_zoom(1.5).unwrap();
        view.set_visible(true).unwrap();
        view.navigate("https://a.test").unwrap();
        assert_eq!(
            engine.applied_calls(),
            vec![
                ViewCall::Zoom(1.5),
                ViewCall::Visible(true),
                ViewCall::Navigate("https://a.test".into()),
            ]
        );
    }

    #[test]
    fn release_is_counted_once() {
        let (mut view, _rx, engine) = view_with_rx();
        assert_eq!(engine.live_views(), 1);
        view.release();
        view.release();
        drop(view);
        assert_eq!(engine.live_views(), 0);
        assert_eq!(engine.created_views(), 1);
    }
}
