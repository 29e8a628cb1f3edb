//! Init state machine.
//!
//! ```text
//! NotStarted -> AwaitingEnvironment -> AwaitingController -> AwaitingScriptInjection -> Ready
//!                       \                     \                       \
//!                        +---------------------+-----------------------+--> Failed(reason)
//! ```
//!
//! Each step either completes synchronously ([`StepOutcome::Complete`], WebKitGTK) or later
//! through a message posted into the overlay's slot ([`StepOutcome::Pending`], WebView2).
//! The machine only ever advances from the step it is waiting on, so a completion that
//! arrives out of order or after teardown is ignored.
//!
//! Native subscriptions are installed when the controller exists and not before. The
//! [`NativeViewHandle`] is created on the transition into `Ready`.

use std::sync::Arc;

use crate::engine::host::ParentWindow;
use crate::engine::resource::ResourceInterceptor;
use crate::platform::backend::{CallbackTokens, EnvironmentOptions, NativeView, StepOutcome};
use crate::platform::Viewport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    Environment,
    Controller,
    ScriptInjection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    NotStarted,
    AwaitingEnvironment,
    AwaitingController,
    AwaitingScriptInjection,
    Ready,
    Failed,
}

/// What the machine needs from the overlay while it advances.
pub struct InitContext {
    pub parent: Option<ParentWindow>,
    pub environment: EnvironmentOptions,
    /// Logical bounds for the controller.
    pub bounds: Viewport,
    pub visible: bool,
    pub interceptor: Arc<ResourceInterceptor>,
    pub user_scripts: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Advanced(InitPhase),
    Ready,
    Failed,
}

/// A native view that gets released exactly once.
pub struct OwnedView {
    view: Box<dyn NativeView>,
    released: bool,
}

impl OwnedView {
    pub fn new(view: Box<dyn NativeView>) -> Self {
        Self { view, released: false }
    }

    fn teardown(&mut self, tokens: CallbackTokens) {
        if self.released {
            return;
        }
        if !tokens.is_empty() {
            self.view.unsubscribe(tokens);
        }
        self.view.release();
        self.released = true;
    }
}

impl Drop for OwnedView {
    fn drop(&mut self) {
        self.teardown(CallbackTokens::default());
    }
}

/// Exclusive ownership of a ready native view and its subscriptions.
pub struct NativeViewHandle {
    view: OwnedView,
    tokens: Option<CallbackTokens>,
}

impl NativeViewHandle {
    fn new(view: OwnedView, tokens: CallbackTokens) -> Self {
        Self {
            view,
            tokens: Some(tokens),
        }
    }

    pub fn view(&self) -> &dyn NativeView {
        self.view.view.as_ref()
    }

    pub fn view_mut(&mut self) -> &mut dyn NativeView {
        self.view.view.as_mut()
    }

    /// Unsubscribes every token, then releases the engine object.
    fn teardown(&mut self) {
        let tokens = self.tokens.take().unwrap_or_default();
        self.view.teardown(tokens);
    }
}

impl Drop for NativeViewHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

pub enum InitState {
    NotStarted,
    AwaitingEnvironment(OwnedView),
    AwaitingController(OwnedView),
    AwaitingScriptInjection { view: OwnedView, tokens: CallbackTokens },
    Ready(NativeViewHandle),
    Failed { step: InitStep, reason: String },
}

impl std::fmt::Debug for InitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitState::Failed { step, reason } => f
                .debug_struct("Failed")
                .field("step", step)
                .field("reason", reason)
                .finish(),
            InitState::AwaitingScriptInjection { tokens, .. } => f
                .debug_struct("AwaitingScriptInjection")
                .field("tokens", &tokens.len())
                .finish(),
            other => write!(f, "{:?}", InitMachine::phase_of(other)),
        }
    }
}

#[derive(Debug)]
pub struct InitMachine {
    state: InitState,
}

impl Default for InitMachine {
    fn default() -> Self {
        Self {
            state: InitState::NotStarted,
        }
    }
}

impl InitMachine {
    pub fn state(&self) -> &InitState {
        &self.state
    }

    pub fn phase(&self) -> InitPhase {
        Self::phase_of(&self.state)
    }

    fn phase_of(state: &InitState) -> InitPhase {
        match state {
            InitState::NotStarted => InitPhase::NotStarted,
            InitState::AwaitingEnvironment(_) => InitPhase::AwaitingEnvironment,
            InitState::AwaitingController(_) => InitPhase::AwaitingController,
            InitState::AwaitingScriptInjection { .. } => InitPhase::AwaitingScriptInjection,
            InitState::Ready(_) => InitPhase::Ready,
            InitState::Failed { .. } => InitPhase::Failed,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, InitState::Ready(_))
    }

    pub fn failure(&self) -> Option<(InitStep, &str)> {
        match &self.state {
            InitState::Failed { step, reason } => Some((*step, reason.as_str())),
            _ => None,
        }
    }

    /// The ready view, if any.
    pub fn ready_view(&self) -> Option<&dyn NativeView> {
        match &self.state {
            InitState::Ready(handle) => Some(handle.view()),
            _ => None,
        }
    }

    pub fn ready_view_mut(&mut self) -> Option<&mut dyn NativeView> {
        match &mut self.state {
            InitState::Ready(handle) => Some(handle.view_mut()),
            _ => None,
        }
    }

    /// Any view the machine holds, ready or still initializing.
    pub fn any_view_mut(&mut self) -> Option<&mut dyn NativeView> {
        match &mut self.state {
            InitState::AwaitingEnvironment(v) | InitState::AwaitingController(v) => Some(v.view.as_mut()),
            InitState::AwaitingScriptInjection { view, .. } => Some(view.view.as_mut()),
            InitState::Ready(handle) => Some(handle.view_mut()),
            InitState::NotStarted | InitState::Failed { .. } => None,
        }
    }

    /// Leaves `NotStarted` by starting the environment step on `view`.
    pub fn start(&mut self, view: Box<dyn NativeView>, ctx: &InitContext) -> Transition {
        if !matches!(self.state, InitState::NotStarted) {
            log::warn!("Init: start requested in {:?}, ignored", self.phase());
            return Transition::Unchanged;
        }
        self.enter_environment(OwnedView::new(view), ctx)
    }

    /// Feeds the completion of `step` into the machine.
    pub fn complete(&mut self, step: InitStep, result: Result<(), String>, ctx: &InitContext) -> Transition {
        let state = std::mem::replace(&mut self.state, InitState::NotStarted);

        match (step, state) {
            (InitStep::Environment, InitState::AwaitingEnvironment(view)) => match result {
                Ok(()) => self.enter_controller(view, ctx),
                Err(reason) => self.fail(step, reason, view, CallbackTokens::default()),
            },
            (InitStep::Controller, InitState::AwaitingController(view)) => match result {
                Ok(()) => self.enter_bridge(view, ctx),
                Err(reason) => self.fail(step, reason, view, CallbackTokens::default()),
            },
            (InitStep::ScriptInjection, InitState::AwaitingScriptInjection { view, tokens }) => match result {
                Ok(()) => self.enter_ready(view, tokens),
                Err(reason) => self.fail(step, reason, view, tokens),
            },
            (step, state) => {
                log::debug!("Init: {:?} completion in {:?}, ignored", step, Self::phase_of(&state));
                self.state = state;
                Transition::Unchanged
            }
        }
    }

    /// Unsubscribes and releases whatever view is held and returns to `NotStarted`.
    pub fn teardown(&mut self) {
        match std::mem::replace(&mut self.state, InitState::NotStarted) {
            InitState::AwaitingEnvironment(mut view) | InitState::AwaitingController(mut view) => {
                view.teardown(CallbackTokens::default());
            }
            InitState::AwaitingScriptInjection { mut view, tokens } => view.teardown(tokens),
            InitState::Ready(mut handle) => handle.teardown(),
            InitState::NotStarted | InitState::Failed { .. } => {}
        }
    }

    fn enter_environment(&mut self, mut view: OwnedView, ctx: &InitContext) -> Transition {
        log::debug!("Init: requesting environment");
        match view.view.begin_environment(ctx.parent.as_ref(), &ctx.environment) {
            Ok(StepOutcome::Complete) => self.enter_controller(view, ctx),
            Ok(StepOutcome::Pending) => {
                self.state = InitState::AwaitingEnvironment(view);
                Transition::Advanced(InitPhase::AwaitingEnvironment)
            }
            Err(e) => self.fail(InitStep::Environment, e.to_string(), view, CallbackTokens::default()),
        }
    }

    fn enter_controller(&mut self, mut view: OwnedView, ctx: &InitContext) -> Transition {
        log::debug!("Init: environment ready, requesting controller");
        match view.view.begin_controller(ctx.bounds, ctx.visible) {
            Ok(StepOutcome::Complete) => self.enter_bridge(view, ctx),
            Ok(StepOutcome::Pending) => {
                self.state = InitState::AwaitingController(view);
                Transition::Advanced(InitPhase::AwaitingController)
            }
            Err(e) => self.fail(InitStep::Controller, e.to_string(), view, CallbackTokens::default()),
        }
    }

    fn enter_bridge(&mut self, mut view: OwnedView, ctx: &InitContext) -> Transition {
        log::debug!("Init: controller ready, installing bridge");
        let tokens = match view.view.install_bridge(ctx.interceptor.clone()) {
            Ok(tokens) => tokens,
            Err(e) => return self.fail(InitStep::Controller, e.to_string(), view, CallbackTokens::default()),
        };

        let scripts: Vec<String> = view
            .view
            .message_bridge_script()
            .map(str::to_string)
            .into_iter()
            .chain(ctx.user_scripts.iter().cloned())
            .collect();

        if scripts.is_empty() {
            return self.enter_ready(view, tokens);
        }

        match view.view.inject_scripts(&scripts) {
            Ok(StepOutcome::Complete) => self.enter_ready(view, tokens),
            Ok(StepOutcome::Pending) => {
                self.state = InitState::AwaitingScriptInjection { view, tokens };
                Transition::Advanced(InitPhase::AwaitingScriptInjection)
            }
            Err(e) => self.fail(InitStep::ScriptInjection, e.to_string(), view, tokens),
        }
    }

    fn enter_ready(&mut self, view: OwnedView, tokens: CallbackTokens) -> Transition {
        log::debug!("Init: ready with {} callback tokens", tokens.len());
        self.state = InitState::Ready(NativeViewHandle::new(view, tokens));
        Transition::Ready
    }

    fn fail(&mut self, step: InitStep, reason: String, mut view: OwnedView, tokens: CallbackTokens) -> Transition {
        log::error!("Init: {:?} step failed: {}", step, reason);
        view.teardown(tokens);
        self.state = InitState::Failed { step, reason };
        Transition::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::SchemeSet;
    use crate::engine::overlay::OverlayId;
    use crate::engine::registry::{CompletionSink, SlotRegistry};
    use crate::engine::resource::DirectoryFs;
    use crate::platform::backend::CallbackKind;
    use std::sync::Mutex;

    /// Records the calls made on it, in order.
    struct ScriptedView {
        log: Arc<Mutex<Vec<String>>>,
        outcome: StepOutcome,
        fail_controller: bool,
    }

    impl ScriptedView {
        fn record(&self, what: &str) {
            self.log.lock().unwrap().push(what.to_string());
        }
    }

    impl NativeView for ScriptedView {
        fn begin_environment(&mut self, _: Option<&ParentWindow>, _: &EnvironmentOptions) -> anyhow::Result<StepOutcome> {
            self.record("environment");
            Ok(self.outcome)
        }
        fn begin_controller(&mut self, _: Viewport, _: bool) -> anyhow::Result<StepOutcome> {
            self.record("controller");
            if self.fail_controller {
                anyhow::bail!("no controller");
            }
            Ok(self.outcome)
        }
        fn install_bridge(&mut self, _: Arc<ResourceInterceptor>) -> anyhow::Result<CallbackTokens> {
            self.record("bridge");
            let mut tokens = CallbackTokens::new();
            tokens.push(CallbackKind::NavigationStarting, 1);
            tokens.push(CallbackKind::ScriptMessage, 2);
            Ok(tokens)
        }
        fn message_bridge_script(&self) -> Option<&'static str> {
            Some("function webviewMessage(s){}")
        }
        fn inject_scripts(&mut self, scripts: &[String]) -> anyhow::Result<StepOutcome> {
            self.record(&format!("scripts:{}", scripts.len()));
            Ok(self.outcome)
        }
        fn navigate(&mut self, _: &str) -> anyhow::Result<()> { Ok(()) }
        fn load_html(&mut self, _: &str, _: &str) -> anyhow::Result<()> { Ok(()) }
        fn execute_script(&mut self, _: &str) -> anyhow::Result<()> { Ok(()) }
        fn url(&self) -> Option<String> { None }
        fn title(&self) -> Option<String> { None }
        fn zoom(&self) -> Option<f64> { None }
        fn set_zoom(&mut self, _: f64) -> anyhow::Result<()> { Ok(()) }
        fn set_user_agent(&mut self, _: &str) -> anyhow::Result<bool> { Ok(false) }
        fn set_transparent_background(&mut self, _: bool) -> anyhow::Result<bool> { Ok(false) }
        fn can_go_back(&self) -> bool { false }
        fn can_go_forward(&self) -> bool { false }
        fn go_back(&mut self) -> anyhow::Result<()> { Ok(()) }
        fn go_forward(&mut self) -> anyhow::Result<()> { Ok(()) }
        fn reload(&mut self) -> anyhow::Result<()> { Ok(()) }
        fn stop(&mut self) -> anyhow::Result<()> { Ok(()) }
        fn set_bounds(&mut self, _: Viewport) -> anyhow::Result<()> { Ok(()) }
        fn set_visible(&mut self, _: bool) -> anyhow::Result<()> { Ok(()) }
        fn capture_snapshot(&mut self, _: u32) -> anyhow::Result<()> { Ok(()) }
        fn unsubscribe(&mut self, tokens: CallbackTokens) {
            self.record(&format!("unsubscribe:{}", tokens.len()));
        }
        fn release(&mut self) {
            self.record("release");
        }
    }

    fn view(outcome: StepOutcome, fail_controller: bool) -> (Box<dyn NativeView>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let view = ScriptedView {
            log: log.clone(),
            outcome,
            fail_controller,
        };
        (Box::new(view), log)
    }

    fn interceptor() -> Arc<ResourceInterceptor> {
        let registry = Arc::new(SlotRegistry::new());
        let (key, _rx) = registry.occupy(OverlayId::new());
        let fs = Arc::new(DirectoryFs::new("res", "user"));
        Arc::new(ResourceInterceptor::new(
            SchemeSet::default(),
            fs,
            CompletionSink::new(key, registry),
        ))
    }

    fn options() -> EnvironmentOptions {
        EnvironmentOptions {
            cache_dir: std::env::temp_dir(),
            browser_dir: None,
            user_agent: None,
        }
    }

    #[test]
    fn synchronous_steps_reach_ready_in_one_call() {
        let (view, log) = view(StepOutcome::Complete, false);
        let ctx = InitContext {
            parent: None,
            environment: options(),
            bounds: Viewport::new(0, 0, 100, 100),
            visible: true,
            interceptor: interceptor(),
            user_scripts: vec!["extra();".to_string()],
        };

        let mut machine = InitMachine::default();
        assert_eq!(machine.start(view, &ctx), Transition::Ready);
        assert!(machine.is_ready());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["environment", "controller", "bridge", "scripts:2"]
        );
    }

    #[test]
    fn pending_steps_wait_for_their_own_completion() {
        let (view, log) = view(StepOutcome::Pending, false);
        let ctx = InitContext {
            parent: None,
            environment: options(),
            bounds: Viewport::default(),
            visible: true,
            interceptor: interceptor(),
            user_scripts: Vec::new(),
        };

        let mut machine = InitMachine::default();
        assert_eq!(machine.start(view, &ctx), Transition::Advanced(InitPhase::AwaitingEnvironment));

        // Out of order completions are ignored.
        assert_eq!(machine.complete(InitStep::Controller, Ok(()), &ctx), Transition::Unchanged);
        assert_eq!(machine.phase(), InitPhase::AwaitingEnvironment);

        assert_eq!(
            machine.complete(InitStep::Environment, Ok(()), &ctx),
            Transition::Advanced(InitPhase::AwaitingController)
        );
        assert_eq!(
            machine.complete(InitStep::Controller, Ok(()), &ctx),
            Transition::Advanced(InitPhase::AwaitingScriptInjection)
        );
        assert_eq!(machine.complete(InitStep::ScriptInjection, Ok(()), &ctx), Transition::Ready);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["environment", "controller", "bridge", "scripts:1"]
        );
    }

    #[test]
    fn failure_releases_view_and_is_absorbing() {
        let (view, log) = view(StepOutcome::Complete, true);
        let ctx = InitContext {
            parent: None,
            environment: options(),
            bounds: Viewport::default(),
            visible: true,
            interceptor: interceptor(),
            user_scripts: Vec::new(),
        };

        let mut machine = InitMachine::default();
        assert_eq!(machine.start(view, &ctx), Transition::Failed);
        assert_eq!(machine.failure(), Some((InitStep::Controller, "no controller")));
        assert_eq!(*log.lock().unwrap(), vec!["environment", "controller", "release"]);

        assert_eq!(machine.complete(InitStep::Controller, Ok(()), &ctx), Transition::Unchanged);
        assert_eq!(machine.phase(), InitPhase::Failed);
    }

    #[test]
    fn teardown_unsubscribes_before_release() {
        let (view, log) = view(StepOutcome::Complete, false);
        let ctx = InitContext {
            parent: None,
            environment: options(),
            bounds: Viewport::default(),
            visible: true,
            interceptor: interceptor(),
            user_scripts: Vec::new(),
        };

        let mut machine = InitMachine::default();
        machine.start(view, &ctx);
        machine.teardown();
        assert_eq!(machine.phase(), InitPhase::NotStarted);

        let log = log.lock().unwrap();
        assert_eq!(&log[log.len() - 2..], &["unsubscribe:2", "release"]);

        // A late completion after teardown changes nothing.
        drop(log);
        assert_eq!(machine.complete(InitStep::Environment, Ok(()), &ctx), Transition::Unchanged);
        assert_eq!(machine.phase(), InitPhase::NotStarted);
    }

    #[test]
    fn teardown_mid_init_releases_once() {
        let (view, log) = view(StepOutcome::Pending, false);
        let ctx = InitContext {
            parent: None,
            environment: options(),
            bounds: Viewport::default(),
            visible: true,
            interceptor: interceptor(),
            user_scripts: Vec::new(),
        };

        let mut machine = InitMachine::default();
        machine.start(view, &ctx);
        machine.teardown();
        machine.teardown();

        let releases = log.lock().unwrap().iter().filter(|l| *l == "release").count();
        assert_eq!(releases, 1);
    }
}
