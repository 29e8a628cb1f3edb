use std::sync::Arc;

use tokio::sync::broadcast;
use webview_overlay::engine::init::{InitPhase, InitStep};
use webview_overlay::engine::registry::SlotRegistry;
use webview_overlay::platform::backends::null::{Completion, NullBackend, NullEngine, ViewCall};
use webview_overlay::platform::Viewport;
use webview_overlay::{
    DirectoryFs, ErrorStatus, Host, HostNotification, NativeEvent, Overlay, OverlayConfig, OverlayError,
    OverlayEvent, Panel, ParentWindow,
};

struct TestHost {
    editor: bool,
    visible: bool,
    rect: Viewport,
    scale: f32,
}

impl Default for TestHost {
    fn default() -> Self {
        Self {
            editor: false,
            visible: true,
            rect: Viewport::new(10, 20, 320, 240),
            scale: 1.0,
        }
    }
}

impl Host for TestHost {
    fn is_editor_hint(&self) -> bool {
        self.editor
    }

    fn is_visible_in_tree(&self) -> bool {
        self.visible
    }

    fn window_rect(&self) -> Viewport {
        self.rect
    }

    fn screen_scale(&self) -> f32 {
        self.scale
    }

    fn parent_window(&self) -> Option<ParentWindow> {
        None
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(home: &str, cache: &tempfile::TempDir) -> OverlayConfig {
    OverlayConfig::builder()
        .home_url(home)
        .cache_dir(cache.path())
        .build()
        .expect("valid config")
}

fn overlay_with(backend: NullBackend, home: &str, cache: &tempfile::TempDir) -> (Overlay, NullEngine) {
    let engine = backend.engine();
    let overlay = Overlay::new(config(home, cache), Arc::new(backend))
        .expect("overlay")
        .with_registry(Arc::new(SlotRegistry::new()));
    (overlay, engine)
}

fn tick(overlay: &mut Overlay, host: &TestHost, times: usize) {
    for _ in 0..times {
        overlay.notification(HostNotification::Process, host);
    }
}

fn run_until_ready(overlay: &mut Overlay, host: &TestHost) {
    for _ in 0..10 {
        if overlay.is_ready() {
            return;
        }
        tick(overlay, host, 1);
    }
    panic!("overlay never became ready: {:?}", overlay.phase());
}

fn events(rx: &mut broadcast::Receiver<OverlayEvent>) -> Vec<OverlayEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[test]
fn commands_fail_closed_before_ready() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let (mut overlay, engine) = overlay_with(NullBackend::new(), "https://start.test", &cache);

    assert!(matches!(overlay.load_string("<p>hi</p>", ""), Err(OverlayError::NotReady)));
    assert!(matches!(overlay.execute_script("1+1"), Err(OverlayError::NotReady)));
    assert!(matches!(overlay.capture_snapshot(0), Err(OverlayError::NotReady)));
    assert_eq!(overlay.title(), "");
    assert!(!overlay.can_go_back());
    assert!(!overlay.can_go_forward());
    assert!(!overlay.is_loading());
    assert!(!overlay.is_secure_content());

    overlay.go_back();
    overlay.go_forward();
    overlay.reload();
    overlay.stop();

    assert_eq!(engine.created_views(), 0);
    assert!(engine.scripts().is_empty());
}

#[test]
fn properties_are_cached_before_ready() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let (mut overlay, _engine) = overlay_with(NullBackend::new(), "https://start.test", &cache);

    assert_eq!(overlay.url(), "https://start.test");
    overlay.set_url("https://other.test/page");
    assert_eq!(overlay.url(), "https://other.test/page");

    overlay.set_zoom_level(2.0);
    assert_eq!(overlay.zoom_level(), 2.0);
    overlay.set_zoom_level(12.0);
    assert_eq!(overlay.zoom_level(), 5.0);

    overlay.set_user_agent("Overlay/1.0");
    assert_eq!(overlay.user_agent(), "Overlay/1.0");

    overlay.set_no_background(true);
    assert!(overlay.no_background());
}

#[test]
fn deferred_init_navigates_home_once() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let (mut overlay, engine) = overlay_with(NullBackend::new(), "https://start.test", &cache);
    let mut rx = overlay.subscribe_events();
    let host = TestHost::default();

    overlay.notification(HostNotification::EnterTree, &host);
    tick(&mut overlay, &host, 1);
    assert_ne!(overlay.phase(), InitPhase::NotStarted);
    assert!(!overlay.is_ready());

    run_until_ready(&mut overlay, &host);
    assert_eq!(overlay.status(), ErrorStatus::Ready);
    assert_eq!(overlay.draw(&host), None);
    tick(&mut overlay, &host, 3);

    let seen = events(&mut rx);
    assert_eq!(seen, vec![OverlayEvent::StartNavigation, OverlayEvent::FinishNavigation]);
    assert_eq!(engine.navigations(), vec!["https://start.test".to_string()]);
    assert_eq!(overlay.url(), "https://start.test");
    assert!(overlay.is_secure_content());
    assert!(!overlay.is_loading());

    let injected = engine.injected_scripts();
    assert!(injected[0].starts_with("function webviewMessage"));
}

#[test]
fn immediate_init_is_ready_after_one_tick() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let backend = NullBackend::new().with_completion(Completion::Immediate);
    let (mut overlay, engine) = overlay_with(backend, "https://start.test", &cache);
    let host = TestHost::default();

    overlay.notification(HostNotification::EnterTree, &host);
    tick(&mut overlay, &host, 1);
    assert!(overlay.is_ready());
    assert_eq!(engine.live_views(), 1);
}

#[test]
fn one_view_per_tree_entry() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let (mut overlay, engine) = overlay_with(NullBackend::new(), "https://start.test", &cache);
    let host = TestHost::default();

    overlay.notification(HostNotification::EnterTree, &host);
    run_until_ready(&mut overlay, &host);
    tick(&mut overlay, &host, 20);
    assert_eq!(engine.created_views(), 1);
    assert_eq!(engine.live_views(), 1);

    overlay.notification(HostNotification::ExitTree, &host);
    assert_eq!(engine.live_views(), 0);
    assert!(!overlay.is_ready());
    assert_eq!(overlay.status(), ErrorStatus::Uninitialized);

    overlay.notification(HostNotification::EnterTree, &host);
    run_until_ready(&mut overlay, &host);
    assert_eq!(engine.created_views(), 2);
    assert_eq!(engine.live_views(), 1);
}

#[test]
fn callbacks_after_exit_are_dropped() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let (mut overlay, engine) = overlay_with(NullBackend::new(), "https://start.test", &cache);
    let mut rx = overlay.subscribe_events();
    let host = TestHost::default();

    overlay.notification(HostNotification::EnterTree, &host);
    run_until_ready(&mut overlay, &host);
    overlay.notification(HostNotification::ExitTree, &host);
    events(&mut rx);

    let accepted = engine.emit(NativeEvent::ScriptMessage { body: "late".into() });
    assert_eq!(accepted, 0);
    tick(&mut overlay, &host, 2);
    assert!(events(&mut rx).is_empty());
}

#[test]
fn dropping_mid_init_releases_the_view() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let (mut overlay, engine) = overlay_with(NullBackend::new(), "https://start.test", &cache);
    let host = TestHost::default();

    overlay.notification(HostNotification::EnterTree, &host);
    tick(&mut overlay, &host, 1);
    assert_eq!(engine.live_views(), 1);

    drop(overlay);
    assert_eq!(engine.live_views(), 0);
    assert_eq!(engine.emit(NativeEvent::InsecureContent), 0);
}

#[test]
fn capability_failure_shows_panel() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let backend = NullBackend::new().with_status(ErrorStatus::LibraryLoadFailed {
        library: "libwebkit2gtk-4.0.so".into(),
    });
    let (mut overlay, engine) = overlay_with(backend, "https://start.test", &cache);
    let host = TestHost::default();

    overlay.notification(HostNotification::EnterTree, &host);
    tick(&mut overlay, &host, 5);

    assert_eq!(engine.created_views(), 0);
    assert_eq!(overlay.status().code(), 1);
    assert_eq!(
        overlay.draw(&host),
        Some(Panel::Error("Failed to load 'libwebkit2gtk-4.0.so' library.".into()))
    );
    assert!(matches!(
        overlay.load_string("<p/>", ""),
        Err(OverlayError::Capability(ErrorStatus::LibraryLoadFailed { .. }))
    ));
}

#[test]
fn control_error_is_sticky() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let backend = NullBackend::new().failing_at(InitStep::Controller);
    let (mut overlay, engine) = overlay_with(backend, "https://start.test", &cache);
    let host = TestHost::default();

    overlay.notification(HostNotification::EnterTree, &host);
    tick(&mut overlay, &host, 5);

    assert_eq!(overlay.phase(), InitPhase::Failed);
    assert_eq!(overlay.status(), ErrorStatus::ControlError);
    assert_eq!(engine.live_views(), 0);
    assert_eq!(overlay.draw(&host), Some(Panel::Error("Unknown control error.".into())));
    assert!(engine.navigations().is_empty());

    overlay.notification(HostNotification::ExitTree, &host);
    overlay.notification(HostNotification::EnterTree, &host);
    tick(&mut overlay, &host, 5);
    assert_eq!(engine.created_views(), 1);
    assert_eq!(overlay.status(), ErrorStatus::ControlError);
}

#[test]
fn editor_shows_placeholder_without_a_view() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let (mut overlay, engine) = overlay_with(NullBackend::new(), "https://start.test", &cache);
    let host = TestHost {
        editor: true,
        ..TestHost::default()
    };

    overlay.notification(HostNotification::EnterTree, &host);
    tick(&mut overlay, &host, 5);

    assert_eq!(engine.created_views(), 0);
    assert_eq!(
        overlay.draw(&host),
        Some(Panel::Placeholder {
            url: "https://start.test".into()
        })
    );
}

#[test]
fn script_messages_and_callback_scheme_reach_the_host() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let (mut overlay, engine) = overlay_with(NullBackend::new(), "https://start.test", &cache);
    let host = TestHost::default();
    overlay.notification(HostNotification::EnterTree, &host);
    run_until_ready(&mut overlay, &host);
    tick(&mut overlay, &host, 2);
    let mut rx = overlay.subscribe_events();

    assert_eq!(engine.emit(NativeEvent::ScriptMessage { body: "hello".into() }), 1);
    let response = engine.request("callback://ping?x=1").expect("bridge installed");
    assert_eq!(response.status(), http::StatusCode::OK);
    assert!(response.body().is_empty());
    tick(&mut overlay, &host, 1);

    assert_eq!(
        events(&mut rx),
        vec![
            OverlayEvent::Callback {
                payload: "hello".into()
            },
            OverlayEvent::Callback {
                payload: "callback://ping?x=1".into()
            },
        ]
    );
}

#[test]
fn new_window_requests_are_reported() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let (mut overlay, engine) = overlay_with(NullBackend::new(), "https://start.test", &cache);
    let host = TestHost::default();
    overlay.notification(HostNotification::EnterTree, &host);
    run_until_ready(&mut overlay, &host);
    tick(&mut overlay, &host, 2);
    let mut rx = overlay.subscribe_events();

    engine.emit(NativeEvent::NewWindowRequested {
        url: "https://popup.test".into(),
    });
    tick(&mut overlay, &host, 1);

    assert_eq!(
        events(&mut rx),
        vec![OverlayEvent::NewWindow {
            url: "https://popup.test".into()
        }]
    );
}

#[test]
fn snapshot_arrives_as_rgba() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let (mut overlay, _engine) = overlay_with(NullBackend::new(), "https://start.test", &cache);
    let host = TestHost::default();
    overlay.notification(HostNotification::EnterTree, &host);
    run_until_ready(&mut overlay, &host);
    tick(&mut overlay, &host, 2);
    let mut rx = overlay.subscribe_events();

    overlay.capture_snapshot(0).unwrap();
    assert!(matches!(overlay.capture_snapshot(0), Err(OverlayError::SnapshotInFlight)));
    tick(&mut overlay, &host, 1);

    let seen = events(&mut rx);
    assert_eq!(seen.len(), 1);
    match &seen[0] {
        OverlayEvent::SnapshotReady { image } => {
            assert_eq!((image.width, image.height), (320, 240));
            assert_eq!(image.pixel(0, 0), Some([255, 255, 255, 255]));
        }
        other => panic!("unexpected event {:?}", other),
    }

    overlay.capture_snapshot(0).unwrap();
}

#[test]
fn resource_scheme_serves_files() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("index.html"), "<h1>menu</h1>").unwrap();

    let backend = NullBackend::new();
    let engine = backend.engine();
    let mut overlay = Overlay::new(config("res://index.html", &cache), Arc::new(backend))
        .unwrap()
        .with_registry(Arc::new(SlotRegistry::new()))
        .with_resource_fs(Arc::new(DirectoryFs::new(root.path(), root.path().join("user"))));
    let host = TestHost::default();
    overlay.notification(HostNotification::EnterTree, &host);
    run_until_ready(&mut overlay, &host);

    let found = engine.request("res://index.html").unwrap();
    assert_eq!(found.status(), http::StatusCode::OK);
    assert_eq!(found.body().as_slice(), b"<h1>menu</h1>");
    assert_eq!(found.headers()[http::header::CONTENT_TYPE], "text/html");

    let missing = engine.request("res://nope.html").unwrap();
    assert_eq!(missing.status(), http::StatusCode::NOT_FOUND);
    assert!(missing.body().is_empty());
}

#[test]
fn commands_reach_the_ready_view() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let (mut overlay, engine) = overlay_with(NullBackend::new(), "https://start.test", &cache);
    let host = TestHost::default();
    overlay.notification(HostNotification::EnterTree, &host);
    run_until_ready(&mut overlay, &host);
    tick(&mut overlay, &host, 2);

    overlay.execute_script("document.title").unwrap();
    assert_eq!(engine.scripts(), vec!["document.title".to_string()]);

    overlay.load_string("<title>Menu</title>", "res://ui/").unwrap();
    tick(&mut overlay, &host, 1);
    assert_eq!(overlay.title(), "Menu");
    assert!(overlay.can_go_back());

    overlay.go_back();
    tick(&mut overlay, &host, 1);
    assert_eq!(overlay.url(), "https://start.test");
    assert!(overlay.can_go_forward());

    overlay.set_zoom_level(1.5);
    assert_eq!(overlay.zoom_level(), 1.5);
}

#[test]
fn pending_state_is_applied_in_order_on_ready() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let (mut overlay, engine) = overlay_with(NullBackend::new(), "https://start.test", &cache);
    let host = TestHost {
        scale: 2.0,
        ..TestHost::default()
    };

    overlay.set_zoom_level(2.0);
    overlay.set_url("https://home.test");
    overlay.notification(HostNotification::EnterTree, &host);

    for _ in 0..10 {
        if overlay.is_ready() {
            break;
        }
        assert!(engine.applied_calls().is_empty(), "applied before ready: {:?}", engine.applied_calls());
        tick(&mut overlay, &host, 1);
    }
    assert!(overlay.is_ready(), "stuck in {:?}", overlay.phase());

    assert_eq!(
        engine.applied_calls(),
        vec![
            ViewCall::Bounds(Viewport::new(5, 10, 160, 120)),
            ViewCall::Zoom(2.0),
            ViewCall::Visible(true),
            ViewCall::Navigate("https://home.test".into()),
        ]
    );
}

#[test]
fn setters_after_ready_reach_the_view_immediately() {
    init_logger();
    let cache = tempfile::tempdir().unwrap();
    let backend = NullBackend::new().with_completion(Completion::Immediate);
    let (mut overlay, engine) = overlay_with(backend, "https://start.test", &cache);
    let mut host = TestHost::default();

    overlay.notification(HostNotification::EnterTree, &host);
    run_until_ready(&mut overlay, &host);
    let applied_on_ready = engine.applied_calls().len();

    overlay.set_zoom_level(3.0);
    overlay.set_url("https://next.test");
    host.rect = Viewport::new(0, 0, 640, 480);
    overlay.notification(HostNotification::Resized, &host);
    host.visible = false;
    overlay.notification(HostNotification::VisibilityChanged, &host);

    assert_eq!(
        engine.applied_calls()[applied_on_ready..],
        [
            ViewCall::Zoom(3.0),
            ViewCall::Navigate("https://next.test".into()),
            ViewCall::Bounds(Viewport::new(0, 0, 640, 480)),
            ViewCall::Visible(false),
        ]
    );
    assert_eq!(overlay.zoom_level(), 3.0);
}
