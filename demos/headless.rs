use std::sync::Arc;

use webview_overlay::platform::backends::null::NullBackend;
use webview_overlay::platform::Viewport;
use webview_overlay::{Host, HostNotification, NativeEvent, Overlay, OverlayConfig, OverlayError, OverlayEvent, ParentWindow};

/// A host without a window, as a headless test harness would provide.
struct HeadlessHost {
    rect: Viewport,
}

impl Host for HeadlessHost {
    fn is_editor_hint(&self) -> bool {
        false
    }

    fn is_visible_in_tree(&self) -> bool {
        true
    }

    fn window_rect(&self) -> Viewport {
        self.rect
    }

    fn parent_window(&self) -> Option<ParentWindow> {
        None
    }
}

fn main() -> Result<(), OverlayError> {
    env_logger::init();

    // Configure the overlay through the config builder. Everything set here can be changed
    // later through the overlay's property setters.
    let config = OverlayConfig::builder()
        .home_url("https://example.org")
        .zoom(1.25)
        .user_script("console.log('injected at document start')")
        .build()?;

    // The null backend simulates a web engine, so this runs anywhere. Swap in
    // `Overlay::with_platform_backend(config)` to get the real engine of this platform.
    let backend = NullBackend::new();
    let engine = backend.engine();
    let mut overlay = Overlay::new(config, Arc::new(backend))?;

    // Only events sent after subscribing are received.
    let mut events = overlay.subscribe_events();

    let host = HeadlessHost {
        rect: Viewport::new(0, 0, 800, 600),
    };
    overlay.notification(HostNotification::EnterTree, &host);

    // Drive the overlay like a frame loop would.
    for frame in 0..8 {
        overlay.notification(HostNotification::Process, &host);

        if frame == 4 {
            // Pretend page script called webviewMessage("ready").
            engine.emit(NativeEvent::ScriptMessage { body: "ready".into() });
            overlay.capture_snapshot(0)?;
        }

        while let Ok(event) = events.try_recv() {
            match &event {
                OverlayEvent::SnapshotReady { image } => {
                    println!("snapshot: {}x{}", image.width, image.height);
                }
                other => println!("event: {}", other),
            }
        }
    }

    println!("url: {}  zoom: {}  loading: {}", overlay.url(), overlay.zoom_level(), overlay.is_loading());

    overlay.notification(HostNotification::ExitTree, &host);
    println!("live views after exit: {}", engine.live_views());
    Ok(())
}
