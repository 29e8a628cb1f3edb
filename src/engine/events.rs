//! Overlay event types.
//!
//! Two directions meet here:
//!
//! - [`BackendMessage`]: what native completion callbacks post into an overlay's slot.
//!   Every payload is plain owned data so a message can cross from the engine's execution
//!   context into the host tick.
//! - [`OverlayEvent`]: the fixed set of notifications the overlay broadcasts to the host.

use std::fmt::Display;

use crate::engine::snapshot::RawCapture;
use crate::platform::RgbaImage;

/// Native engine callbacks after the backend has stripped them of native types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEvent {
    /// A main-frame navigation started. `url` is the target when the engine reports it.
    NavigationStarting { url: Option<String> },
    /// A main-frame navigation finished, successfully or not.
    NavigationCompleted { success: bool },
    LoadRedirected,
    LoadCommitted,
    /// The page asked for a new window. The backend has already denied it.
    NewWindowRequested { url: String },
    /// `webviewMessage(s)` was called from page script.
    ScriptMessage { body: String },
    /// The page loaded resources over an insecure transport.
    InsecureContent,
    /// A request hit the callback scheme.
    SchemeCallback { uri: String },
}

/// Message posted by a native completion into an overlay slot.
#[derive(Debug)]
pub enum BackendMessage {
    EnvironmentCreated(Result<(), String>),
    ControllerCreated(Result<(), String>),
    ScriptsInjected(Result<(), String>),
    Native(NativeEvent),
    SnapshotCaptured(Result<RawCapture, String>),
}

/// Notifications the overlay sends to the host.
#[derive(Clone, Debug, PartialEq)]
pub enum OverlayEvent {
    /// Script message or callback-scheme request. `payload` is the message text or the
    /// full request URI.
    Callback { payload: String },
    StartNavigation,
    FinishNavigation,
    NewWindow { url: String },
    SnapshotReady { image: RgbaImage },
    SnapshotFailed { reason: String },
}

impl OverlayEvent {
    /// Host-facing notification name.
    pub fn name(&self) -> &'static str {
        match self {
            OverlayEvent::Callback { .. } => "callback",
            OverlayEvent::StartNavigation => "start_navigation",
            OverlayEvent::FinishNavigation => "finish_navigation",
            OverlayEvent::NewWindow { .. } => "new_window",
            OverlayEvent::SnapshotReady { .. } => "snapshot_ready",
            OverlayEvent::SnapshotFailed { .. } => "snapshot_failed",
        }
    }

    /// Parses a callback payload as JSON. Returns `None` for any other event or when
    /// the payload is not JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        match self {
            OverlayEvent::Callback { payload } => serde_json::from_str(payload).ok(),
            _ => None,
        }
    }
}

impl Display for OverlayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlayEvent::Callback { payload } => write!(f, "callback({})", payload),
            OverlayEvent::NewWindow { url } => write!(f, "new_window({})", url),
            OverlayEvent::SnapshotReady { image } => {
                write!(f, "snapshot_ready({}x{})", image.width, image.height)
            }
            OverlayEvent::SnapshotFailed { reason } => write!(f, "snapshot_failed({})", reason),
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_payload_as_json() {
        let ev = OverlayEvent::Callback {
            payload: r#"{"cmd":"open","id":3}"#.into(),
        };
        let json = ev.json().unwrap();
        assert_eq!(json["cmd"], "open");
        assert_eq!(json["id"], 3);

        let ev = OverlayEvent::Callback {
            payload: "callback://ping".into(),
        };
        assert!(ev.json().is_none());
        assert!(OverlayEvent::StartNavigation.json().is_none());
    }

    #[test]
    fn display_uses_notification_names() {
        assert_eq!(OverlayEvent::FinishNavigation.to_string(), "finish_navigation");
        let ev = OverlayEvent::NewWindow {
            url: "https://popup.test".into(),
        };
        assert_eq!(ev.to_string(), "new_window(https://popup.test)");
    }
}
