//! What the overlay needs from its host.
//!
//! The host owns the widget tree and the window. It tells the overlay about lifecycle
//! changes through [`HostNotification`]s and answers geometry and window queries through
//! the [`Host`] trait. When the overlay has nothing live to show, [`Panel`] tells the host
//! what to draw instead.

use std::path::PathBuf;

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::platform::Viewport;

/// Native window the web view is parented to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentWindow {
    pub window: RawWindowHandle,
    pub display: RawDisplayHandle,
}

pub trait Host {
    /// True while the host runs in design/editing mode; no native view is created then.
    fn is_editor_hint(&self) -> bool;

    fn is_visible_in_tree(&self) -> bool;

    /// Overlay rectangle in physical window pixels.
    fn window_rect(&self) -> Viewport;

    fn screen_scale(&self) -> f32 {
        1.0
    }

    /// `None` until the host window exists.
    fn parent_window(&self) -> Option<ParentWindow>;

    /// Directory the host executable lives in. Backends look for a bundled browser
    /// runtime there.
    fn executable_dir(&self) -> Option<PathBuf> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostNotification {
    EnterTree,
    ExitTree,
    /// Per-frame tick.
    Process,
    Resized,
    MovedInParent,
    VisibilityChanged,
}

/// Replacement content for a control without a live view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Panel {
    Error(String),
    Placeholder { url: String },
}
