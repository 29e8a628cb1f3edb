use std::fmt;

use crate::engine::config::OverlayConfigError;

/// Capability status of a native backend, or control status of one overlay.
///
/// The `Display` text is what the host shows in the error panel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ErrorStatus {
    /// No probe has run yet.
    #[default]
    Uninitialized,
    /// A required shared library could not be loaded.
    LibraryLoadFailed { library: String },
    /// A library was loaded but one of its entry points is missing.
    EntryPointMissing { library: String, symbol: String },
    /// This platform has no web view backend.
    Unsupported,
    /// Native control creation failed for a specific overlay.
    ControlError,
    Ready,
}

impl ErrorStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ErrorStatus::Ready)
    }

    /// Numeric status, as reported to hosts that only deal in integers.
    pub fn code(&self) -> i32 {
        match self {
            ErrorStatus::Ready => 0,
            ErrorStatus::Uninitialized => -1,
            ErrorStatus::LibraryLoadFailed { .. } => 1,
            ErrorStatus::EntryPointMissing { .. } => 2,
            ErrorStatus::ControlError => 3,
            ErrorStatus::Unsupported => 4,
        }
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorStatus::Uninitialized => write!(f, "WebView interface not initialized."),
            ErrorStatus::LibraryLoadFailed { library } => {
                write!(f, "Failed to load '{}' library.", library)
            }
            ErrorStatus::EntryPointMissing { library, symbol } => {
                write!(f, "'{}' functions not found ({}).", library, symbol)
            }
            ErrorStatus::Unsupported => write!(f, "Not supported!"),
            ErrorStatus::ControlError => write!(f, "Unknown control error."),
            ErrorStatus::Ready => write!(f, "Ready."),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("Web view is not ready")]
    NotReady,

    #[error("A snapshot capture is already in flight")]
    SnapshotInFlight,

    #[error("Web view capability unavailable: {0}")]
    Capability(ErrorStatus),

    #[error("Invalid overlay configuration: {0}")]
    Config(#[from] OverlayConfigError),

    #[error("Native backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_text_names_the_library() {
        let status = ErrorStatus::LibraryLoadFailed {
            library: "WebView2Loader.dll".into(),
        };
        assert_eq!(status.to_string(), "Failed to load 'WebView2Loader.dll' library.");
        assert_eq!(status.code(), 1);

        let status = ErrorStatus::EntryPointMissing {
            library: "libwebkit2gtk-4.0.so".into(),
            symbol: "webkit_web_view_new".into(),
        };
        assert!(status.to_string().starts_with("'libwebkit2gtk-4.0.so' functions not found"));
    }

    #[test]
    fn default_is_uninitialized() {
        let status = ErrorStatus::default();
        assert_eq!(status.code(), -1);
        assert!(!status.is_ready());
        assert!(ErrorStatus::Ready.is_ready());
    }
}
