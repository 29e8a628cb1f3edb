//! Event bridge: native callbacks in, host notifications out.
//!
//! Besides the mapping itself the bridge keeps the two bits of navigation state that not
//! every engine can be asked for: whether a load is in progress and whether the current
//! page is served securely.

use url::Url;

use crate::engine::events::{NativeEvent, OverlayEvent};

#[derive(Debug, Clone)]
pub struct EventBridge {
    loading: bool,
    secure: bool,
}

impl Default for EventBridge {
    fn default() -> Self {
        Self {
            loading: false,
            secure: true,
        }
    }
}

impl EventBridge {
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Maps one native event to at most one host notification.
    pub fn translate(&mut self, event: NativeEvent) -> Option<OverlayEvent> {
        match event {
            NativeEvent::NavigationStarting { url } => {
                self.loading = true;
                self.secure = url.as_deref().map(is_secure_url).unwrap_or(true);
                Some(OverlayEvent::StartNavigation)
            }
            NativeEvent::NavigationCompleted { success } => {
                if !self.loading {
                    log::debug!("Navigation completed without a start, ignored");
                    return None;
                }
                self.loading = false;
                if !success {
                    log::warn!("Navigation did not complete successfully");
                }
                Some(OverlayEvent::FinishNavigation)
            }
            NativeEvent::LoadRedirected | NativeEvent::LoadCommitted => None,
            NativeEvent::NewWindowRequested { url } => Some(OverlayEvent::NewWindow { url }),
            NativeEvent::ScriptMessage { body } => Some(OverlayEvent::Callback { payload: body }),
            NativeEvent::SchemeCallback { uri } => Some(OverlayEvent::Callback { payload: uri }),
            NativeEvent::InsecureContent => {
                self.secure = false;
                None
            }
        }
    }
}

/// Pages from local custom schemes and `about:` count as secure; remote pages must be
/// HTTPS.
fn is_secure_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(url) => !matches!(url.scheme(), "http" | "ws" | "ftp"),
        Err(_) => true,
    }
}
