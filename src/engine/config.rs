//! Overlay configuration.
//!
//! `OverlayConfig` carries the per-instance defaults an [`Overlay`](crate::Overlay) starts
//! with: the home URL it navigates to once ready, the cached view properties, the engine
//! profile directory, and the custom URI schemes the resource interceptor answers for.
//!
//! # Examples
//!
//! ```rust
//! use webview_overlay::OverlayConfig;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = OverlayConfig::builder()
//!     .home_url("res://ui/index.html")
//!     .zoom(1.5)
//!     .no_background(true)
//!     .user_script("window.hostReady = true;")
//!     .build()?;
//! assert_eq!(cfg.schemes.resource, "res");
//! # Ok(()) }
//! ```
//!
//! # Errors
//!
//! Builder validation returns [`OverlayConfigError`] when the zoom factor is outside
//! `0.25..=5.0`, a scheme name is empty, not lowercase ASCII or duplicated, or the event
//! channel capacity is zero.

use std::fmt;
use std::path::PathBuf;

use crate::engine::DEFAULT_CHANNEL_CAPACITY;

pub const DEFAULT_HOME_URL: &str = "about:blank";

/// Which of the intercepted schemes a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeKind {
    /// Serves bytes from the host's resource tree.
    Resource,
    /// Serves bytes from the host's user-data tree.
    UserData,
    /// Turns the request into a `callback` notification.
    Callback,
}

/// Names of the three custom URI schemes routed to the resource interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeSet {
    pub resource: String,
    pub user_data: String,
    pub callback: String,
}

impl Default for SchemeSet {
    fn default() -> Self {
        Self {
            resource: "res".to_string(),
            user_data: "user".to_string(),
            callback: "callback".to_string(),
        }
    }
}

impl SchemeSet {
    /// Classifies a scheme name. Comparison is case-insensitive, URI schemes are.
    pub fn classify(&self, scheme: &str) -> Option<SchemeKind> {
        if scheme.eq_ignore_ascii_case(&self.resource) {
            Some(SchemeKind::Resource)
        } else if scheme.eq_ignore_ascii_case(&self.user_data) {
            Some(SchemeKind::UserData)
        } else if scheme.eq_ignore_ascii_case(&self.callback) {
            Some(SchemeKind::Callback)
        } else {
            None
        }
    }

    pub fn names(&self) -> [&str; 3] {
        [&self.resource, &self.user_data, &self.callback]
    }
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub home_url: String,
    pub user_agent: Option<String>,
    pub zoom: f64,
    pub no_background: bool,
    pub cache_dir: PathBuf,
    pub schemes: SchemeSet,
    pub user_scripts: Vec<String>,
    pub event_capacity: usize,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            home_url: DEFAULT_HOME_URL.to_string(),
            user_agent: None,
            zoom: 1.0,
            no_background: false,
            cache_dir: std::env::temp_dir().join("webview-overlay"),
            schemes: SchemeSet::default(),
            user_scripts: Vec::new(),
            event_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl OverlayConfig {
    pub fn builder() -> OverlayConfigBuilder {
        OverlayConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), OverlayConfigError> {
        validate(self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverlayConfigBuilder {
    inner: OverlayConfig,
}

impl OverlayConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut OverlayConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn home_url<S: Into<String>>(self, url: S) -> Self { self.map(|c| c.home_url = url.into()) }
    pub fn user_agent<S: Into<String>>(self, ua: S) -> Self { self.map(|c| c.user_agent = Some(ua.into())) }
    pub fn zoom(self, zoom: f64) -> Self { self.map(|c| c.zoom = zoom) }
    pub fn no_background(self, on: bool) -> Self { self.map(|c| c.no_background = on) }
    pub fn cache_dir<P: Into<PathBuf>>(self, dir: P) -> Self { self.map(|c| c.cache_dir = dir.into()) }
    pub fn schemes(self, schemes: SchemeSet) -> Self { self.map(|c| c.schemes = schemes) }
    pub fn user_script<S: Into<String>>(self, script: S) -> Self { self.map(|c| c.user_scripts.push(script.into())) }
    pub fn event_capacity(self, n: usize) -> Self { self.map(|c| c.event_capacity = n) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut OverlayConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<OverlayConfig, OverlayConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayConfigError {
    InvalidZoom(f64),
    InvalidScheme(String),
    DuplicateScheme(String),
    ZeroCapacity,
}

impl fmt::Display for OverlayConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayConfigError::InvalidZoom(z) =>
                write!(f, "zoom {z} is out of range (expected 0.25..=5.0)"),
            OverlayConfigError::InvalidScheme(s) =>
                write!(f, "scheme name '{s}' must be non-empty lowercase ascii"),
            OverlayConfigError::DuplicateScheme(s) =>
                write!(f, "scheme name '{s}' is used more than once"),
            OverlayConfigError::ZeroCapacity =>
                write!(f, "event_capacity must be at least 1"),
        }
    }
}
impl std::error::Error for OverlayConfigError {}

pub(crate) fn valid_zoom(zoom: f64) -> bool {
    (0.25..=5.0).contains(&zoom)
}

fn valid_scheme(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '.'))
}

fn validate(c: &OverlayConfig) -> Result<(), OverlayConfigError> {
    if !valid_zoom(c.zoom) {
        return Err(OverlayConfigError::InvalidZoom(c.zoom));
    }

    let names = c.schemes.names();
    for (i, name) in names.iter().enumerate() {
        if !valid_scheme(name) {
            return Err(OverlayConfigError::InvalidScheme(name.to_string()));
        }
        if names[..i].contains(name) {
            return Err(OverlayConfigError::DuplicateScheme(name.to_string()));
        }
    }

    if c.event_capacity == 0 {
        return Err(OverlayConfigError::ZeroCapacity);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = OverlayConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.schemes.names(), ["res", "user", "callback"]);
        assert!(cfg.cache_dir.ends_with("webview-overlay"));
        assert_eq!(cfg.home_url, "about:blank");
    }

    #[test]
    fn zoom_out_of_range_is_rejected() {
        let err = OverlayConfig::builder().zoom(6.0).build().unwrap_err();
        assert_eq!(err, OverlayConfigError::InvalidZoom(6.0));
    }

    #[test]
    fn scheme_names_must_be_distinct_and_lowercase() {
        let dup = SchemeSet {
            resource: "res".into(),
            user_data: "res".into(),
            callback: "callback".into(),
        };
        let err = OverlayConfig::builder().schemes(dup).build().unwrap_err();
        assert_eq!(err, OverlayConfigError::DuplicateScheme("res".into()));

        let upper = SchemeSet {
            resource: "Res".into(),
            ..SchemeSet::default()
        };
        let err = OverlayConfig::builder().schemes(upper).build().unwrap_err();
        assert_eq!(err, OverlayConfigError::InvalidScheme("Res".into()));
    }

    #[test]
    fn classify_ignores_case() {
        let schemes = SchemeSet::default();
        assert_eq!(schemes.classify("RES"), Some(SchemeKind::Resource));
        assert_eq!(schemes.classify("user"), Some(SchemeKind::UserData));
        assert_eq!(schemes.classify("callback"), Some(SchemeKind::Callback));
        assert_eq!(schemes.classify("https"), None);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = OverlayConfig::builder().event_capacity(0).build().unwrap_err();
        assert_eq!(err, OverlayConfigError::ZeroCapacity);
    }
}
