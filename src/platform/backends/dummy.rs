use anyhow::{bail, Result};

use crate::engine::errors::ErrorStatus;
use crate::engine::registry::CompletionSink;
use crate::platform::backend::{NativeBackend, NativeView};

/// Fallback for platforms without a web engine. Every overlay shows "Not supported!".
#[derive(Debug, Default)]
pub struct DummyBackend;

impl DummyBackend {
    pub fn new() -> Self {
        Self
    }
}

impl NativeBackend for DummyBackend {
    fn name(&self) -> &str {
        "DummyBackend"
    }

    fn probe(&self) -> ErrorStatus {
        ErrorStatus::Unsupported
    }

    fn needs_parent_window(&self) -> bool {
        false
    }

    fn create_view(&self, _sink: CompletionSink) -> Result<Box<dyn NativeView>> {
        bail!("web views are not supported on this platform")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_unsupported() {
        let backend = DummyBackend::new();
        assert_eq!(backend.probe(), ErrorStatus::Unsupported);
        assert_eq!(backend.probe(), backend.probe());
        assert_eq!(backend.probe().to_string(), "Not supported!");
    }
}
