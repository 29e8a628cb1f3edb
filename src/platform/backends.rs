use std::sync::Arc;

use crate::platform::backend::NativeBackend;

pub mod dummy;
pub mod null;

#[cfg(target_os = "linux")]
pub mod gtk;

#[cfg(target_os = "windows")]
pub mod edge;

/// The native backend for the platform this crate was built for.
pub fn platform_backend() -> Arc<dyn NativeBackend> {
    #[cfg(target_os = "windows")]
    {
        Arc::new(edge::EdgeBackend::new())
    }
    #[cfg(target_os = "linux")]
    {
        Arc::new(gtk::GtkBackend::new())
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        Arc::new(dummy::DummyBackend::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_is_idempotent() {
        let backend = platform_backend();
        let first = backend.probe();
        let second = backend.probe();
        assert_eq!(first, second);
    }
}
