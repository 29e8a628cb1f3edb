//! Backend capability loading.
//!
//! Native engines are not linked at build time. Each backend describes the shared
//! libraries it needs as [`LibrarySpec`]s and resolves its entry points into a table of
//! function pointers once per process. The first failing step decides the
//! [`ErrorStatus`]: a library that won't load, or the first symbol it lacks.
//!
//! Backends keep the resulting `Result<Table, ErrorStatus>` in a `lazy_static`, so probing
//! again is a read of that cell.

use std::ffi::OsStr;

use libloading::Library;

use crate::engine::errors::ErrorStatus;

/// A shared library a backend depends on.
#[derive(Debug, Clone, Copy)]
pub struct LibrarySpec {
    /// Name shown in the error panel.
    pub name: &'static str,
    /// File names tried in order.
    pub candidates: &'static [&'static str],
}

/// A loaded library. Keeps the mapping alive for as long as resolved symbols are used.
#[derive(Debug)]
pub struct NativeLibrary {
    name: &'static str,
    library: Library,
}

impl NativeLibrary {
    pub fn load(spec: &LibrarySpec) -> Result<Self, ErrorStatus> {
        for candidate in spec.candidates {
            match Self::open(spec.name, candidate) {
                Ok(lib) => return Ok(lib),
                Err(_) => continue,
            }
        }
        Err(ErrorStatus::LibraryLoadFailed {
            library: spec.name.to_string(),
        })
    }

    /// Opens one specific file.
    pub fn open<P: AsRef<OsStr>>(name: &'static str, path: P) -> Result<Self, ErrorStatus> {
        // SAFETY: loading runs the library's initializers; the libraries named by backends
        // are system web engines whose initializers have no preconditions.
        match unsafe { Library::new(path.as_ref()) } {
            Ok(library) => Ok(Self { name, library }),
            Err(e) => {
                log::debug!("Capability: {:?}: {}", path.as_ref(), e);
                Err(ErrorStatus::LibraryLoadFailed {
                    library: name.to_string(),
                })
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolves `symbol` and copies it out as a `T`.
    ///
    /// # Safety
    ///
    /// `T` must be the exact type of the exported item, normally an `extern "C" fn`
    /// pointer. The value must not be used after this library is dropped.
    pub unsafe fn symbol<T: Copy>(&self, symbol: &str) -> Result<T, ErrorStatus> {
        match self.library.get::<T>(symbol.as_bytes()) {
            Ok(sym) => Ok(*sym),
            Err(_) => Err(ErrorStatus::EntryPointMissing {
                library: self.name.to_string(),
                symbol: symbol.to_string(),
            }),
        }
    }
}

/// Status of a probe result held by a backend.
pub fn status_of<T>(probe: &Result<T, ErrorStatus>) -> ErrorStatus {
    match probe {
        Ok(_) => ErrorStatus::Ready,
        Err(status) => status.clone(),
    }
}

/// Logs the outcome of a backend's one-time probe and passes it through.
pub fn report<T>(backend: &str, probe: Result<T, ErrorStatus>) -> Result<T, ErrorStatus> {
    match &probe {
        Ok(_) => log::info!("Capability[{}]: ready", backend),
        Err(status) => log::error!("Capability[{}]: {} (code {})", backend, status, status.code()),
    }
    probe
}
