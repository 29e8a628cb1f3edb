//! Custom-scheme resource interception.
//!
//! Backends register the three scheme names of a [`SchemeSet`] with the native engine and
//! hand every matching request to the overlay's [`ResourceInterceptor`]. Routing:
//!
//! 1. resource / user-data scheme: read the path from the host filesystem. `200` with the
//!    bytes on success, `404` with an empty body otherwise.
//! 2. callback scheme: post a `callback` notification with the full URI and answer `200`
//!    with an empty body.
//! 3. anything else: `404`.
//!
//! Interception is synchronous and never waits for the host. It may run on the engine's
//! thread, so the interceptor only reads its own immutable scheme set.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{Response, StatusCode};
use percent_encoding::percent_decode_str;
use url::Url;

use crate::engine::config::{SchemeKind, SchemeSet};
use crate::engine::events::{BackendMessage, NativeEvent};
use crate::engine::registry::CompletionSink;

pub type ResourceResponse = Response<Vec<u8>>;

/// An intercepted request. Only the URI matters for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    uri: String,
}

impl ResourceRequest {
    pub fn new<S: Into<String>>(uri: S) -> Self {
        Self { uri: uri.into() }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Scheme part of the URI, without the `:`.
    pub fn scheme(&self) -> Option<&str> {
        let (scheme, _) = self.uri.split_once(':')?;
        if scheme.is_empty() {
            return None;
        }
        Some(scheme)
    }

    /// Host and path joined, percent-decoded, without query or fragment. `None` when the
    /// URI does not parse or decodes to invalid UTF-8.
    pub fn path(&self) -> Option<String> {
        let url = Url::parse(&self.uri).ok()?;
        let raw = match url.host_str() {
            Some(host) => format!("{}{}", host, url.path()),
            None => url.path().to_string(),
        };
        percent_decode_str(&raw).decode_utf8().ok().map(|p| p.into_owned())
    }
}

/// The host's virtual filesystem, as far as intercepted requests can see it.
pub trait ResourceFs: Send + Sync {
    fn read(&self, kind: SchemeKind, path: &str) -> io::Result<Vec<u8>>;
}

/// Maps the resource scheme to one directory and the user-data scheme to another.
#[derive(Debug, Clone)]
pub struct DirectoryFs {
    resource_root: PathBuf,
    user_root: PathBuf,
}

impl DirectoryFs {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(resource_root: P, user_root: Q) -> Self {
        Self {
            resource_root: resource_root.into(),
            user_root: user_root.into(),
        }
    }

    fn resolve(&self, kind: SchemeKind, path: &str) -> io::Result<PathBuf> {
        let root = match kind {
            SchemeKind::Resource => &self.resource_root,
            SchemeKind::UserData => &self.user_root,
            SchemeKind::Callback => {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "callback scheme has no files"))
            }
        };

        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("path escapes the resource root: {}", path),
            ));
        }
        Ok(root.join(relative))
    }
}

impl ResourceFs for DirectoryFs {
    fn read(&self, kind: SchemeKind, path: &str) -> io::Result<Vec<u8>> {
        let full = self.resolve(kind, path)?;
        std::fs::read(full)
    }
}

/// Per-overlay request router.
pub struct ResourceInterceptor {
    schemes: SchemeSet,
    fs: Arc<dyn ResourceFs>,
    sink: CompletionSink,
}

impl std::fmt::Debug for ResourceInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceInterceptor")
            .field("schemes", &self.schemes)
            .field("sink", &self.sink)
            .finish()
    }
}

impl ResourceInterceptor {
    pub fn new(schemes: SchemeSet, fs: Arc<dyn ResourceFs>, sink: CompletionSink) -> Self {
        Self { schemes, fs, sink }
    }

    pub fn schemes(&self) -> &SchemeSet {
        &self.schemes
    }

    pub fn intercept(&self, request: &ResourceRequest) -> ResourceResponse {
        let kind = request.scheme().and_then(|s| self.schemes.classify(s));

        match kind {
            Some(kind @ (SchemeKind::Resource | SchemeKind::UserData)) => {
                let Some(path) = request.path() else {
                    log::debug!("Resource[{}]: malformed uri", request.uri());
                    return not_found();
                };
                match self.fs.read(kind, &path) {
                    Ok(body) => file_response(&path, body),
                    Err(e) => {
                        log::debug!("Resource[{}]: {}", request.uri(), e);
                        not_found()
                    }
                }
            }
            Some(SchemeKind::Callback) => {
                self.sink.post(BackendMessage::Native(NativeEvent::SchemeCallback {
                    uri: request.uri().to_string(),
                }));
                empty_ok()
            }
            None => not_found(),
        }
    }
}

/// Content type guessed from the file extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("wasm") => "application/wasm",
        Some("txt") => "text/plain",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

fn build(status: StatusCode, content_type: &str, body: Vec<u8>) -> ResourceResponse {
    let len = body.len();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    if let Ok(value) = content_type.parse() {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, len.into());
    response
}

fn file_response(path: &str, body: Vec<u8>) -> ResourceResponse {
    build(StatusCode::OK, content_type_for(path), body)
}

fn empty_ok() -> ResourceResponse {
    build(StatusCode::OK, "text/plain", Vec::new())
}

fn not_found() -> ResourceResponse {
    build(StatusCode::NOT_FOUND, "text/plain", Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::overlay::OverlayId;
    use crate::engine::registry::SlotRegistry;

    fn interceptor(root: &Path) -> (ResourceInterceptor, tokio::sync::mpsc::UnboundedReceiver<BackendMessage>) {
        let registry = Arc::new(SlotRegistry::new());
        let (key, rx) = registry.occupy(OverlayId::new());
        let sink = CompletionSink::new(key, registry);
        let fs = Arc::new(DirectoryFs::new(root.join("res"), root.join("user")));
        (ResourceInterceptor::new(SchemeSet::default(), fs, sink), rx)
    }

    #[test]
    fn request_parts() {
        let req = ResourceRequest::new("res://ui/index.html?v=2#top");
        assert_eq!(req.scheme(), Some("res"));
        assert_eq!(req.path().as_deref(), Some("ui/index.html"));

        let req = ResourceRequest::new("about:blank");
        assert_eq!(req.scheme(), Some("about"));
        assert_eq!(req.path().as_deref(), Some("blank"));

        let req = ResourceRequest::new("res://ui/caf%C3%A9%20menu.html");
        assert_eq!(req.path().as_deref(), Some("ui/café menu.html"));

        assert_eq!(ResourceRequest::new("not a uri").path(), None);
    }

    #[test]
    fn percent_encoded_names_are_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("res/sub dir")).unwrap();
        std::fs::write(dir.path().join("res/my file.txt"), b"spaced").unwrap();
        std::fs::write(dir.path().join("res/sub dir/été.txt"), b"accented").unwrap();
        let (interceptor, _rx) = interceptor(dir.path());

        let resp = interceptor.intercept(&ResourceRequest::new("res://my%20file.txt"));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body(), b"spaced");
        assert_eq!(resp.headers()[CONTENT_TYPE], "text/plain");

        let resp = interceptor.intercept(&ResourceRequest::new("res://sub%20dir/%C3%A9t%C3%A9.txt"));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body(), b"accented");
    }

    #[test]
    fn encoded_traversal_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("res")).unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"nope").unwrap();
        let (interceptor, _rx) = interceptor(dir.path());

        for uri in ["res://%2e%2e/secret.txt", "res://%2E%2E%2Fsecret.txt", "res://sub/..%2f..%2fsecret.txt"] {
            let resp = interceptor.intercept(&ResourceRequest::new(uri));
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", uri);
            assert!(resp.body().is_empty());
        }
    }

    #[test]
    fn missing_file_is_404_with_empty_body() {
        let dir = tempfile::tempdir().unwrap();
        let (interceptor, _rx) = interceptor(dir.path());

        let resp = interceptor.intercept(&ResourceRequest::new("res://missing.file"));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(resp.body().is_empty());
        assert_eq!(resp.headers()[CONTENT_LENGTH], "0");
    }

    #[test]
    fn present_file_is_served_with_exact_length() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("res")).unwrap();
        let contents = b"<html><body>hello</body></html>".to_vec();
        std::fs::write(dir.path().join("res/present.file"), &contents).unwrap();
        let (interceptor, _rx) = interceptor(dir.path());

        let resp = interceptor.intercept(&ResourceRequest::new("res://present.file"));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[CONTENT_LENGTH], contents.len().to_string().as_str());
        assert_eq!(resp.body(), &contents);
    }

    #[test]
    fn user_scheme_reads_from_user_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("user/saves")).unwrap();
        std::fs::write(dir.path().join("user/saves/slot.json"), b"{}").unwrap();
        let (interceptor, _rx) = interceptor(dir.path());

        let resp = interceptor.intercept(&ResourceRequest::new("user://saves/slot.json"));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[CONTENT_TYPE], "application/json");

        let resp = interceptor.intercept(&ResourceRequest::new("res://saves/slot.json"));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn parent_traversal_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("res")).unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"nope").unwrap();
        let (interceptor, _rx) = interceptor(dir.path());

        let resp = interceptor.intercept(&ResourceRequest::new("res://../secret.txt"));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(resp.body().is_empty());
    }

    #[test]
    fn callback_scheme_posts_uri_and_answers_empty_200() {
        let dir = tempfile::tempdir().unwrap();
        let (interceptor, mut rx) = interceptor(dir.path());

        let resp = interceptor.intercept(&ResourceRequest::new("callback://save?slot=1"));
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.body().is_empty());

        match rx.try_recv() {
            Ok(BackendMessage::Native(NativeEvent::SchemeCallback { uri })) => {
                assert_eq!(uri, "callback://save?slot=1");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn foreign_scheme_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (interceptor, mut rx) = interceptor(dir.path());

        let resp = interceptor.intercept(&ResourceRequest::new("https://example.test/"));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("index.HTML"), "text/html");
        assert_eq!(content_type_for("app.js"), "text/javascript");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }
}
