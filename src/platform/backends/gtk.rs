//! WebKitGTK backend (Linux, X11).
//!
//! Views are `WebKitWebView`s placed in one process-wide `GtkFixed` that is wrapped around
//! the host's X11 window. All init steps finish synchronously. Engine callbacks arrive
//! while [`GtkView::pump`] runs a main-loop iteration, on the host's tick thread.
//!
//! Custom schemes are registered once per web context and routed back to the view that
//! issued the request through [`SCHEME_ROUTES`].

use std::collections::{HashMap, HashSet};
use std::ffi::CString;
use std::os::raw::{c_int, c_ulong};
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, bail, Result};
use lazy_static::lazy_static;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::engine::capability::{report, status_of};
use crate::engine::errors::ErrorStatus;
use crate::engine::events::{BackendMessage, NativeEvent};
use crate::engine::host::ParentWindow;
use crate::engine::registry::CompletionSink;
use crate::engine::resource::{ResourceInterceptor, ResourceRequest};
use crate::engine::snapshot::{RawCapture, SourceFormat};
use crate::platform::backend::{
    CallbackKind, CallbackTokens, EnvironmentOptions, NativeBackend, NativeView, StepOutcome,
};
use crate::platform::Viewport;

mod ffi;

use ffi::*;

const MESSAGE_HANDLER: &str = "callback";

const MESSAGE_BRIDGE: &str =
    "function webviewMessage(s){window.webkit.messageHandlers.callback.postMessage(s);}";

lazy_static! {
    static ref GTK_API: Result<GtkApi, ErrorStatus> = report("WebKitGTK", GtkApi::load());

    /// Web view address to the interceptor serving its scheme requests.
    static ref SCHEME_ROUTES: Mutex<HashMap<usize, Arc<ResourceInterceptor>>> = Mutex::new(HashMap::new());

    /// (web context address, scheme) pairs already registered with WebKit.
    static ref REGISTERED_SCHEMES: Mutex<HashSet<(usize, String)>> = Mutex::new(HashSet::new());
}

/// The shared `GtkFixed`, created on first use.
static CONTAINER: Mutex<Option<usize>> = Mutex::new(None);

fn api() -> Result<&'static GtkApi> {
    GTK_API.as_ref().map_err(|status| anyhow!("{}", status))
}

#[derive(Debug, Default)]
pub struct GtkBackend;

impl GtkBackend {
    pub fn new() -> Self {
        Self
    }
}

impl NativeBackend for GtkBackend {
    fn name(&self) -> &str {
        "GtkBackend"
    }

    fn probe(&self) -> ErrorStatus {
        status_of(&*GTK_API)
    }

    fn create_view(&self, sink: CompletionSink) -> Result<Box<dyn NativeView>> {
        Ok(Box::new(GtkView::new(api()?, sink)))
    }
}

pub struct GtkView {
    api: &'static GtkApi,
    sink: CompletionSink,
    container: *mut GtkWidget,
    view: *mut GtkWidget,
    manager: *mut WebKitUserContentManager,
    user_agent: Option<String>,
}

impl GtkView {
    fn new(api: &'static GtkApi, sink: CompletionSink) -> Self {
        Self {
            api,
            sink,
            container: ptr::null_mut(),
            view: ptr::null_mut(),
            manager: ptr::null_mut(),
            user_agent: None,
        }
    }

    fn web_view(&self) -> Result<*mut WebKitWebView> {
        if self.view.is_null() {
            bail!("web view not created");
        }
        Ok(self.view as *mut WebKitWebView)
    }

    fn connect(&self, instance: gpointer, signal: &str, handler: GCallback) -> Result<c_ulong> {
        let signal = CString::new(signal)?;
        let context = Box::into_raw(Box::new(SignalContext {
            sink: self.sink.clone(),
        }));
        // SAFETY: `context` is reclaimed exactly once by `drop_signal_context` when the
        // handler is disconnected or the instance is finalized.
        let id = unsafe {
            (self.api.g_signal_connect_data)(
                instance,
                signal.as_ptr(),
                handler,
                context as gpointer,
                Some(drop_signal_context),
                0,
            )
        };
        if id == 0 {
            bail!("failed to connect {:?}", signal);
        }
        Ok(id)
    }

    fn register_schemes(&self, web_view: *mut WebKitWebView, interceptor: &ResourceInterceptor) -> Result<()> {
        let context = unsafe { (self.api.webkit_web_view_get_context)(web_view) };
        let mut registered = REGISTERED_SCHEMES.lock().unwrap_or_else(PoisonError::into_inner);
        for scheme in interceptor.schemes().names() {
            if !registered.insert((context as usize, scheme.to_string())) {
                continue;
            }
            let name = CString::new(scheme)?;
            unsafe {
                (self.api.webkit_web_context_register_uri_scheme)(
                    context,
                    name.as_ptr(),
                    Some(handle_scheme_request),
                    ptr::null_mut(),
                    None,
                );
            }
            log::debug!("GtkView: registered scheme {}", scheme);
        }
        Ok(())
    }
}

fn ensure_container(api: &GtkApi, parent: &ParentWindow) -> Result<*mut GtkWidget> {
    let mut container = CONTAINER.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(fixed) = *container {
        return Ok(fixed as *mut GtkWidget);
    }

    let xwindow = match parent.window {
        RawWindowHandle::Xlib(handle) => handle.window,
        other => bail!("unsupported parent window {:?}", other),
    };
    let xdisplay = match parent.display {
        RawDisplayHandle::Xlib(handle) => handle.display.map(|d| d.as_ptr()),
        other => bail!("unsupported display {:?}", other),
    };
    let Some(xdisplay) = xdisplay else {
        bail!("parent window has no X display");
    };

    // SAFETY: GTK is initialised once, on the host's UI thread, before any widget exists.
    let fixed = unsafe {
        (api.gtk_init)(ptr::null_mut(), ptr::null_mut());
        let display = (api.gdk_x11_lookup_xdisplay)(xdisplay);
        if display.is_null() {
            bail!("GDK does not know the host display");
        }
        let window = (api.gdk_x11_window_foreign_new_for_display)(display, xwindow as c_ulong);
        if window.is_null() {
            bail!("could not wrap host window {:#x}", xwindow);
        }
        let fixed = (api.gtk_fixed_new)();
        (api.gtk_widget_set_window)(fixed, window);
        (api.gtk_widget_set_visible)(fixed, TRUE);
        fixed
    };

    *container = Some(fixed as usize);
    Ok(fixed)
}

/// Widget size request for `bounds`, which the overlay already hands over in logical units.
fn size_request(bounds: Viewport) -> (c_int, c_int) {
    (bounds.width.min(c_int::MAX as u32) as c_int, bounds.height.min(c_int::MAX as u32) as c_int)
}

impl NativeView for GtkView {
    fn begin_environment(&mut self, parent: Option<&ParentWindow>, options: &EnvironmentOptions) -> Result<StepOutcome> {
        let Some(parent) = parent else {
            bail!("no parent window");
        };
        self.container = ensure_container(self.api, parent)?;
        self.user_agent = options.user_agent.clone();
        log::debug!("GtkView: using shared web context, cache dir {:?} unused", options.cache_dir);
        Ok(StepOutcome::Complete)
    }

    fn begin_controller(&mut self, bounds: Viewport, visible: bool) -> Result<StepOutcome> {
        if self.container.is_null() {
            bail!("no container");
        }
        let view = unsafe { (self.api.webkit_web_view_new)() };
        if view.is_null() {
            bail!("webkit_web_view_new failed");
        }
        self.view = view;
        self.manager = unsafe { (self.api.webkit_web_view_get_user_content_manager)(view as *mut WebKitWebView) };

        unsafe {
            let (width, height) = size_request(bounds);
            (self.api.gtk_widget_set_size_request)(view, width, height);
            (self.api.gtk_fixed_put)(self.container, view, bounds.x, bounds.y);
            (self.api.gtk_widget_set_visible)(view, if visible { TRUE } else { FALSE });
        }
        if let Some(ua) = self.user_agent.clone() {
            self.set_user_agent(&ua)?;
        }
        Ok(StepOutcome::Complete)
    }

    fn install_bridge(&mut self, interceptor: Arc<ResourceInterceptor>) -> Result<CallbackTokens> {
        let web_view = self.web_view()?;
        let mut tokens = CallbackTokens::new();

        // SAFETY: each handler's signature matches its signal's C signature.
        unsafe {
            let id = self.connect(
                web_view as gpointer,
                "load-changed",
                std::mem::transmute::<unsafe extern "C" fn(*mut WebKitWebView, c_int, gpointer), GCallback>(
                    on_load_changed,
                ),
            )?;
            tokens.push(CallbackKind::LoadChanged, id as i64);

            let id = self.connect(
                web_view as gpointer,
                "insecure-content-detected",
                std::mem::transmute::<unsafe extern "C" fn(*mut WebKitWebView, c_int, gpointer), GCallback>(
                    on_insecure_content,
                ),
            )?;
            tokens.push(CallbackKind::InsecureContent, id as i64);

            let id = self.connect(
                web_view as gpointer,
                "create",
                std::mem::transmute::<
                    unsafe extern "C" fn(*mut WebKitWebView, *mut WebKitNavigationAction, gpointer) -> *mut GtkWidget,
                    GCallback,
                >(on_create),
            )?;
            tokens.push(CallbackKind::NewWindow, id as i64);

            let signal = format!("script-message-received::{}", MESSAGE_HANDLER);
            let id = self.connect(
                self.manager as gpointer,
                &signal,
                std::mem::transmute::<
                    unsafe extern "C" fn(*mut WebKitUserContentManager, *mut WebKitJavascriptResult, gpointer),
                    GCallback,
                >(on_script_message),
            )?;
            tokens.push(CallbackKind::ScriptMessage, id as i64);
        }

        self.register_schemes(web_view, &interceptor)?;
        SCHEME_ROUTES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(web_view as usize, interceptor);
        tokens.push(CallbackKind::ResourceRequested, web_view as usize as i64);

        Ok(tokens)
    }

    fn message_bridge_script(&self) -> Option<&'static str> {
        Some(MESSAGE_BRIDGE)
    }

    fn inject_scripts(&mut self, scripts: &[String]) -> Result<StepOutcome> {
        self.web_view()?;
        for source in scripts {
            let source = CString::new(source.as_str())?;
            unsafe {
                let script = (self.api.webkit_user_script_new)(
                    source.as_ptr(),
                    WEBKIT_USER_CONTENT_INJECT_TOP_FRAME,
                    WEBKIT_USER_SCRIPT_INJECT_AT_DOCUMENT_START,
                    ptr::null(),
                    ptr::null(),
                );
                (self.api.webkit_user_content_manager_add_script)(self.manager, script);
                (self.api.webkit_user_script_unref)(script);
            }
        }

        let handler = CString::new(MESSAGE_HANDLER)?;
        let registered =
            unsafe { (self.api.webkit_user_content_manager_register_script_message_handler)(self.manager, handler.as_ptr()) };
        if registered == FALSE {
            bail!("could not register message handler {:?}", MESSAGE_HANDLER);
        }
        Ok(StepOutcome::Complete)
    }

    fn pump(&mut self) {
        unsafe {
            (self.api.gtk_main_iteration_do)(FALSE);
        }
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        let web_view = self.web_view()?;
        let url = CString::new(url)?;
        unsafe { (self.api.webkit_web_view_load_uri)(web_view, url.as_ptr()) };
        Ok(())
    }

    fn load_html(&mut self, html: &str, base_url: &str) -> Result<()> {
        let web_view = self.web_view()?;
        let html = CString::new(html)?;
        let base = CString::new(base_url)?;
        unsafe { (self.api.webkit_web_view_load_html)(web_view, html.as_ptr(), base.as_ptr()) };
        Ok(())
    }

    fn execute_script(&mut self, script: &str) -> Result<()> {
        let web_view = self.web_view()?;
        let script = CString::new(script)?;
        unsafe {
            (self.api.webkit_web_view_run_javascript)(web_view, script.as_ptr(), ptr::null_mut(), None, ptr::null_mut())
        };
        Ok(())
    }

    fn url(&self) -> Option<String> {
        let web_view = self.web_view().ok()?;
        unsafe { borrowed_string((self.api.webkit_web_view_get_uri)(web_view)) }
    }

    fn title(&self) -> Option<String> {
        let web_view = self.web_view().ok()?;
        unsafe { borrowed_string((self.api.webkit_web_view_get_title)(web_view)) }
    }

    fn zoom(&self) -> Option<f64> {
        let web_view = self.web_view().ok()?;
        Some(unsafe { (self.api.webkit_web_view_get_zoom_level)(web_view) })
    }

    fn set_zoom(&mut self, zoom: f64) -> Result<()> {
        let web_view = self.web_view()?;
        unsafe { (self.api.webkit_web_view_set_zoom_level)(web_view, zoom) };
        Ok(())
    }

    fn set_user_agent(&mut self, user_agent: &str) -> Result<bool> {
        let web_view = self.web_view()?;
        let ua = CString::new(user_agent)?;
        unsafe {
            let settings = (self.api.webkit_web_view_get_settings)(web_view);
            // An empty agent restores WebKit's default.
            let ua_ptr = if user_agent.is_empty() { ptr::null() } else { ua.as_ptr() };
            (self.api.webkit_settings_set_user_agent)(settings, ua_ptr);
        }
        Ok(true)
    }

    fn set_transparent_background(&mut self, transparent: bool) -> Result<bool> {
        let web_view = self.web_view()?;
        let color = if transparent {
            GdkRGBA {
                red: 0.0,
                green: 0.0,
                blue: 0.0,
                alpha: 0.0,
            }
        } else {
            GdkRGBA {
                red: 1.0,
                green: 1.0,
                blue: 1.0,
                alpha: 1.0,
            }
        };
        unsafe { (self.api.webkit_web_view_set_background_color)(web_view, &color) };
        Ok(true)
    }

    fn can_go_back(&self) -> bool {
        match self.web_view() {
            Ok(web_view) => unsafe { (self.api.webkit_web_view_can_go_back)(web_view) != FALSE },
            Err(_) => false,
        }
    }

    fn can_go_forward(&self) -> bool {
        match self.web_view() {
            Ok(web_view) => unsafe { (self.api.webkit_web_view_can_go_forward)(web_view) != FALSE },
            Err(_) => false,
        }
    }

    fn is_loading(&self) -> Option<bool> {
        let web_view = self.web_view().ok()?;
        Some(unsafe { (self.api.webkit_web_view_is_loading)(web_view) != FALSE })
    }

    fn go_back(&mut self) -> Result<()> {
        let web_view = self.web_view()?;
        unsafe { (self.api.webkit_web_view_go_back)(web_view) };
        Ok(())
    }

    fn go_forward(&mut self) -> Result<()> {
        let web_view = self.web_view()?;
        unsafe { (self.api.webkit_web_view_go_forward)(web_view) };
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        let web_view = self.web_view()?;
        unsafe { (self.api.webkit_web_view_reload)(web_view) };
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let web_view = self.web_view()?;
        unsafe { (self.api.webkit_web_view_stop_loading)(web_view) };
        Ok(())
    }

    fn set_bounds(&mut self, bounds: Viewport) -> Result<()> {
        self.web_view()?;
        unsafe {
            let (width, height) = size_request(bounds);
            (self.api.gtk_widget_set_size_request)(self.view, width, height);
            (self.api.gtk_fixed_move)(self.container, self.view, bounds.x, bounds.y);
        }
        Ok(())
    }

    fn set_visible(&mut self, visible: bool) -> Result<()> {
        self.web_view()?;
        unsafe { (self.api.gtk_widget_set_visible)(self.view, if visible { TRUE } else { FALSE }) };
        Ok(())
    }

    fn capture_snapshot(&mut self, _width: u32) -> Result<()> {
        let web_view = self.web_view()?;
        let context = Box::into_raw(Box::new(SignalContext {
            sink: self.sink.clone(),
        }));
        // SAFETY: `on_snapshot_ready` runs exactly once and reclaims `context`.
        unsafe {
            (self.api.webkit_web_view_get_snapshot)(
                web_view,
                WEBKIT_SNAPSHOT_REGION_VISIBLE,
                WEBKIT_SNAPSHOT_OPTIONS_TRANSPARENT_BACKGROUND,
                ptr::null_mut(),
                Some(on_snapshot_ready),
                context as gpointer,
            );
        }
        Ok(())
    }

    fn unsubscribe(&mut self, tokens: CallbackTokens) {
        for token in tokens {
            match token.kind {
                CallbackKind::ResourceRequested => {
                    SCHEME_ROUTES
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&(token.raw as usize));
                }
                CallbackKind::ScriptMessage if !self.manager.is_null() => unsafe {
                    (self.api.g_signal_handler_disconnect)(self.manager as gpointer, token.raw as c_ulong);
                },
                _ if !self.view.is_null() => unsafe {
                    (self.api.g_signal_handler_disconnect)(self.view as gpointer, token.raw as c_ulong);
                },
                _ => {}
            }
        }
    }

    fn release(&mut self) {
        if self.view.is_null() {
            return;
        }
        SCHEME_ROUTES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(self.view as usize));
        unsafe {
            if !self.manager.is_null() {
                if let Ok(handler) = CString::new(MESSAGE_HANDLER) {
                    (self.api.webkit_user_content_manager_unregister_script_message_handler)(
                        self.manager,
                        handler.as_ptr(),
                    );
                }
            }
            (self.api.gtk_widget_destroy)(self.view);
        }
        self.view = ptr::null_mut();
        self.manager = ptr::null_mut();
    }
}

impl Drop for GtkView {
    fn drop(&mut self) {
        self.release();
    }
}

/// User data of every signal handler and async call.
struct SignalContext {
    sink: CompletionSink,
}

unsafe extern "C" fn drop_signal_context(data: gpointer, _closure: *mut GClosure) {
    drop(Box::from_raw(data as *mut SignalContext));
}

unsafe fn sink<'a>(data: gpointer) -> &'a CompletionSink {
    &(*(data as *const SignalContext)).sink
}

unsafe extern "C" fn on_load_changed(web_view: *mut WebKitWebView, event: c_int, data: gpointer) {
    let sink = sink(data);
    let Ok(api) = api() else { return };
    let native = match event {
        WEBKIT_LOAD_STARTED => NativeEvent::NavigationStarting {
            url: borrowed_string((api.webkit_web_view_get_uri)(web_view)),
        },
        WEBKIT_LOAD_REDIRECTED => NativeEvent::LoadRedirected,
        WEBKIT_LOAD_COMMITTED => NativeEvent::LoadCommitted,
        WEBKIT_LOAD_FINISHED => NativeEvent::NavigationCompleted { success: true },
        other => {
            log::debug!("GtkView: unknown load event {}", other);
            return;
        }
    };
    sink.post(BackendMessage::Native(native));
}

unsafe extern "C" fn on_insecure_content(_web_view: *mut WebKitWebView, _event: c_int, data: gpointer) {
    sink(data).post(BackendMessage::Native(NativeEvent::InsecureContent));
}

unsafe extern "C" fn on_create(
    _web_view: *mut WebKitWebView,
    action: *mut WebKitNavigationAction,
    data: gpointer,
) -> *mut GtkWidget {
    if let Ok(api) = api() {
        let request = (api.webkit_navigation_action_get_request)(action);
        let url = if request.is_null() {
            None
        } else {
            borrowed_string((api.webkit_uri_request_get_uri)(request))
        };
        sink(data).post(BackendMessage::Native(NativeEvent::NewWindowRequested {
            url: url.unwrap_or_default(),
        }));
    }
    // No widget: the popup is denied.
    ptr::null_mut()
}

unsafe extern "C" fn on_script_message(
    _manager: *mut WebKitUserContentManager,
    result: *mut WebKitJavascriptResult,
    data: gpointer,
) {
    let Ok(api) = api() else { return };
    let value = (api.webkit_javascript_result_get_js_value)(result);
    if value.is_null() {
        return;
    }
    if let Some(body) = owned_string(api, (api.jsc_value_to_string)(value)) {
        sink(data).post(BackendMessage::Native(NativeEvent::ScriptMessage { body }));
    }
}

unsafe extern "C" fn handle_scheme_request(request: *mut WebKitURISchemeRequest, _data: gpointer) {
    let Ok(api) = api() else { return };
    let web_view = (api.webkit_uri_scheme_request_get_web_view)(request);
    let interceptor = SCHEME_ROUTES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&(web_view as usize))
        .cloned();
    let uri = borrowed_string((api.webkit_uri_scheme_request_get_uri)(request)).unwrap_or_default();

    let Some(interceptor) = interceptor else {
        finish_with_error(api, request, 404, "No handler");
        return;
    };

    let response = interceptor.intercept(&ResourceRequest::new(uri));
    if !response.status().is_success() {
        finish_with_error(api, request, response.status().as_u16() as c_int, "Not Found");
        return;
    }

    let content_type = response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| CString::new(v).ok());
    let body = response.body();

    let stream = if body.is_empty() {
        (api.g_memory_input_stream_new_from_data)(ptr::null(), 0, None)
    } else {
        let copy = (api.g_malloc)(body.len());
        ptr::copy_nonoverlapping(body.as_ptr(), copy as *mut u8, body.len());
        (api.g_memory_input_stream_new_from_data)(copy, body.len() as isize, Some(api.g_free))
    };
    (api.webkit_uri_scheme_request_finish)(
        request,
        stream,
        body.len() as i64,
        content_type.as_ref().map_or(ptr::null(), |c| c.as_ptr()),
    );
    (api.g_object_unref)(stream as gpointer);
}

unsafe fn finish_with_error(api: &GtkApi, request: *mut WebKitURISchemeRequest, code: c_int, message: &str) {
    let Ok(message) = CString::new(message) else { return };
    let domain = (api.g_quark_from_static_string)(b"webview-overlay\0".as_ptr() as *const _);
    let error = (api.g_error_new_literal)(domain, code, message.as_ptr());
    (api.webkit_uri_scheme_request_finish_error)(request, error);
    (api.g_error_free)(error);
}

unsafe extern "C" fn on_snapshot_ready(source: *mut GObject, result: *mut GAsyncResult, data: gpointer) {
    let context = Box::from_raw(data as *mut SignalContext);
    let outcome = match api() {
        Ok(api) => read_snapshot(api, source as *mut WebKitWebView, result),
        Err(e) => Err(e.to_string()),
    };
    context.sink.post(BackendMessage::SnapshotCaptured(outcome));
}

unsafe fn read_snapshot(
    api: &GtkApi,
    web_view: *mut WebKitWebView,
    result: *mut GAsyncResult,
) -> std::result::Result<RawCapture, String> {
    let mut error: *mut GError = ptr::null_mut();
    let surface = (api.webkit_web_view_get_snapshot_finish)(web_view, result, &mut error);
    if surface.is_null() {
        let reason = if error.is_null() {
            "snapshot failed".to_string()
        } else {
            let reason = borrowed_string((*error).message).unwrap_or_else(|| "snapshot failed".into());
            (api.g_error_free)(error);
            reason
        };
        return Err(reason);
    }

    let capture = read_surface(api, surface);
    (api.cairo_surface_destroy)(surface);
    capture
}

unsafe fn read_surface(api: &GtkApi, surface: *mut cairo_surface_t) -> std::result::Result<RawCapture, String> {
    if (api.cairo_surface_get_type)(surface) != CAIRO_SURFACE_TYPE_IMAGE {
        return Err("snapshot is not an image surface".into());
    }
    (api.cairo_surface_flush)(surface);

    let format = match (api.cairo_image_surface_get_format)(surface) {
        CAIRO_FORMAT_ARGB32 => SourceFormat::Argb32,
        CAIRO_FORMAT_RGB24 => SourceFormat::Rgb24,
        other => return Err(format!("unsupported pixel format {}", other)),
    };
    let width = (api.cairo_image_surface_get_width)(surface);
    let height = (api.cairo_image_surface_get_height)(surface);
    let stride = (api.cairo_image_surface_get_stride)(surface);
    let data = (api.cairo_image_surface_get_data)(surface);
    if data.is_null() || width <= 0 || height <= 0 || stride <= 0 {
        return Err("empty snapshot surface".into());
    }

    let len = stride as usize * height as usize;
    let bytes = std::slice::from_raw_parts(data, len).to_vec();
    Ok(RawCapture::Pixels {
        format,
        width: width as u32,
        height: height as u32,
        stride: stride as u32,
        data: bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_matches_loaded_table() {
        let backend = GtkBackend::new();
        let status = backend.probe();
        assert_eq!(status.is_ready(), GTK_API.is_ok());
        assert_eq!(backend.probe(), status);
    }

    #[test]
    fn size_request_saturates() {
        assert_eq!(size_request(Viewport::new(0, 0, 640, 480)), (640, 480));
        assert_eq!(size_request(Viewport::new(0, 0, u32::MAX, 1)), (c_int::MAX, 1));
    }
}
