//! WebKitGTK entry points, resolved at runtime.
//!
//! Only the handful of GTK 3 / WebKit2GTK 4.0 calls the overlay needs are bound. Types are
//! opaque; the few structs passed by value or pointer are `repr(C)` mirrors. GLib, GIO and
//! JavaScriptCore symbols are looked up through the gobject and webkit handles, which
//! pull those libraries in as dependencies.

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_double, c_int, c_ulong, c_void};

use crate::engine::capability::{LibrarySpec, NativeLibrary};
use crate::engine::errors::ErrorStatus;

pub type gboolean = c_int;
pub type gpointer = *mut c_void;
pub type GQuark = u32;

pub const FALSE: gboolean = 0;
pub const TRUE: gboolean = 1;

macro_rules! opaque {
    ($($name:ident),* $(,)?) => {
        $(
            #[repr(C)]
            pub struct $name {
                _private: [u8; 0],
            }
        )*
    };
}

opaque!(
    GObject,
    GClosure,
    GAsyncResult,
    GCancellable,
    GInputStream,
    GdkDisplay,
    GdkWindow,
    GtkWidget,
    WebKitWebView,
    WebKitWebContext,
    WebKitSettings,
    WebKitUserContentManager,
    WebKitUserScript,
    WebKitJavascriptResult,
    WebKitNavigationAction,
    WebKitURIRequest,
    WebKitURISchemeRequest,
    JSCValue,
    cairo_surface_t,
);

#[repr(C)]
pub struct GError {
    pub domain: GQuark,
    pub code: c_int,
    pub message: *mut c_char,
}

#[repr(C)]
pub struct GdkRGBA {
    pub red: c_double,
    pub green: c_double,
    pub blue: c_double,
    pub alpha: c_double,
}

pub type GCallback = unsafe extern "C" fn();
pub type GClosureNotify = Option<unsafe extern "C" fn(gpointer, *mut GClosure)>;
pub type GDestroyNotify = Option<unsafe extern "C" fn(gpointer)>;
pub type GAsyncReadyCallback = Option<unsafe extern "C" fn(*mut GObject, *mut GAsyncResult, gpointer)>;
pub type WebKitURISchemeRequestCallback = Option<unsafe extern "C" fn(*mut WebKitURISchemeRequest, gpointer)>;

// WebKitLoadEvent
pub const WEBKIT_LOAD_STARTED: c_int = 0;
pub const WEBKIT_LOAD_REDIRECTED: c_int = 1;
pub const WEBKIT_LOAD_COMMITTED: c_int = 2;
pub const WEBKIT_LOAD_FINISHED: c_int = 3;

pub const WEBKIT_USER_CONTENT_INJECT_TOP_FRAME: c_int = 1;
pub const WEBKIT_USER_SCRIPT_INJECT_AT_DOCUMENT_START: c_int = 0;

pub const WEBKIT_SNAPSHOT_REGION_VISIBLE: c_int = 0;
pub const WEBKIT_SNAPSHOT_OPTIONS_TRANSPARENT_BACKGROUND: c_int = 1 << 1;

// cairo_format_t
pub const CAIRO_FORMAT_ARGB32: c_int = 0;
pub const CAIRO_FORMAT_RGB24: c_int = 1;

pub const CAIRO_SURFACE_TYPE_IMAGE: c_int = 0;

pub const LIBRARIES: [LibrarySpec; 5] = [
    LibrarySpec {
        name: "libgdk-3.so",
        candidates: &["libgdk-3.so.0", "libgdk-3.so"],
    },
    LibrarySpec {
        name: "libgtk-3.so",
        candidates: &["libgtk-3.so.0", "libgtk-3.so"],
    },
    LibrarySpec {
        name: "libcairo.so.2",
        candidates: &["libcairo.so.2", "libcairo.so"],
    },
    LibrarySpec {
        name: "libgobject-2.0.so",
        candidates: &["libgobject-2.0.so.0", "libgobject-2.0.so"],
    },
    LibrarySpec {
        name: "libwebkit2gtk-4.0.so",
        candidates: &["libwebkit2gtk-4.0.so.37", "libwebkit2gtk-4.0.so", "libwebkit2gtk-4.1.so.0"],
    },
];

macro_rules! resolve {
    ($lib:expr, $name:ident) => {
        // SAFETY: the field type is the C prototype of the symbol with the same name.
        unsafe { $lib.symbol(stringify!($name))? }
    };
}

/// Function table for one process. Holds the libraries open for its own lifetime.
pub struct GtkApi {
    // gdk
    pub gdk_x11_lookup_xdisplay: unsafe extern "C" fn(*mut c_void) -> *mut GdkDisplay,
    pub gdk_x11_window_foreign_new_for_display: unsafe extern "C" fn(*mut GdkDisplay, c_ulong) -> *mut GdkWindow,

    // gtk
    pub gtk_init: unsafe extern "C" fn(*mut c_int, *mut *mut *mut c_char),
    pub gtk_fixed_new: unsafe extern "C" fn() -> *mut GtkWidget,
    pub gtk_fixed_put: unsafe extern "C" fn(*mut GtkWidget, *mut GtkWidget, c_int, c_int),
    pub gtk_fixed_move: unsafe extern "C" fn(*mut GtkWidget, *mut GtkWidget, c_int, c_int),
    pub gtk_widget_set_window: unsafe extern "C" fn(*mut GtkWidget, *mut GdkWindow),
    pub gtk_widget_set_visible: unsafe extern "C" fn(*mut GtkWidget, gboolean),
    pub gtk_widget_set_size_request: unsafe extern "C" fn(*mut GtkWidget, c_int, c_int),
    pub gtk_widget_destroy: unsafe extern "C" fn(*mut GtkWidget),
    pub gtk_main_iteration_do: unsafe extern "C" fn(gboolean) -> gboolean,

    // cairo
    pub cairo_surface_flush: unsafe extern "C" fn(*mut cairo_surface_t),
    pub cairo_surface_get_type: unsafe extern "C" fn(*mut cairo_surface_t) -> c_int,
    pub cairo_image_surface_get_data: unsafe extern "C" fn(*mut cairo_surface_t) -> *mut u8,
    pub cairo_image_surface_get_width: unsafe extern "C" fn(*mut cairo_surface_t) -> c_int,
    pub cairo_image_surface_get_height: unsafe extern "C" fn(*mut cairo_surface_t) -> c_int,
    pub cairo_image_surface_get_stride: unsafe extern "C" fn(*mut cairo_surface_t) -> c_int,
    pub cairo_image_surface_get_format: unsafe extern "C" fn(*mut cairo_surface_t) -> c_int,
    pub cairo_surface_destroy: unsafe extern "C" fn(*mut cairo_surface_t),

    // gobject / glib
    pub g_signal_connect_data:
        unsafe extern "C" fn(gpointer, *const c_char, GCallback, gpointer, GClosureNotify, c_int) -> c_ulong,
    pub g_signal_handler_disconnect: unsafe extern "C" fn(gpointer, c_ulong),
    pub g_object_unref: unsafe extern "C" fn(gpointer),
    pub g_malloc: unsafe extern "C" fn(usize) -> gpointer,
    pub g_free: unsafe extern "C" fn(gpointer),
    pub g_quark_from_static_string: unsafe extern "C" fn(*const c_char) -> GQuark,
    pub g_error_new_literal: unsafe extern "C" fn(GQuark, c_int, *const c_char) -> *mut GError,
    pub g_error_free: unsafe extern "C" fn(*mut GError),

    // webkit / gio / jsc
    pub webkit_web_view_new: unsafe extern "C" fn() -> *mut GtkWidget,
    pub webkit_web_view_get_context: unsafe extern "C" fn(*mut WebKitWebView) -> *mut WebKitWebContext,
    pub webkit_web_view_get_user_content_manager:
        unsafe extern "C" fn(*mut WebKitWebView) -> *mut WebKitUserContentManager,
    pub webkit_web_view_get_settings: unsafe extern "C" fn(*mut WebKitWebView) -> *mut WebKitSettings,
    pub webkit_settings_set_user_agent: unsafe extern "C" fn(*mut WebKitSettings, *const c_char),
    pub webkit_user_content_manager_register_script_message_handler:
        unsafe extern "C" fn(*mut WebKitUserContentManager, *const c_char) -> gboolean,
    pub webkit_user_content_manager_unregister_script_message_handler:
        unsafe extern "C" fn(*mut WebKitUserContentManager, *const c_char),
    pub webkit_user_content_manager_add_script: unsafe extern "C" fn(*mut WebKitUserContentManager, *mut WebKitUserScript),
    pub webkit_user_script_new: unsafe extern "C" fn(
        *const c_char,
        c_int,
        c_int,
        *const *const c_char,
        *const *const c_char,
    ) -> *mut WebKitUserScript,
    pub webkit_user_script_unref: unsafe extern "C" fn(*mut WebKitUserScript),
    pub webkit_web_view_load_uri: unsafe extern "C" fn(*mut WebKitWebView, *const c_char),
    pub webkit_web_view_load_html: unsafe extern "C" fn(*mut WebKitWebView, *const c_char, *const c_char),
    pub webkit_web_view_get_uri: unsafe extern "C" fn(*mut WebKitWebView) -> *const c_char,
    pub webkit_web_view_get_title: unsafe extern "C" fn(*mut WebKitWebView) -> *const c_char,
    pub webkit_web_view_can_go_back: unsafe extern "C" fn(*mut WebKitWebView) -> gboolean,
    pub webkit_web_view_can_go_forward: unsafe extern "C" fn(*mut WebKitWebView) -> gboolean,
    pub webkit_web_view_go_back: unsafe extern "C" fn(*mut WebKitWebView),
    pub webkit_web_view_go_forward: unsafe extern "C" fn(*mut WebKitWebView),
    pub webkit_web_view_reload: unsafe extern "C" fn(*mut WebKitWebView),
    pub webkit_web_view_stop_loading: unsafe extern "C" fn(*mut WebKitWebView),
    pub webkit_web_view_is_loading: unsafe extern "C" fn(*mut WebKitWebView) -> gboolean,
    pub webkit_web_view_get_zoom_level: unsafe extern "C" fn(*mut WebKitWebView) -> c_double,
    pub webkit_web_view_set_zoom_level: unsafe extern "C" fn(*mut WebKitWebView, c_double),
    pub webkit_web_view_set_background_color: unsafe extern "C" fn(*mut WebKitWebView, *const GdkRGBA),
    pub webkit_web_view_run_javascript:
        unsafe extern "C" fn(*mut WebKitWebView, *const c_char, *mut GCancellable, GAsyncReadyCallback, gpointer),
    pub webkit_web_view_get_snapshot: unsafe extern "C" fn(
        *mut WebKitWebView,
        c_int,
        c_int,
        *mut GCancellable,
        GAsyncReadyCallback,
        gpointer,
    ),
    pub webkit_web_view_get_snapshot_finish:
        unsafe extern "C" fn(*mut WebKitWebView, *mut GAsyncResult, *mut *mut GError) -> *mut cairo_surface_t,
    pub webkit_web_context_register_uri_scheme: unsafe extern "C" fn(
        *mut WebKitWebContext,
        *const c_char,
        WebKitURISchemeRequestCallback,
        gpointer,
        GDestroyNotify,
    ),
    pub webkit_uri_scheme_request_get_uri: unsafe extern "C" fn(*mut WebKitURISchemeRequest) -> *const c_char,
    pub webkit_uri_scheme_request_get_web_view: unsafe extern "C" fn(*mut WebKitURISchemeRequest) -> *mut WebKitWebView,
    pub webkit_uri_scheme_request_finish:
        unsafe extern "C" fn(*mut WebKitURISchemeRequest, *mut GInputStream, i64, *const c_char),
    pub webkit_uri_scheme_request_finish_error: unsafe extern "C" fn(*mut WebKitURISchemeRequest, *mut GError),
    pub webkit_javascript_result_get_js_value: unsafe extern "C" fn(*mut WebKitJavascriptResult) -> *mut JSCValue,
    pub jsc_value_to_string: unsafe extern "C" fn(*mut JSCValue) -> *mut c_char,
    pub webkit_navigation_action_get_request: unsafe extern "C" fn(*mut WebKitNavigationAction) -> *mut WebKitURIRequest,
    pub webkit_uri_request_get_uri: unsafe extern "C" fn(*mut WebKitURIRequest) -> *const c_char,
    pub g_memory_input_stream_new_from_data: unsafe extern "C" fn(*const c_void, isize, GDestroyNotify) -> *mut GInputStream,

    _libraries: Vec<NativeLibrary>,
}

impl GtkApi {
    /// Loads the libraries in dependency order and resolves every entry point. The first
    /// failure decides the status.
    pub fn load() -> Result<GtkApi, ErrorStatus> {
        let gdk = NativeLibrary::load(&LIBRARIES[0])?;
        let gdk_x11_lookup_xdisplay = resolve!(gdk, gdk_x11_lookup_xdisplay);
        let gdk_x11_window_foreign_new_for_display = resolve!(gdk, gdk_x11_window_foreign_new_for_display);

        let gtk = NativeLibrary::load(&LIBRARIES[1])?;
        let gtk_init = resolve!(gtk, gtk_init);
        let gtk_fixed_new = resolve!(gtk, gtk_fixed_new);
        let gtk_fixed_put = resolve!(gtk, gtk_fixed_put);
        let gtk_fixed_move = resolve!(gtk, gtk_fixed_move);
        let gtk_widget_set_window = resolve!(gtk, gtk_widget_set_window);
        let gtk_widget_set_visible = resolve!(gtk, gtk_widget_set_visible);
        let gtk_widget_set_size_request = resolve!(gtk, gtk_widget_set_size_request);
        let gtk_widget_destroy = resolve!(gtk, gtk_widget_destroy);
        let gtk_main_iteration_do = resolve!(gtk, gtk_main_iteration_do);

        let cairo = NativeLibrary::load(&LIBRARIES[2])?;
        let cairo_surface_flush = resolve!(cairo, cairo_surface_flush);
        let cairo_surface_get_type = resolve!(cairo, cairo_surface_get_type);
        let cairo_image_surface_get_data = resolve!(cairo, cairo_image_surface_get_data);
        let cairo_image_surface_get_width = resolve!(cairo, cairo_image_surface_get_width);
        let cairo_image_surface_get_height = resolve!(cairo, cairo_image_surface_get_height);
        let cairo_image_surface_get_stride = resolve!(cairo, cairo_image_surface_get_stride);
        let cairo_image_surface_get_format = resolve!(cairo, cairo_image_surface_get_format);
        let cairo_surface_destroy = resolve!(cairo, cairo_surface_destroy);

        let gobject = NativeLibrary::load(&LIBRARIES[3])?;
        let g_signal_connect_data = resolve!(gobject, g_signal_connect_data);
        let g_signal_handler_disconnect = resolve!(gobject, g_signal_handler_disconnect);
        let g_object_unref = resolve!(gobject, g_object_unref);
        let g_malloc = resolve!(gobject, g_malloc);
        let g_free = resolve!(gobject, g_free);
        let g_quark_from_static_string = resolve!(gobject, g_quark_from_static_string);
        let g_error_new_literal = resolve!(gobject, g_error_new_literal);
        let g_error_free = resolve!(gobject, g_error_free);

        let webkit = NativeLibrary::load(&LIBRARIES[4])?;
        let api = GtkApi {
            gdk_x11_lookup_xdisplay,
            gdk_x11_window_foreign_new_for_display,
            gtk_init,
            gtk_fixed_new,
            gtk_fixed_put,
            gtk_fixed_move,
            gtk_widget_set_window,
            gtk_widget_set_visible,
            gtk_widget_set_size_request,
            gtk_widget_destroy,
            gtk_main_iteration_do,
            cairo_surface_flush,
            cairo_surface_get_type,
            cairo_image_surface_get_data,
            cairo_image_surface_get_width,
            cairo_image_surface_get_height,
            cairo_image_surface_get_stride,
            cairo_image_surface_get_format,
            cairo_surface_destroy,
            g_signal_connect_data,
            g_signal_handler_disconnect,
            g_object_unref,
            g_malloc,
            g_free,
            g_quark_from_static_string,
            g_error_new_literal,
            g_error_free,
            webkit_web_view_new: resolve!(webkit, webkit_web_view_new),
            webkit_web_view_get_context: resolve!(webkit, webkit_web_view_get_context),
            webkit_web_view_get_user_content_manager: resolve!(webkit, webkit_web_view_get_user_content_manager),
            webkit_web_view_get_settings: resolve!(webkit, webkit_web_view_get_settings),
            webkit_settings_set_user_agent: resolve!(webkit, webkit_settings_set_user_agent),
            webkit_user_content_manager_register_script_message_handler: resolve!(
                webkit,
                webkit_user_content_manager_register_script_message_handler
            ),
            webkit_user_content_manager_unregister_script_message_handler: resolve!(
                webkit,
                webkit_user_content_manager_unregister_script_message_handler
            ),
            webkit_user_content_manager_add_script: resolve!(webkit, webkit_user_content_manager_add_script),
            webkit_user_script_new: resolve!(webkit, webkit_user_script_new),
            webkit_user_script_unref: resolve!(webkit, webkit_user_script_unref),
            webkit_web_view_load_uri: resolve!(webkit, webkit_web_view_load_uri),
            webkit_web_view_load_html: resolve!(webkit, webkit_web_view_load_html),
            webkit_web_view_get_uri: resolve!(webkit, webkit_web_view_get_uri),
            webkit_web_view_get_title: resolve!(webkit, webkit_web_view_get_title),
            webkit_web_view_can_go_back: resolve!(webkit, webkit_web_view_can_go_back),
            webkit_web_view_can_go_forward: resolve!(webkit, webkit_web_view_can_go_forward),
            webkit_web_view_go_back: resolve!(webkit, webkit_web_view_go_back),
            webkit_web_view_go_forward: resolve!(webkit, webkit_web_view_go_forward),
            webkit_web_view_reload: resolve!(webkit, webkit_web_view_reload),
            webkit_web_view_stop_loading: resolve!(webkit, webkit_web_view_stop_loading),
            webkit_web_view_is_loading: resolve!(webkit, webkit_web_view_is_loading),
            webkit_web_view_get_zoom_level: resolve!(webkit, webkit_web_view_get_zoom_level),
            webkit_web_view_set_zoom_level: resolve!(webkit, webkit_web_view_set_zoom_level),
            webkit_web_view_set_background_color: resolve!(webkit, webkit_web_view_set_background_color),
            webkit_web_view_run_javascript: resolve!(webkit, webkit_web_view_run_javascript),
            webkit_web_view_get_snapshot: resolve!(webkit, webkit_web_view_get_snapshot),
            webkit_web_view_get_snapshot_finish: resolve!(webkit, webkit_web_view_get_snapshot_finish),
            webkit_web_context_register_uri_scheme: resolve!(webkit, webkit_web_context_register_uri_scheme),
            webkit_uri_scheme_request_get_uri: resolve!(webkit, webkit_uri_scheme_request_get_uri),
            webkit_uri_scheme_request_get_web_view: resolve!(webkit, webkit_uri_scheme_request_get_web_view),
            webkit_uri_scheme_request_finish: resolve!(webkit, webkit_uri_scheme_request_finish),
            webkit_uri_scheme_request_finish_error: resolve!(webkit, webkit_uri_scheme_request_finish_error),
            webkit_javascript_result_get_js_value: resolve!(webkit, webkit_javascript_result_get_js_value),
            jsc_value_to_string: resolve!(webkit, jsc_value_to_string),
            webkit_navigation_action_get_request: resolve!(webkit, webkit_navigation_action_get_request),
            webkit_uri_request_get_uri: resolve!(webkit, webkit_uri_request_get_uri),
            g_memory_input_stream_new_from_data: resolve!(webkit, g_memory_input_stream_new_from_data),
            _libraries: vec![gdk, gtk, cairo, gobject, webkit],
        };
        Ok(api)
    }
}

/// Copies a borrowed C string. `None` for null.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
pub unsafe fn borrowed_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

/// Takes ownership of a `g_malloc`ed C string.
///
/// # Safety
///
/// `ptr` must be null or a NUL-terminated string allocated by GLib.
pub unsafe fn owned_string(api: &GtkApi, ptr: *mut c_char) -> Option<String> {
    let s = borrowed_string(ptr)?;
    (api.g_free)(ptr as gpointer);
    Some(s)
}
