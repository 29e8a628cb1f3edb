//! WebView2 backend (Windows).
//!
//! `WebView2Loader.dll` is loaded at runtime, so a machine without it reports a capability
//! error instead of failing to start. Environment, controller and script injection all
//! complete asynchronously on the host's UI thread; their handlers store the new COM
//! objects in [`Handles`] and post a completion into the overlay's slot.
//!
//! The host runs the Win32 message loop, so [`EdgeView`] does not pump.

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use lazy_static::lazy_static;
use raw_window_handle::RawWindowHandle;
use webview2_com::Microsoft::Web::WebView2::Win32::{
    ICoreWebView2, ICoreWebView2Controller, ICoreWebView2Controller2, ICoreWebView2Environment,
    ICoreWebView2Settings2, COREWEBVIEW2_CAPTURE_PREVIEW_IMAGE_FORMAT_PNG, COREWEBVIEW2_COLOR,
    COREWEBVIEW2_WEB_RESOURCE_CONTEXT_ALL,
};
use webview2_com::{
    take_pwstr, AddScriptToExecuteOnDocumentStartCompletedHandler, CapturePreviewCompletedHandler,
    CreateCoreWebView2ControllerCompletedHandler, CreateCoreWebView2EnvironmentCompletedHandler,
    ExecuteScriptCompletedHandler, NavigationCompletedEventHandler, NavigationStartingEventHandler,
    NewWindowRequestedEventHandler, WebMessageReceivedEventHandler, WebResourceRequestedEventHandler,
};
use windows::core::{Interface, HRESULT, HSTRING, PCWSTR, PWSTR};
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::System::Com::{CoInitializeEx, IStream, COINIT_APARTMENTTHREADED, STREAM_SEEK_SET};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::WinRT::EventRegistrationToken;
use windows::Win32::UI::Shell::SHCreateMemStream;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, MoveWindow, RegisterClassW, ShowWindow, SW_HIDE, SW_SHOW,
    WINDOW_EX_STYLE, WNDCLASSW, WS_CHILD,
};

use crate::engine::capability::{report, status_of, LibrarySpec, NativeLibrary};
use crate::engine::errors::ErrorStatus;
use crate::engine::events::{BackendMessage, NativeEvent};
use crate::engine::host::ParentWindow;
use crate::engine::registry::CompletionSink;
use crate::engine::resource::{ResourceInterceptor, ResourceRequest};
use crate::engine::snapshot::RawCapture;
use crate::platform::backend::{
    CallbackKind, CallbackTokens, EnvironmentOptions, NativeBackend, NativeView, StepOutcome,
};
use crate::platform::Viewport;

const LOADER: LibrarySpec = LibrarySpec {
    name: "WebView2Loader.dll",
    candidates: &["WebView2Loader.dll"],
};

const CONTROL_CLASS: &str = "WebViewOverlayControl";

const MESSAGE_BRIDGE: &str = "function webviewMessage(s){window.chrome.webview.postMessage(s);}";

type CreateEnvironmentFn = unsafe extern "system" fn(PCWSTR, PCWSTR, *mut c_void, *mut c_void) -> HRESULT;

struct EdgeApi {
    create_environment: CreateEnvironmentFn,
    _loader: NativeLibrary,
}

impl EdgeApi {
    fn load() -> Result<EdgeApi, ErrorStatus> {
        let loader = NativeLibrary::load(&LOADER)?;
        // SAFETY: the loader exports this with the prototype above.
        let create_environment = unsafe { loader.symbol("CreateCoreWebView2EnvironmentWithOptions")? };
        Ok(EdgeApi {
            create_environment,
            _loader: loader,
        })
    }
}

lazy_static! {
    static ref EDGE_API: Result<EdgeApi, ErrorStatus> = report("WebView2", EdgeApi::load());
}

fn api() -> Result<&'static EdgeApi> {
    EDGE_API.as_ref().map_err(|status| anyhow!("{}", status))
}

#[derive(Debug, Default)]
pub struct EdgeBackend;

impl EdgeBackend {
    pub fn new() -> Self {
        Self
    }
}

impl NativeBackend for EdgeBackend {
    fn name(&self) -> &str {
        "EdgeBackend"
    }

    fn probe(&self) -> ErrorStatus {
        status_of(&*EDGE_API)
    }

    fn create_view(&self, sink: CompletionSink) -> Result<Box<dyn NativeView>> {
        Ok(Box::new(EdgeView::new(api()?, sink)))
    }
}

/// COM objects filled in by completion handlers.
#[derive(Default)]
struct Handles {
    environment: Option<ICoreWebView2Environment>,
    controller: Option<ICoreWebView2Controller>,
    webview: Option<ICoreWebView2>,
    /// Set once the view is released. Late completions close what they receive.
    released: bool,
}

impl Handles {
    fn released() -> Self {
        Self {
            released: true,
            ..Self::default()
        }
    }
}

pub struct EdgeView {
    api: &'static EdgeApi,
    sink: CompletionSink,
    handles: Rc<RefCell<Handles>>,
    parent: Option<HWND>,
    window: Option<HWND>,
}

impl EdgeView {
    fn new(api: &'static EdgeApi, sink: CompletionSink) -> Self {
        Self {
            api,
            sink,
            handles: Rc::new(RefCell::new(Handles::default())),
            parent: None,
            window: None,
        }
    }

    fn webview(&self) -> Result<ICoreWebView2> {
        self.handles
            .borrow()
            .webview
            .clone()
            .ok_or_else(|| anyhow!("web view not created"))
    }

    fn controller(&self) -> Result<ICoreWebView2Controller> {
        self.handles
            .borrow()
            .controller
            .clone()
            .ok_or_else(|| anyhow!("controller not created"))
    }

    fn environment(&self) -> Result<ICoreWebView2Environment> {
        self.handles
            .borrow()
            .environment
            .clone()
            .ok_or_else(|| anyhow!("environment not created"))
    }
}

unsafe extern "system" fn control_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    DefWindowProcW(hwnd, msg, wparam, lparam)
}

/// Child window the controller is parented to, placed at `bounds` inside `parent`.
fn create_control_window(parent: HWND, bounds: Viewport, visible: bool) -> Result<HWND> {
    unsafe {
        let hinstance = GetModuleHandleW(PCWSTR::null())?;
        let class_name = HSTRING::from(CONTROL_CLASS);
        let class = WNDCLASSW {
            lpfnWndProc: Some(control_proc),
            hInstance: hinstance.into(),
            lpszClassName: PCWSTR(class_name.as_ptr()),
            ..Default::default()
        };
        // Fails harmlessly once the class exists.
        RegisterClassW(&class);

        let hwnd = CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            PCWSTR(class_name.as_ptr()),
            PCWSTR::null(),
            WS_CHILD,
            bounds.x,
            bounds.y,
            bounds.width as i32,
            bounds.height as i32,
            parent,
            None,
            hinstance,
            None,
        )?;
        let _ = ShowWindow(hwnd, if visible { SW_SHOW } else { SW_HIDE });
        Ok(hwnd)
    }
}

fn client_rect(bounds: Viewport) -> RECT {
    RECT {
        left: 0,
        top: 0,
        right: bounds.width as i32,
        bottom: bounds.height as i32,
    }
}

fn take_string(f: impl FnOnce(&mut PWSTR) -> windows::core::Result<()>) -> Option<String> {
    let mut value = PWSTR::null();
    f(&mut value).ok()?;
    Some(take_pwstr(value))
}

fn response_headers(response: &http::Response<Vec<u8>>) -> String {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| format!("{}: {}", name, v)))
        .collect::<Vec<_>>()
        .join("\r\n")
}

impl NativeView for EdgeView {
    fn begin_environment(&mut self, parent: Option<&ParentWindow>, options: &EnvironmentOptions) -> Result<StepOutcome> {
        let Some(parent) = parent else {
            bail!("no parent window");
        };
        let RawWindowHandle::Win32(handle) = parent.window else {
            bail!("unsupported parent window {:?}", parent.window);
        };
        self.parent = Some(HWND(handle.hwnd.get() as *mut c_void));

        unsafe {
            let _ = CoInitializeEx(None, COINIT_APARTMENTTHREADED);
        }

        let sink = self.sink.clone();
        let handles = self.handles.clone();
        let handler = CreateCoreWebView2EnvironmentCompletedHandler::create(Box::new(move |result, environment| {
            let outcome = match (result, environment) {
                (Ok(()), Some(_)) if handles.borrow().released => Err("view released".to_string()),
                (Ok(()), Some(environment)) => {
                    if let Some(version) = take_string(|v| unsafe { environment.BrowserVersionString(v) }) {
                        log::info!("EdgeView: WebView2 runtime {}", version);
                    }
                    handles.borrow_mut().environment = Some(environment);
                    Ok(())
                }
                (Ok(()), None) => Err("no environment returned".to_string()),
                (Err(e), _) => Err(e.message().to_string()),
            };
            sink.post(BackendMessage::EnvironmentCreated(outcome));
            Ok(())
        }));

        let browser_dir = options.browser_dir.as_ref().map(|dir| HSTRING::from(dir.as_os_str()));
        let data_dir = HSTRING::from(options.cache_dir.as_os_str());
        let browser = browser_dir
            .as_ref()
            .map_or(PCWSTR::null(), |dir| PCWSTR(dir.as_ptr()));

        // SAFETY: both strings outlive the call, the loader AddRefs the handler.
        unsafe {
            (self.api.create_environment)(browser, PCWSTR(data_dir.as_ptr()), std::ptr::null_mut(), handler.as_raw())
                .ok()?;
        }
        Ok(StepOutcome::Pending)
    }

    fn begin_controller(&mut self, bounds: Viewport, visible: bool) -> Result<StepOutcome> {
        let environment = self.environment()?;
        let parent = self.parent.ok_or_else(|| anyhow!("no parent window"))?;
        let window = create_control_window(parent, bounds, visible)?;
        self.window = Some(window);

        let sink = self.sink.clone();
        let handles = self.handles.clone();
        let handler = CreateCoreWebView2ControllerCompletedHandler::create(Box::new(move |result, controller| {
            let outcome = match (result, controller) {
                (Ok(()), Some(controller)) if handles.borrow().released => {
                    log::debug!("EdgeView: controller arrived after release, closing it");
                    unsafe {
                        let _ = controller.Close();
                    }
                    Err("view released".to_string())
                }
                (Ok(()), Some(controller)) => unsafe {
                    let _ = controller.SetBounds(client_rect(bounds));
                    let _ = controller.SetIsVisible(BOOL::from(visible));
                    match controller.CoreWebView2() {
                        Ok(webview) => {
                            let mut handles = handles.borrow_mut();
                            handles.webview = Some(webview);
                            handles.controller = Some(controller);
                            Ok(())
                        }
                        Err(e) => Err(e.message().to_string()),
                    }
                },
                (Ok(()), None) => Err("no controller returned".to_string()),
                (Err(e), _) => Err(e.message().to_string()),
            };
            sink.post(BackendMessage::ControllerCreated(outcome));
            Ok(())
        }));

        unsafe { environment.CreateCoreWebView2Controller(window, &handler)? };
        Ok(StepOutcome::Pending)
    }

    fn install_bridge(&mut self, interceptor: Arc<ResourceInterceptor>) -> Result<CallbackTokens> {
        let webview = self.webview()?;
        let environment = self.environment()?;
        let mut tokens = CallbackTokens::new();

        unsafe {
            let sink = self.sink.clone();
            let handler = NavigationStartingEventHandler::create(Box::new(move |_, args| {
                let url = args.and_then(|args| take_string(|v| args.Uri(v)));
                sink.post(BackendMessage::Native(NativeEvent::NavigationStarting { url }));
                Ok(())
            }));
            let mut token = EventRegistrationToken::default();
            webview.add_NavigationStarting(&handler, &mut token)?;
            tokens.push(CallbackKind::NavigationStarting, token.value);

            let sink = self.sink.clone();
            let handler = NavigationCompletedEventHandler::create(Box::new(move |_, args| {
                let mut success = BOOL::default();
                if let Some(args) = args {
                    let _ = args.IsSuccess(&mut success);
                }
                sink.post(BackendMessage::Native(NativeEvent::NavigationCompleted {
                    success: success.as_bool(),
                }));
                Ok(())
            }));
            let mut token = EventRegistrationToken::default();
            webview.add_NavigationCompleted(&handler, &mut token)?;
            tokens.push(CallbackKind::NavigationCompleted, token.value);

            let sink = self.sink.clone();
            let handler = NewWindowRequestedEventHandler::create(Box::new(move |_, args| {
                if let Some(args) = args {
                    args.SetHandled(BOOL::from(true))?;
                    let url = take_string(|v| args.Uri(v)).unwrap_or_default();
                    sink.post(BackendMessage::Native(NativeEvent::NewWindowRequested { url }));
                }
                Ok(())
            }));
            let mut token = EventRegistrationToken::default();
            webview.add_NewWindowRequested(&handler, &mut token)?;
            tokens.push(CallbackKind::NewWindow, token.value);

            for scheme in interceptor.schemes().names() {
                let filter = HSTRING::from(format!("{}://*", scheme));
                webview.AddWebResourceRequestedFilter(&filter, COREWEBVIEW2_WEB_RESOURCE_CONTEXT_ALL)?;
            }
            let handler = WebResourceRequestedEventHandler::create(Box::new(move |_, args| {
                let Some(args) = args else { return Ok(()) };
                let request = args.Request()?;
                let Some(uri) = take_string(|v| request.Uri(v)) else {
                    return Ok(());
                };
                let response = interceptor.intercept(&ResourceRequest::new(uri));
                let stream: Option<IStream> = if response.body().is_empty() {
                    None
                } else {
                    SHCreateMemStream(Some(response.body().as_slice()))
                };
                let reason = HSTRING::from(response.status().canonical_reason().unwrap_or(""));
                let headers = HSTRING::from(response_headers(&response));
                let native = environment.CreateWebResourceResponse(
                    stream.as_ref(),
                    response.status().as_u16() as i32,
                    &reason,
                    &headers,
                )?;
                args.SetResponse(&native)?;
                Ok(())
            }));
            let mut token = EventRegistrationToken::default();
            webview.add_WebResourceRequested(&handler, &mut token)?;
            tokens.push(CallbackKind::ResourceRequested, token.value);

            let sink = self.sink.clone();
            let handler = WebMessageReceivedEventHandler::create(Box::new(move |_, args| {
                if let Some(body) = args.and_then(|args| take_string(|v| args.TryGetWebMessageAsString(v))) {
                    sink.post(BackendMessage::Native(NativeEvent::ScriptMessage { body }));
                }
                Ok(())
            }));
            let mut token = EventRegistrationToken::default();
            webview.add_WebMessageReceived(&handler, &mut token)?;
            tokens.push(CallbackKind::ScriptMessage, token.value);
        }

        Ok(tokens)
    }

    fn message_bridge_script(&self) -> Option<&'static str> {
        Some(MESSAGE_BRIDGE)
    }

    fn inject_scripts(&mut self, scripts: &[String]) -> Result<StepOutcome> {
        let webview = self.webview()?;
        if scripts.is_empty() {
            return Ok(StepOutcome::Complete);
        }

        let remaining = Rc::new(Cell::new(scripts.len()));
        let failed = Rc::new(Cell::new(false));
        for source in scripts {
            let sink = self.sink.clone();
            let remaining = remaining.clone();
            let failed = failed.clone();
            let handler = AddScriptToExecuteOnDocumentStartCompletedHandler::create(Box::new(move |result, _id| {
                if failed.get() {
                    return Ok(());
                }
                if let Err(e) = result {
                    failed.set(true);
                    sink.post(BackendMessage::ScriptsInjected(Err(e.message().to_string())));
                    return Ok(());
                }
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    sink.post(BackendMessage::ScriptsInjected(Ok(())));
                }
                Ok(())
            }));
            unsafe { webview.AddScriptToExecuteOnDocumentStart(&HSTRING::from(source.as_str()), &handler)? };
        }
        Ok(StepOutcome::Pending)
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        unsafe { self.webview()?.Navigate(&HSTRING::from(url))? };
        Ok(())
    }

    fn load_html(&mut self, html: &str, base_url: &str) -> Result<()> {
        if !base_url.is_empty() {
            log::debug!("EdgeView: base url {:?} ignored for inline documents", base_url);
        }
        unsafe { self.webview()?.NavigateToString(&HSTRING::from(html))? };
        Ok(())
    }

    fn execute_script(&mut self, script: &str) -> Result<()> {
        let handler = ExecuteScriptCompletedHandler::create(Box::new(|result, _| {
            if let Err(e) = result {
                log::warn!("EdgeView: script failed: {}", e.message());
            }
            Ok(())
        }));
        unsafe { self.webview()?.ExecuteScript(&HSTRING::from(script), &handler)? };
        Ok(())
    }

    fn url(&self) -> Option<String> {
        let webview = self.webview().ok()?;
        take_string(|v| unsafe { webview.Source(v) })
    }

    fn title(&self) -> Option<String> {
        let webview = self.webview().ok()?;
        take_string(|v| unsafe { webview.DocumentTitle(v) })
    }

    fn zoom(&self) -> Option<f64> {
        let controller = self.controller().ok()?;
        let mut zoom = 0.0;
        unsafe { controller.ZoomFactor(&mut zoom).ok()? };
        Some(zoom)
    }

    fn set_zoom(&mut self, zoom: f64) -> Result<()> {
        unsafe { self.controller()?.SetZoomFactor(zoom)? };
        Ok(())
    }

    fn set_user_agent(&mut self, user_agent: &str) -> Result<bool> {
        let settings = unsafe { self.webview()?.Settings()? };
        let Ok(settings) = settings.cast::<ICoreWebView2Settings2>() else {
            return Ok(false);
        };
        unsafe { settings.SetUserAgent(&HSTRING::from(user_agent))? };
        Ok(true)
    }

    fn set_transparent_background(&mut self, transparent: bool) -> Result<bool> {
        let Ok(controller) = self.controller()?.cast::<ICoreWebView2Controller2>() else {
            return Ok(false);
        };
        let color = if transparent {
            COREWEBVIEW2_COLOR { A: 0, R: 0, G: 0, B: 0 }
        } else {
            COREWEBVIEW2_COLOR {
                A: 255,
                R: 255,
                G: 255,
                B: 255,
            }
        };
        unsafe { controller.SetDefaultBackgroundColor(color)? };
        Ok(true)
    }

    fn can_go_back(&self) -> bool {
        let Ok(webview) = self.webview() else { return false };
        let mut result = BOOL::default();
        unsafe { webview.CanGoBack(&mut result).is_ok() && result.as_bool() }
    }

    fn can_go_forward(&self) -> bool {
        let Ok(webview) = self.webview() else { return false };
        let mut result = BOOL::default();
        unsafe { webview.CanGoForward(&mut result).is_ok() && result.as_bool() }
    }

    fn go_back(&mut self) -> Result<()> {
        unsafe { self.webview()?.GoBack()? };
        Ok(())
    }

    fn go_forward(&mut self) -> Result<()> {
        unsafe { self.webview()?.GoForward()? };
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        unsafe { self.webview()?.Reload()? };
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        unsafe { self.webview()?.Stop()? };
        Ok(())
    }

    fn set_bounds(&mut self, bounds: Viewport) -> Result<()> {
        let window = self.window.ok_or_else(|| anyhow!("no control window"))?;
        unsafe {
            MoveWindow(
                window,
                bounds.x,
                bounds.y,
                bounds.width as i32,
                bounds.height as i32,
                BOOL::from(true),
            )?;
            self.controller()?.SetBounds(client_rect(bounds))?;
        }
        Ok(())
    }

    fn set_visible(&mut self, visible: bool) -> Result<()> {
        if let Some(window) = self.window {
            unsafe {
                let _ = ShowWindow(window, if visible { SW_SHOW } else { SW_HIDE });
            }
        }
        unsafe { self.controller()?.SetIsVisible(BOOL::from(visible))? };
        Ok(())
    }

    fn capture_snapshot(&mut self, _width: u32) -> Result<()> {
        let webview = self.webview()?;
        let stream = unsafe { SHCreateMemStream(None) }.ok_or_else(|| anyhow!("could not allocate stream"))?;

        let sink = self.sink.clone();
        let target = stream.clone();
        let handler = CapturePreviewCompletedHandler::create(Box::new(move |result| {
            let outcome = match result {
                Ok(()) => read_stream(&target).map(RawCapture::Png),
                Err(e) => Err(e.message().to_string()),
            };
            sink.post(BackendMessage::SnapshotCaptured(outcome));
            Ok(())
        }));
        unsafe { webview.CapturePreview(COREWEBVIEW2_CAPTURE_PREVIEW_IMAGE_FORMAT_PNG, &stream, &handler)? };
        Ok(())
    }

    fn unsubscribe(&mut self, tokens: CallbackTokens) {
        let Ok(webview) = self.webview() else { return };
        for token in tokens {
            let registration = EventRegistrationToken { value: token.raw };
            let removed = unsafe {
                match token.kind {
                    CallbackKind::NavigationStarting => webview.remove_NavigationStarting(registration),
                    CallbackKind::NavigationCompleted => webview.remove_NavigationCompleted(registration),
                    CallbackKind::NewWindow => webview.remove_NewWindowRequested(registration),
                    CallbackKind::ResourceRequested => webview.remove_WebResourceRequested(registration),
                    CallbackKind::ScriptMessage => webview.remove_WebMessageReceived(registration),
                    CallbackKind::LoadChanged | CallbackKind::InsecureContent => Ok(()),
                }
            };
            if let Err(e) = removed {
                log::warn!("EdgeView: failed to remove {:?} handler: {}", token.kind, e.message());
            }
        }
    }

    fn release(&mut self) {
        let handles = std::mem::replace(&mut *self.handles.borrow_mut(), Handles::released());
        if let Some(controller) = handles.controller {
            unsafe {
                let _ = controller.Close();
            }
        }
        if let Some(window) = self.window.take() {
            unsafe {
                let _ = DestroyWindow(window);
            }
        }
    }
}

impl Drop for EdgeView {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_stream(stream: &IStream) -> std::result::Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];
    unsafe {
        stream.Seek(0, STREAM_SEEK_SET, None).map_err(|e| e.message().to_string())?;
        loop {
            let mut read = 0u32;
            stream
                .Read(chunk.as_mut_ptr() as *mut c_void, chunk.len() as u32, Some(&mut read))
                .ok()
                .map_err(|e| e.message().to_string())?;
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..read as usize]);
        }
    }
    Ok(bytes)
}
