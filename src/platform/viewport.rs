//! Viewport definition for native view placement.
//!
//! A [`Viewport`] is the rectangle an overlay occupies inside its host window, given by
//! its top-left corner `(x, y)` and its `width`/`height`. The host reports it in physical
//! pixels; backends that place the view in logical units convert it with
//! [`Viewport::to_logical`].
//!
//! # Examples
//!
//! ```
//! use webview_overlay::platform::Viewport;
//!
//! let mut vp = Viewport::new(0, 0, 800, 600);
//! vp.resize(1024, 768);
//! vp.translate(10, 20);
//! assert_eq!(vp.width, 1024);
//! assert_eq!(vp.x, 10);
//!
//! let logical = Viewport::new(100, 50, 400, 300).to_logical(2.0);
//! assert_eq!(logical, Viewport::new(50, 25, 200, 150));
//! ```

/// Position and size of the native view inside the host window.
#[derive(Clone, Eq, PartialEq, Copy, Default)]
pub struct Viewport {
    /// Horizontal offset in pixels from the window origin.
    pub x: i32,

    /// Vertical offset in pixels from the window origin.
    pub y: i32,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,
}

impl std::fmt::Debug for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Viewport {{ x: {}, y: {}, width: {}, height: {} }}",
            self.x, self.y, self.width, self.height
        )
    }
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Moves the viewport's origin to `(x, y)` in pixels.
    pub fn translate(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Divides every component by the host's screen scale.
    ///
    /// A non-positive or non-finite scale leaves the viewport untouched.
    pub fn to_logical(&self, scale: f32) -> Viewport {
        if !scale.is_finite() || scale <= 0.0 {
            return *self;
        }
        Viewport {
            x: (self.x as f32 / scale).round() as i32,
            y: (self.y as f32 / scale).round() as i32,
            width: (self.width as f32 / scale).round() as u32,
            height: (self.height as f32 / scale).round() as u32,
        }
    }
}
