pub mod backend;
pub mod backends;
pub mod image;
pub mod viewport;

pub use backend::{CallbackKind, CallbackToken, CallbackTokens, NativeBackend, NativeView, StepOutcome};
pub use image::RgbaImage;
pub use viewport::Viewport;
