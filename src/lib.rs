//! Embedded native web-view overlay.
//!
//! An [`Overlay`] is a host-side control that owns one operating-system web view
//! (WebView2 on Windows, WebKitGTK on Linux) and keeps it positioned over the host
//! window. The host drives the overlay through lifecycle notifications and property
//! setters; the overlay reports navigation, script callbacks and snapshots back through
//! a broadcast event channel.
//!
//! The crate is split in two layers:
//!
//! - [`engine`]: platform-agnostic state, the init state machine, resource routing,
//!   the event bridge and snapshot normalization.
//! - [`platform`]: the native backends and the traits the engine drives them through.

pub mod engine;
pub mod platform;

pub use engine::*;
