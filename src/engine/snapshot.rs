//! Snapshot pipeline.
//!
//! A capture is requested from the native view and completes later with a
//! [`RawCapture`]: either encoded PNG bytes (WebView2) or a packed 32-bit pixel surface
//! (WebKitGTK). Both are normalized to an [`RgbaImage`] before the host sees them.
//!
//! Packed surfaces are little-endian native-endian words, so in memory:
//!
//! | format | bytes         | output            |
//! |--------|---------------|-------------------|
//! | ARGB32 | `B, G, R, A`  | `R, G, B, A`      |
//! | RGB24  | `B, G, R, x`  | `R, G, B, 255`    |
//!
//! Alpha is passed through untouched. At most one capture is in flight per overlay; a
//! second request is rejected with [`OverlayError::SnapshotInFlight`].

use std::io::Cursor;
use std::time::Instant;

use anyhow::{anyhow, bail, Result};

use crate::engine::errors::OverlayError;
use crate::engine::events::OverlayEvent;
use crate::platform::RgbaImage;

/// Pixel layout of a raw surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Argb32,
    Rgb24,
    /// Anything else the engine handed us, with its native format code.
    Other(i32),
}

/// What a native capture completes with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawCapture {
    Png(Vec<u8>),
    Pixels {
        format: SourceFormat,
        width: u32,
        height: u32,
        stride: u32,
        data: Vec<u8>,
    },
}

impl RawCapture {
    pub fn into_image(self) -> Result<RgbaImage> {
        match self {
            RawCapture::Png(bytes) => decode_png(&bytes),
            RawCapture::Pixels {
                format,
                width,
                height,
                stride,
                data,
            } => normalize_pixels(format, width, height, stride, &data),
        }
    }
}

/// Converts a packed surface into top-down RGBA8 with a tight stride.
pub fn normalize_pixels(format: SourceFormat, width: u32, height: u32, stride: u32, data: &[u8]) -> Result<RgbaImage> {
    let row_len = (width as usize) * 4;
    if (stride as usize) < row_len {
        bail!("stride {} is too small for width {}", stride, width);
    }
    if height > 0 && data.len() < (height as usize - 1) * (stride as usize) + row_len {
        bail!("surface buffer holds {} bytes, too small for {}x{}", data.len(), width, height);
    }

    let mut out = vec![0u8; row_len * height as usize];
    for y in 0..height as usize {
        let src = &data[y * stride as usize..y * stride as usize + row_len];
        let dst = &mut out[y * row_len..(y + 1) * row_len];
        match format {
            SourceFormat::Argb32 => {
                for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                    d[0] = s[2];
                    d[1] = s[1];
                    d[2] = s[0];
                    d[3] = s[3];
                }
            }
            SourceFormat::Rgb24 => {
                for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                    d[0] = s[2];
                    d[1] = s[1];
                    d[2] = s[0];
                    d[3] = 255;
                }
            }
            SourceFormat::Other(code) => bail!("unsupported surface format {}", code),
        }
    }

    RgbaImage::from_raw(out, width, height, width * 4)
}

/// Decodes PNG bytes into RGBA8. Palette, grayscale and 16-bit images are expanded.
pub fn decode_png(bytes: &[u8]) -> Result<RgbaImage> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf)?;
    buf.truncate(info.buffer_size());

    let pixel_count = (info.width as usize) * (info.height as usize);
    let rgba = match info.color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::Rgb => {
            let mut out = Vec::with_capacity(pixel_count * 4);
            for px in buf.chunks_exact(3) {
                out.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
            out
        }
        png::ColorType::GrayscaleAlpha => {
            let mut out = Vec::with_capacity(pixel_count * 4);
            for px in buf.chunks_exact(2) {
                out.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
            }
            out
        }
        png::ColorType::Grayscale => {
            let mut out = Vec::with_capacity(pixel_count * 4);
            for &g in &buf {
                out.extend_from_slice(&[g, g, g, 255]);
            }
            out
        }
        png::ColorType::Indexed => return Err(anyhow!("palette was not expanded")),
    };

    RgbaImage::from_raw(rgba, info.width, info.height, info.width * 4)
}

#[derive(Debug, Clone, Copy)]
pub struct PendingSnapshot {
    /// Requested width. Reserved; backends capture at view size.
    pub width: u32,
    pub requested_at: Instant,
}

/// Tracks the single in-flight capture of one overlay.
#[derive(Debug, Default)]
pub struct SnapshotPipeline {
    pending: Option<PendingSnapshot>,
}

impl SnapshotPipeline {
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn begin(&mut self, width: u32) -> Result<(), OverlayError> {
        if self.pending.is_some() {
            return Err(OverlayError::SnapshotInFlight);
        }
        self.pending = Some(PendingSnapshot {
            width,
            requested_at: Instant::now(),
        });
        Ok(())
    }

    /// Drops the pending capture, e.g. when the backend refused to start it.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Turns a completion into the host notification. Completions nobody waits for are
    /// ignored.
    pub fn complete(&mut self, result: Result<RawCapture, String>) -> Option<OverlayEvent> {
        let Some(pending) = self.pending.take() else {
            log::debug!("Snapshot completion without a pending request, ignored");
            return None;
        };

        let image = result.and_then(|raw| raw.into_image().map_err(|e| e.to_string()));
        match image {
            Ok(image) => {
                log::debug!(
                    "Snapshot {}x{} ready after {:?}",
                    image.width,
                    image.height,
                    pending.requested_at.elapsed()
                );
                Some(OverlayEvent::SnapshotReady { image })
            }
            Err(reason) => {
                log::error!("Snapshot failed: {}", reason);
                Some(OverlayEvent::SnapshotFailed { reason })
            }
        }
    }
}
