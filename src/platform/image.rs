use anyhow::{bail, Result};

/// Snapshot image in canonical RGBA8, top-down, rows `stride` bytes apart.
#[derive(Clone, PartialEq, Eq)]
pub struct RgbaImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

impl RgbaImage {
    pub fn from_raw(pixels: Vec<u8>, width: u32, height: u32, stride: u32) -> Result<Self> {
        if (stride as usize) < (width as usize) * 4 {
            bail!("stride {} is too small for width {}", stride, width);
        }
        if pixels.len() < (height as usize) * (stride as usize) {
            bail!("pixel buffer too small for image dimensions");
        }

        Ok(Self {
            pixels,
            width,
            height,
            stride,
        })
    }

    /// Returns the RGBA quadruple at `(x, y)`, or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize) * (self.stride as usize) + (x as usize) * 4;
        let px = self.pixels.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

impl std::fmt::Debug for RgbaImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgbaImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.pixels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_checks_buffer_size() {
        assert!(RgbaImage::from_raw(vec![0; 7], 2, 1, 8).is_err());
        assert!(RgbaImage::from_raw(vec![0; 8], 2, 1, 4).is_err());

        let img = RgbaImage::from_raw(vec![1, 2, 3, 4, 5, 6, 7, 8], 2, 1, 8).unwrap();
        assert_eq!(img.pixel(1, 0), Some([5, 6, 7, 8]));
        assert_eq!(img.pixel(2, 0), None);
    }
}
