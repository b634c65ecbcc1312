//! Frame container.
//!
//! A `Frame` is one RGB raster pulled from the camera. It is owned by a single
//! loop iteration: captured, handed to the detector by reference, annotated in
//! place, then persisted and presented before being dropped.
//!
//! Nothing downstream of the loop (alert workers in particular) may hold a
//! frame. Alerts copy the capture timestamp out instead.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use image::RgbImage;

pub struct Frame {
    image: RgbImage,

    /// Sequence number assigned by the source, starting at 1.
    pub index: u64,

    /// Wall-clock capture instant.
    pub captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64, captured_at: DateTime<Local>) -> Self {
        Self {
            image,
            index,
            captured_at,
        }
    }

    /// Build a frame from packed RGB bytes (row-major, 3 bytes per pixel).
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("failed to wrap {}x{} RGB buffer", width, height))?;
        Ok(Self::new(image, index, Local::now()))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Packed RGB bytes, as handed to inference backends.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }
}
