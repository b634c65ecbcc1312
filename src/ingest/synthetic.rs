//! Synthetic camera (`stub://` devices).
//!
//! Produces a moving gradient so that downstream stages (detection, overlay,
//! video persistence) can be exercised without hardware. An optional frame
//! limit turns the stream finite, which makes it behave like a source that
//! reaches end-of-stream.

use anyhow::{anyhow, Result};

use super::{CameraDevice, FrameSource};
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// End-of-stream after this many frames. `None` streams forever.
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://camera".to_string(),
            width: 640,
            height: 480,
            frame_limit: None,
        }
    }
}

pub struct SyntheticCamera {
    config: SyntheticConfig,
    failing_opens: u32,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            failing_opens: 0,
        }
    }

    /// Make the first `count` open attempts fail, as an unplugged camera would.
    pub fn with_failing_opens(mut self, count: u32) -> Self {
        self.failing_opens = count;
        self
    }
}

impl CameraDevice for SyntheticCamera {
    fn describe(&self) -> String {
        self.config.name.clone()
    }

    fn open(&mut self) -> Result<Box<dyn FrameSource>> {
        if self.failing_opens > 0 {
            self.failing_opens -= 1;
            return Err(anyhow!("{} is not available", self.config.name));
        }
        if self.config.width == 0 || self.config.height == 0 {
            return Err(anyhow!("synthetic camera needs non-zero dimensions"));
        }
        log::info!("SyntheticCamera: opened {}", self.config.name);
        Ok(Box::new(SyntheticSource {
            config: self.config.clone(),
            frame_count: 0,
            scene_state: 0,
            released: false,
        }))
    }
}

struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    /// Shifts every 50 frames so consecutive scenes differ.
    scene_state: u8,
    released: bool,
}

impl SyntheticSource {
    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.released {
            return Ok(None);
        }
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::from_rgb(
            self.config.width,
            self.config.height,
            pixels,
            self.frame_count,
        )
        .map(Some)
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn release(&mut self) {
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(limit: Option<u64>) -> SyntheticConfig {
        SyntheticConfig {
            name: "stub://test".to_string(),
            width: 16,
            height: 8,
            frame_limit: limit,
        }
    }

    #[test]
    fn synthetic_source_produces_frames() -> Result<()> {
        let mut camera = SyntheticCamera::new(small_config(None));
        let mut source = camera.open()?;

        let frame = source.read_frame()?.expect("frame");
        assert_eq!(frame.dimensions(), (16, 8));
        assert_eq!(frame.index, 1);
        assert_eq!(source.dimensions(), (16, 8));
        Ok(())
    }

    #[test]
    fn synthetic_source_ends_at_limit() -> Result<()> {
        let mut camera = SyntheticCamera::new(small_config(Some(2)));
        let mut source = camera.open()?;

        assert!(source.read_frame()?.is_some());
        assert!(source.read_frame()?.is_some());
        assert!(source.read_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn failing_opens_are_consumed() {
        let mut camera = SyntheticCamera::new(small_config(None)).with_failing_opens(2);
        assert!(camera.open().is_err());
        assert!(camera.open().is_err());
        assert!(camera.open().is_ok());
    }

    #[test]
    fn released_source_reports_end_of_stream() -> Result<()> {
        let mut camera = SyntheticCamera::new(small_config(None));
        let mut source = camera.open()?;
        source.release();
        assert!(source.read_frame()?.is_none());
        Ok(())
    }
}
