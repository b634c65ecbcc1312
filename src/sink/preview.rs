//! Operator display surfaces.
//!
//! `PreviewDisplay` keeps a JPEG of the latest annotated frame on disk. The
//! file is replaced atomically (write to a sibling temp file, then rename), so
//! viewers that poll it never see a torn image. `HeadlessDisplay` is used when
//! no preview path is configured.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;

use super::DisplaySink;
use crate::frame::Frame;

pub struct PreviewDisplay {
    path: PathBuf,
    tmp_path: PathBuf,
    quality: u8,
    presented: u64,
}

impl PreviewDisplay {
    pub fn new<P: AsRef<Path>>(path: P, quality: u8) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("preview path {} has no file name", path.display()))?;
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        log::info!("preview display writing to {}", path.display());
        Ok(Self {
            path,
            tmp_path,
            quality: quality.clamp(1, 100),
            presented: 0,
        })
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl DisplaySink for PreviewDisplay {
    fn present(&mut self, frame: &Frame) -> Result<()> {
        {
            let file = File::create(&self.tmp_path)
                .with_context(|| format!("create preview {}", self.tmp_path.display()))?;
            let mut out = BufWriter::new(file);
            JpegEncoder::new_with_quality(&mut out, self.quality)
                .encode_image(frame.image())
                .map_err(|err| anyhow!("preview encode failed: {err}"))?;
        }
        std::fs::rename(&self.tmp_path, &self.path)
            .with_context(|| format!("replace preview {}", self.path.display()))?;
        self.presented += 1;
        Ok(())
    }

    fn teardown(&mut self) {
        let _ = std::fs::remove_file(&self.tmp_path);
        log::info!(
            "preview display closed after {} frames ({})",
            self.presented,
            self.path.display()
        );
    }
}

#[derive(Default)]
pub struct HeadlessDisplay {
    presented: u64,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DisplaySink for HeadlessDisplay {
    fn present(&mut self, _frame: &Frame) -> Result<()> {
        self.presented += 1;
        Ok(())
    }

    fn teardown(&mut self) {
        log::debug!("headless display presented {} frames", self.presented);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_replaces_jpeg_on_each_present() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("preview.jpg");
        let mut display = PreviewDisplay::new(&path, 75)?;

        let frame = Frame::from_rgb(8, 8, vec![90u8; 8 * 8 * 3], 1)?;
        display.present(&frame)?;
        display.present(&frame)?;
        display.teardown();

        assert_eq!(display.presented(), 2);
        let decoded = image::open(&path)?;
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
        assert!(!dir.path().join("preview.jpg.tmp").exists());
        Ok(())
    }
}
