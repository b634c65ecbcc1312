//! Image-directory replay.
//!
//! Plays back the JPEG/PNG files of a local directory in file-name order, as a
//! camera would deliver them. Useful for validating a model against captured
//! line footage. Frames are scaled to the size of the first image so that the
//! video sink sees constant dimensions. End-of-stream is reached after the
//! last file.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use image::imageops::{self, FilterType};

use super::{CameraDevice, FrameSource};
use crate::frame::Frame;

pub struct ReplayCamera {
    dir: PathBuf,
}

impl ReplayCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CameraDevice for ReplayCamera {
    fn describe(&self) -> String {
        format!("replay:{}", self.dir.display())
    }

    fn open(&mut self) -> Result<Box<dyn FrameSource>> {
        let files = list_images(&self.dir)?;
        let first = files
            .first()
            .ok_or_else(|| anyhow!("no .jpg/.jpeg/.png files in {}", self.dir.display()))?;
        let (width, height) = image::image_dimensions(first)
            .with_context(|| format!("read dimensions of {}", first.display()))?;
        log::info!(
            "ReplayCamera: opened {} ({} images, {}x{})",
            self.dir.display(),
            files.len(),
            width,
            height
        );
        Ok(Box::new(ReplaySource {
            files,
            next: 0,
            width,
            height,
        }))
    }
}

struct ReplaySource {
    files: Vec<PathBuf>,
    next: usize,
    width: u32,
    height: u32,
}

impl FrameSource for ReplaySource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        let mut image = image::open(path)
            .with_context(|| format!("decode {}", path.display()))?
            .into_rgb8();
        if image.dimensions() != (self.width, self.height) {
            image = imageops::resize(&image, self.width, self.height, FilterType::Triangle);
        }
        self.next += 1;
        Ok(Some(Frame::new(image, self.next as u64, Local::now())))
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn release(&mut self) {
        self.next = self.files.len();
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
            .unwrap_or(false);
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
