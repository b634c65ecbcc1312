//! V4L2 camera device.
//!
//! `V4l2Camera` opens a local device node (e.g. /dev/video0) through libv4l and
//! streams frames from memory-mapped buffers. It asks for packed RGB and falls
//! back to whatever the driver negotiates (YUYV or MJPEG are converted).
//!
//! Each `open()` produces an independent capture session; the session stops
//! streaming and closes the device node when released.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CameraDevice, FrameSource};
use crate::frame::Frame;

/// Configuration for a V4L2 device.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate. Drivers may ignore it.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 20,
            width: 640,
            height: 480,
        }
    }
}

pub struct V4l2Camera {
    config: V4l2Config,
}

impl V4l2Camera {
    pub fn new(config: V4l2Config) -> Self {
        Self { config }
    }
}

impl CameraDevice for V4l2Camera {
    fn describe(&self) -> String {
        self.config.device.clone()
    }

    fn open(&mut self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(V4l2Session::connect(&self.config)?))
    }
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Session {
    device_path: String,
    state: Option<V4l2State>,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl V4l2Session {
    fn connect(config: &V4l2Config) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&config.device)
            .with_context(|| format!("open v4l2 device {}", config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} negotiated unsupported pixel format {}",
                config.device,
                format.fourcc
            )
        })?;

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Camera: failed to set fps on {}: {}",
                    config.device,
                    err
                );
            }
        }

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Camera: opened {} ({}x{} {:?})",
            config.device,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            device_path: config.device.clone(),
            state: Some(state),
            format: pixel_format,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }
}

impl FrameSource for V4l2Session {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let (format, width, height) = (self.format, self.width, self.height);
        // Mapped buffers belong to the stream; convert before leaving the borrow.
        let (pixels, width, height) = state.with_mut(|fields| {
            let (buf, meta) = fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let payload = if used == 0 { buf } else { &buf[..used] };
            normalize_to_rgb(payload, width, height, format)
        })?;

        self.frame_count += 1;
        Ok(Some(Frame::from_rgb(
            width,
            height,
            pixels,
            self.frame_count,
        )?))
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Camera: released {} after {} frames",
                self.device_path,
                self.frame_count
            );
        }
    }
}
