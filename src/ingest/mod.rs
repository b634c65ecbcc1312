//! Camera devices.
//!
//! A `CameraDevice` knows how to open a capture session; a `FrameSource` is
//! the open session the detection loop reads from. Opening may fail
//! (unplugged, busy, permission denied) and is retried by the acquisition
//! layer; reading returns `Ok(None)` at end-of-stream.
//!
//! Devices:
//! - `stub://<name>`: synthetic frames (testing, demos)
//! - `replay:<dir>`: image-directory playback
//! - `/dev/videoN` or `N`: V4L2 capture (feature: ingest-v4l2)
//!
//! Sources never retain frames after handing them to the caller.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod replay;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use replay::ReplayCamera;
pub use synthetic::{SyntheticCamera, SyntheticConfig};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Camera, V4l2Config};

/// An open capture session.
pub trait FrameSource {
    /// Next frame in capture order, or `None` at end-of-stream.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Dimensions of the frames this session produces.
    fn dimensions(&self) -> (u32, u32);

    /// Stop capturing and give the device back. Must be idempotent.
    fn release(&mut self);
}

/// Something that can be opened into a `FrameSource`.
pub trait CameraDevice {
    /// Human-readable device name for logs.
    fn describe(&self) -> String;

    /// Try once to open the device.
    fn open(&mut self) -> Result<Box<dyn FrameSource>>;
}

/// Requested capture geometry, used by devices that negotiate a format.
#[derive(Clone, Copy, Debug)]
pub struct CaptureGeometry {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

/// Build the camera device named by `device`.
pub fn camera_for(device: &str, geometry: CaptureGeometry) -> Result<Box<dyn CameraDevice>> {
    if device.starts_with("stub://") {
        return Ok(Box::new(SyntheticCamera::new(SyntheticConfig {
            name: device.to_string(),
            width: geometry.width,
            height: geometry.height,
            frame_limit: None,
        })));
    }
    if let Some(dir) = device.strip_prefix("replay:") {
        return Ok(Box::new(ReplayCamera::new(dir)));
    }
    v4l2_camera(&device_path(device), geometry)
}

/// Map a bare index ("0") to its device node; pass paths through.
pub fn device_path(device: &str) -> String {
    if !device.is_empty() && device.chars().all(|c| c.is_ascii_digit()) {
        format!("/dev/video{}", device)
    } else {
        device.to_string()
    }
}

#[cfg(feature = "ingest-v4l2")]
fn v4l2_camera(device: &str, geometry: CaptureGeometry) -> Result<Box<dyn CameraDevice>> {
    Ok(Box::new(V4l2Camera::new(V4l2Config {
        device: device.to_string(),
        target_fps: geometry.target_fps,
        width: geometry.width,
        height: geometry.height,
    })))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn v4l2_camera(device: &str, _geometry: CaptureGeometry) -> Result<Box<dyn CameraDevice>> {
    Err(anyhow::anyhow!(
        "capturing from {} requires the ingest-v4l2 feature \
         (rebuild with --features ingest-v4l2, or use --device stub://<name> or replay:<dir>)",
        device
    ))
}
