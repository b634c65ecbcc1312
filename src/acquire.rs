//! Camera acquisition with bounded retry.
//!
//! `acquire` tries to open the camera up to `max_attempts` times, sleeping
//! `delay` between attempts (not after the last one). Exhaustion is reported
//! as `AcquireError::Exhausted`; the daemon treats it as fatal and exits with
//! a non-zero status.
//!
//! A successful open yields a `CameraHandle`, the only owner of the capture
//! session. The handle releases the device exactly once: through `release()`
//! or, failing that, on drop.

use std::time::Duration;

use anyhow::Result;

use crate::frame::Frame;
use crate::ingest::{CameraDevice, FrameSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("camera {device} could not be opened after {attempts} attempts: {last_error}")]
    Exhausted {
        device: String,
        attempts: u32,
        last_error: String,
    },
}

/// Open the camera, retrying per `policy` with a real sleep between attempts.
pub fn acquire(
    device: &mut dyn CameraDevice,
    policy: &RetryPolicy,
) -> Result<CameraHandle, AcquireError> {
    acquire_with(device, policy, std::thread::sleep)
}

/// Same as [`acquire`], with the sleep injected.
pub fn acquire_with(
    device: &mut dyn CameraDevice,
    policy: &RetryPolicy,
    mut sleep: impl FnMut(Duration),
) -> Result<CameraHandle, AcquireError> {
    let name = device.describe();
    let mut last_error = String::from("no attempt made");
    for attempt in 1..=policy.max_attempts {
        log::info!(
            "opening camera {} (attempt {}/{})",
            name,
            attempt,
            policy.max_attempts
        );
        match device.open() {
            Ok(source) => {
                let (width, height) = source.dimensions();
                log::info!("camera {} opened ({}x{})", name, width, height);
                return Ok(CameraHandle::new(name, source));
            }
            Err(err) => {
                log::warn!("error opening camera {}: {:#}", name, err);
                last_error = format!("{:#}", err);
                if attempt < policy.max_attempts {
                    log::info!("retrying in {:?}", policy.delay);
                    sleep(policy.delay);
                }
            }
        }
    }
    log::error!("max retry attempts reached for camera {}", name);
    Err(AcquireError::Exhausted {
        device: name,
        attempts: policy.max_attempts,
        last_error,
    })
}

/// Exclusive owner of an open capture session.
pub struct CameraHandle {
    name: String,
    source: Box<dyn FrameSource>,
    released: bool,
}

impl CameraHandle {
    fn new(name: String, source: Box<dyn FrameSource>) -> Self {
        Self {
            name,
            source,
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.source.dimensions()
    }

    /// Next frame, or `None` at end-of-stream (and always after release).
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.released {
            return Ok(None);
        }
        self.source.read_frame()
    }

    /// Give the device back.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.source.release();
            log::info!("camera {} released", self.name);
        }
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        self.release_inner();
    }
}
