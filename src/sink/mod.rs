//! Output side of the detection loop.
//!
//! - `VideoSink`: persisted recording (MJPEG AVI)
//! - `DisplaySink`: what the operator looks at (JPEG preview or headless)
//! - `StopPoll`: operator stop requests (Ctrl-C, `q` on stdin)
//!
//! All three are owned and driven by the loop thread only.

pub mod avi;
pub mod preview;
pub mod stop;

use std::time::Duration;

use anyhow::Result;

use crate::frame::Frame;

pub use avi::AviMjpegWriter;
pub use preview::{HeadlessDisplay, PreviewDisplay};
pub use stop::StopSignal;

pub trait VideoSink {
    fn append(&mut self, frame: &Frame) -> Result<()>;

    /// Finalise the container. Further appends fail.
    fn close(&mut self) -> Result<()>;
}

pub trait DisplaySink {
    fn present(&mut self, frame: &Frame) -> Result<()>;

    fn teardown(&mut self);
}

pub trait StopPoll {
    /// Wait up to `timeout` for a stop request.
    fn poll_stop(&mut self, timeout: Duration) -> bool;
}
