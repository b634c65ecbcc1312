//! Defect watch
//!
//! Inspects a live camera feed for manufacturing defects, draws detections
//! onto the video, records it, and alerts operators over Telegram and SMS.
//!
//! # Architecture
//!
//! - `acquire`: open the camera with bounded retry; `CameraHandle` owns it
//! - `pipeline`: the detection loop (read, detect, alert, annotate, record, show)
//! - `notify`: alert formatting, transports, and the bounded dispatcher
//!
//! Supporting modules:
//!
//! - `labels`: class id to defect name
//! - `frame`: `Frame` raster with capture time
//! - `detect`: detector trait, detections, backends (scripted, tract)
//! - `ingest`: camera devices (synthetic, image replay, V4L2)
//! - `annotate`: box and caption rendering
//! - `sink`: video recording, preview display, stop signal
//! - `config`: static configuration loaded once at startup
//!
//! Alert delivery never runs on the loop thread and only ever sees owned
//! label and timestamp data, so in-flight deliveries cannot outlive anything
//! they borrow.

pub mod acquire;
pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod labels;
pub mod notify;
pub mod pipeline;
pub mod sink;

pub use acquire::{acquire, acquire_with, AcquireError, CameraHandle, RetryPolicy};
pub use detect::{BoundingBox, Detection, DetectorBackend};
pub use frame::Frame;
pub use labels::{ClassId, LabelTable, UnknownClass};
pub use notify::{Alert, AlertSink, Dispatcher, Notifier, Submission};
pub use pipeline::{LoopContext, LoopExit, LoopSettings, LoopSummary, PipelineError};
