//! Detection loop.
//!
//! One thread, one frame at a time, in capture order:
//!
//! 1. read a frame from the camera (`None` ends the loop)
//! 2. run the detector
//! 3. per detection, in detector order: resolve the label, submit an alert,
//!    draw the overlay
//! 4. append the frame to the recording
//! 5. present the frame
//! 6. poll for a stop request
//!
//! Whatever the exit path, the camera is released, the recording closed and
//! the display torn down before `run` returns.
//!
//! Class ids missing from the label table are reported under
//! `unknown_class_<id>` and otherwise handled like any other detection.
//! Detector errors skip that frame's detections; the frame is still recorded
//! and shown. Too many consecutive detector errors abort the loop with
//! `PipelineError::DetectorFailed`.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::acquire::CameraHandle;
use crate::annotate::annotate;
use crate::detect::DetectorBackend;
use crate::frame::Frame;
use crate::labels::{ClassId, LabelTable};
use crate::notify::{Alert, AlertSink, Submission};
use crate::sink::{DisplaySink, StopPoll, VideoSink};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// How long each iteration waits for a stop request.
    pub stop_poll: Duration,
    pub max_consecutive_detect_failures: u32,
    /// Stop after this many frames, as if the operator had asked.
    pub max_frames: Option<u64>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            stop_poll: Duration::from_millis(1),
            max_consecutive_detect_failures: 30,
            max_frames: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// The camera reported no more frames.
    EndOfStream,
    /// Reading a frame failed; treated as the end of the stream.
    CaptureFailed,
    UserStop,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub detections: u64,
    pub alerts_queued: u64,
    pub alerts_dropped: u64,
    pub detect_failures: u64,
    pub unknown_classes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopSummary {
    pub exit: LoopExit,
    pub stats: LoopStats,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("detector failed on {consecutive} consecutive frames")]
    DetectorFailed { consecutive: u32 },
}

/// Collaborators the loop drives. Everything here is owned by the caller and
/// used from the loop thread only.
pub struct LoopContext<'a> {
    pub detector: &'a mut dyn DetectorBackend,
    pub labels: &'a LabelTable,
    pub alerts: &'a dyn AlertSink,
    pub video: &'a mut dyn VideoSink,
    pub display: &'a mut dyn DisplaySink,
    pub stop: &'a mut dyn StopPoll,
}

/// Run the loop until end-of-stream or a stop request, then clean up.
pub fn run(
    mut handle: CameraHandle,
    ctx: LoopContext<'_>,
    settings: &LoopSettings,
) -> Result<LoopSummary> {
    let LoopContext {
        detector,
        labels,
        alerts,
        video,
        display,
        stop,
    } = ctx;

    log::info!(
        "detection loop started: camera={} detector={} labels={}",
        handle.name(),
        detector.name(),
        labels.len()
    );

    let mut stats = LoopStats::default();
    let outcome = drive(
        &mut handle,
        detector,
        labels,
        alerts,
        video,
        display,
        stop,
        settings,
        &mut stats,
    );

    handle.release();
    let closed = video.close().context("close video output");
    display.teardown();

    log::info!(
        "detection loop finished: frames={} detections={} alerts_queued={} alerts_dropped={} detect_failures={}",
        stats.frames,
        stats.detections,
        stats.alerts_queued,
        stats.alerts_dropped,
        stats.detect_failures
    );

    let exit = match outcome {
        Ok(exit) => exit,
        Err(err) => {
            if let Err(close_err) = closed {
                log::error!("{:#}", close_err);
            }
            return Err(err);
        }
    };
    closed?;
    Ok(LoopSummary { exit, stats })
}

#[allow(clippy::too_many_arguments)]
fn drive(
    handle: &mut CameraHandle,
    detector: &mut dyn DetectorBackend,
    labels: &LabelTable,
    alerts: &dyn AlertSink,
    video: &mut dyn VideoSink,
    display: &mut dyn DisplaySink,
    stop: &mut dyn StopPoll,
    settings: &LoopSettings,
    stats: &mut LoopStats,
) -> Result<LoopExit> {
    let mut consecutive_failures = 0u32;
    let mut last_health_log = Instant::now();

    loop {
        let mut frame = match handle.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("end of stream from {}", handle.name());
                return Ok(LoopExit::EndOfStream);
            }
            Err(err) => {
                log::warn!("frame read from {} failed: {:#}", handle.name(), err);
                return Ok(LoopExit::CaptureFailed);
            }
        };
        stats.frames += 1;

        match detector.detect(&frame) {
            Ok(detections) => {
                consecutive_failures = 0;
                for detection in &detections {
                    let label = resolve_label(labels, detection.class_id, stats);
                    match alerts.submit(Alert::new(label.as_str(), frame.captured_at)) {
                        Submission::Queued => stats.alerts_queued += 1,
                        Submission::Dropped => stats.alerts_dropped += 1,
                    }
                    annotate(&mut frame, detection, &label);
                    stats.detections += 1;
                }
            }
            Err(err) => {
                consecutive_failures += 1;
                stats.detect_failures += 1;
                log::warn!(
                    "detector {} failed on frame {} ({} in a row): {:#}",
                    detector.name(),
                    frame.index,
                    consecutive_failures,
                    err
                );
                if consecutive_failures >= settings.max_consecutive_detect_failures {
                    return Err(PipelineError::DetectorFailed {
                        consecutive: consecutive_failures,
                    }
                    .into());
                }
            }
        }

        persist_and_present(&frame, video, display)?;

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            log::info!(
                "loop health: frames={} detections={} alerts_queued={} alerts_dropped={}",
                stats.frames,
                stats.detections,
                stats.alerts_queued,
                stats.alerts_dropped
            );
            last_health_log = Instant::now();
        }

        if stop.poll_stop(settings.stop_poll) {
            log::info!("stop requested");
            return Ok(LoopExit::UserStop);
        }
        if settings.max_frames.is_some_and(|max| stats.frames >= max) {
            log::info!("frame limit {} reached", stats.frames);
            return Ok(LoopExit::UserStop);
        }
    }
}

fn resolve_label(labels: &LabelTable, class_id: ClassId, stats: &mut LoopStats) -> String {
    match labels.resolve(class_id) {
        Ok(label) => label.to_string(),
        Err(err) => {
            stats.unknown_classes += 1;
            let substitute = LabelTable::unknown_label(class_id);
            log::warn!("{}; reporting as {}", err, substitute);
            substitute
        }
    }
}

fn persist_and_present(
    frame: &Frame,
    video: &mut dyn VideoSink,
    display: &mut dyn DisplaySink,
) -> Result<()> {
    video
        .append(frame)
        .with_context(|| format!("persist frame {}", frame.index))?;
    display
        .present(frame)
        .with_context(|| format!("present frame {}", frame.index))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::{acquire_with, RetryPolicy};
    use crate::detect::{BoundingBox, Detection};
    use crate::ingest::{SyntheticCamera, SyntheticConfig};
    use std::cell::RefCell;

    #[derive(Default)]
    struct Alerts {
        labels: RefCell<Vec<String>>,
    }

    impl AlertSink for Alerts {
        fn submit(&self, alert: Alert) -> Submission {
            self.labels.borrow_mut().push(alert.label);
            Submission::Queued
        }
    }

    #[derive(Default)]
    struct Video {
        appended: Vec<u64>,
        closed: u32,
    }

    impl VideoSink for Video {
        fn append(&mut self, frame: &Frame) -> Result<()> {
            self.appended.push(frame.index);
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closed += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Display {
        presented: u64,
        torn_down: u32,
    }

    impl DisplaySink for Display {
        fn present(&mut self, _frame: &Frame) -> Result<()> {
            self.presented += 1;
            Ok(())
        }

        fn teardown(&mut self) {
            self.torn_down += 1;
        }
    }

    struct Never;

    impl StopPoll for Never {
        fn poll_stop(&mut self, _timeout: Duration) -> bool {
            false
        }
    }

    /// Returns the queued outcome per frame, in order.
    struct Script(Vec<Result<Vec<Detection>, String>>);

    impl DetectorBackend for Script {
        fn name(&self) -> &'static str {
            "script"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            if self.0.is_empty() {
                return Ok(Vec::new());
            }
            self.0.remove(0).map_err(anyhow::Error::msg)
        }
    }

    fn handle(frames: u64) -> CameraHandle {
        let mut camera = SyntheticCamera::new(SyntheticConfig {
            name: "stub://pipeline".to_string(),
            width: 64,
            height: 48,
            frame_limit: Some(frames),
        });
        acquire_with(&mut camera, &RetryPolicy::default(), |_| {}).unwrap()
    }

    fn detection(class_id: i64) -> Detection {
        Detection::new(BoundingBox::new(4.0, 4.0, 40.0, 30.0), class_id, 0.9)
    }

    #[test]
    fn unknown_class_is_reported_under_substitute_label() {
        let mut detector = Script(vec![Ok(vec![detection(2), detection(42)])]);
        let labels = LabelTable::default();
        let alerts = Alerts::default();
        let mut video = Video::default();
        let mut display = Display::default();

        let summary = run(
            handle(1),
            LoopContext {
                detector: &mut detector,
                labels: &labels,
                alerts: &alerts,
                video: &mut video,
                display: &mut display,
                stop: &mut Never,
            },
            &LoopSettings::default(),
        )
        .unwrap();

        assert_eq!(summary.exit, LoopExit::EndOfStream);
        assert_eq!(summary.stats.unknown_classes, 1);
        assert_eq!(
            *alerts.labels.borrow(),
            vec!["headlight_defect".to_string(), "unknown_class_42".to_string()]
        );
    }

    #[test]
    fn detector_error_skips_only_that_frame() {
        let mut detector = Script(vec![
            Err("inference timeout".to_string()),
            Ok(vec![detection(0)]),
        ]);
        let labels = LabelTable::default();
        let alerts = Alerts::default();
        let mut video = Video::default();
        let mut display = Display::default();

        let summary = run(
            handle(3),
            LoopContext {
                detector: &mut detector,
                labels: &labels,
                alerts: &alerts,
                video: &mut video,
                display: &mut display,
                stop: &mut Never,
            },
            &LoopSettings::default(),
        )
        .unwrap();

        assert_eq!(summary.stats.detect_failures, 1);
        assert_eq!(summary.stats.detections, 1);
        assert_eq!(video.appended, vec![1, 2, 3]);
        assert_eq!(display.presented, 3);
    }

    #[test]
    fn repeated_detector_errors_abort_after_cleanup() {
        let mut detector = Script(vec![
            Err("a".to_string()),
            Err("b".to_string()),
            Err("c".to_string()),
        ]);
        let labels = LabelTable::default();
        let alerts = Alerts::default();
        let mut video = Video::default();
        let mut display = Display::default();
        let settings = LoopSettings {
            max_consecutive_detect_failures: 3,
            ..LoopSettings::default()
        };

        let err = run(
            handle(10),
            LoopContext {
                detector: &mut detector,
                labels: &labels,
                alerts: &alerts,
                video: &mut video,
                display: &mut display,
                stop: &mut Never,
            },
            &settings,
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::DetectorFailed { consecutive: 3 })
        ));
        assert_eq!(video.closed, 1);
        assert_eq!(display.torn_down, 1);
    }

    #[test]
    fn frame_limit_counts_as_user_stop() {
        let mut detector = Script(Vec::new());
        let labels = LabelTable::default();
        let alerts = Alerts::default();
        let mut video = Video::default();
        let mut display = Display::default();
        let settings = LoopSettings {
            max_frames: Some(4),
            ..LoopSettings::default()
        };

        let summary = run(
            handle(100),
            LoopContext {
                detector: &mut detector,
                labels: &labels,
                alerts: &alerts,
                video: &mut video,
                display: &mut display,
                stop: &mut Never,
            },
            &settings,
        )
        .unwrap();

        assert_eq!(summary.exit, LoopExit::UserStop);
        assert_eq!(summary.stats.frames, 4);
    }
}
