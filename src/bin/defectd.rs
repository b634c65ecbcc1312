//! defectd - defect detection daemon
//!
//! This daemon:
//! 1. Opens the camera, retrying a bounded number of times
//! 2. Runs the detector on every frame
//! 3. Alerts operators per detection (Telegram, SMS) off the loop thread
//! 4. Draws detections, records the video and shows a live preview
//! 5. Stops on end-of-stream, Ctrl-C, or `q` on stdin
//!
//! Exit codes: 0 on a normal stop, 1 when the camera cannot be opened,
//! 2 when the detector keeps failing.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use defect_watch::config::DefectConfig;
use defect_watch::ingest::camera_for;
use defect_watch::notify::Dispatcher;
use defect_watch::sink::{
    AviMjpegWriter, DisplaySink, HeadlessDisplay, PreviewDisplay, StopSignal,
};
use defect_watch::{acquire, AcquireError, LoopContext, PipelineError};

const EXIT_CAMERA_UNAVAILABLE: i32 = 1;
const EXIT_DETECTOR_FAILED: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about = "Camera defect detection with operator alerts")]
struct Args {
    /// JSON or TOML configuration file.
    #[arg(long, env = "DEFECT_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Camera: index, /dev/videoN, stub://<name> or replay:<dir>.
    /// Indexes and device nodes need a build with `--features ingest-v4l2`.
    #[arg(long)]
    device: Option<String>,

    /// Recorded video (MJPEG AVI).
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Live preview JPEG, rewritten every frame.
    #[arg(long, value_name = "PATH")]
    preview: Option<PathBuf>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = DefectConfig::load_from(args.config.as_deref())?;
    if let Some(device) = args.device {
        cfg.camera.device = device;
    }
    if let Some(output) = args.output {
        cfg.output.video_path = output;
    }
    if let Some(preview) = args.preview {
        cfg.output.preview_path = Some(preview);
    }
    if args.max_frames.is_some() {
        cfg.loop_settings.max_frames = args.max_frames;
    }

    let labels = cfg.label_table();
    let mut detector = cfg.detector()?;
    detector.warm_up()?;
    let dispatcher = Dispatcher::spawn(cfg.dispatcher_config(), cfg.notifiers()?)?;

    let mut camera = camera_for(&cfg.camera.device, cfg.geometry())?;
    let handle = match acquire(camera.as_mut(), &cfg.retry_policy()) {
        Ok(handle) => handle,
        Err(err @ AcquireError::Exhausted { .. }) => {
            log::error!("{}", err);
            dispatcher.shutdown();
            std::process::exit(EXIT_CAMERA_UNAVAILABLE);
        }
    };

    let (width, height) = handle.dimensions();
    let mut video = AviMjpegWriter::create(
        &cfg.output.video_path,
        width,
        height,
        cfg.output.fps,
        cfg.output.jpeg_quality,
    )?;
    log::info!(
        "recording {}x{} @ {} fps to {}",
        width,
        height,
        cfg.output.fps,
        cfg.output.video_path.display()
    );

    let mut display: Box<dyn DisplaySink> = match &cfg.output.preview_path {
        Some(path) => Box::new(PreviewDisplay::new(path, cfg.output.jpeg_quality)?),
        None => Box::new(HeadlessDisplay::new()),
    };

    let mut stop = StopSignal::new();
    stop.install_ctrlc()?;
    stop.watch_stdin();
    log::info!("defectd running (press q then Enter, or Ctrl-C, to stop)");

    let outcome = defect_watch::pipeline::run(
        handle,
        LoopContext {
            detector: detector.as_mut(),
            labels: &labels,
            alerts: &dispatcher,
            video: &mut video,
            display: display.as_mut(),
            stop: &mut stop,
        },
        &cfg.loop_settings(),
    );

    // Queued alerts are still delivered after the camera is gone.
    dispatcher.shutdown();

    match outcome {
        Ok(summary) => {
            log::info!(
                "stopped ({:?}) after {} frames, {} detections",
                summary.exit,
                summary.stats.frames,
                summary.stats.detections
            );
            Ok(())
        }
        Err(err) => match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::DetectorFailed { .. }) => {
                log::error!("{:#}", err);
                std::process::exit(EXIT_DETECTOR_FAILED);
            }
            None => Err(err),
        },
    }
}
