use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::acquire::RetryPolicy;
use crate::detect::{DetectorBackend, ScriptedBackend};
use crate::ingest::CaptureGeometry;
use crate::labels::{ClassId, LabelTable, DEFAULT_LABELS};
use crate::notify::{
    DispatcherConfig, Notifier, SmsConfig, SmsNotifier, TelegramConfig, TelegramNotifier,
    TWILIO_API_BASE, TELEGRAM_API_BASE,
};
use crate::pipeline::LoopSettings;

const DEFAULT_DEVICE: &str = "0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 20;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
const DEFAULT_DETECTOR_BACKEND: &str = "stub";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_STUB_EVERY_N: u64 = 25;
const DEFAULT_VIDEO_PATH: &str = "output.avi";
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_ALERT_WORKERS: usize = 4;
const DEFAULT_ALERT_QUEUE: usize = 256;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_STOP_POLL_MS: u64 = 1;
const DEFAULT_MAX_DETECT_FAILURES: u32 = 30;

#[derive(Debug, Deserialize, Default)]
struct DefectConfigFile {
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    labels: Option<BTreeMap<String, String>>,
    output: Option<OutputConfigFile>,
    alerts: Option<AlertsConfigFile>,
    telegram: Option<TelegramConfigFile>,
    sms: Option<SmsConfigFile>,
    #[serde(rename = "loop")]
    loop_: Option<LoopConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    max_retries: Option<u32>,
    retry_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    stub_every_n: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    video_path: Option<PathBuf>,
    fps: Option<u32>,
    jpeg_quality: Option<u8>,
    preview_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    http_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TelegramConfigFile {
    api_base: Option<String>,
    bot_token: Option<String>,
    chat_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct SmsConfigFile {
    api_base: Option<String>,
    account_sid: Option<String>,
    auth_token: Option<String>,
    from_number: Option<String>,
    to_numbers: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct LoopConfigFile {
    stop_poll_ms: Option<u64>,
    max_consecutive_detect_failures: Option<u32>,
    max_frames: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DefectConfig {
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub labels: BTreeMap<ClassId, String>,
    pub output: OutputSettings,
    pub alerts: AlertSettings,
    pub telegram: TelegramSettings,
    pub sms: SmsSettings,
    pub loop_settings: LoopConfig,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// `0`, `/dev/videoN`, `stub://<name>` or `replay:<dir>`.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// `stub` or `tract`.
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub stub_every_n: u64,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub video_path: PathBuf,
    /// Frame rate recorded in the video header.
    pub fps: u32,
    pub jpeg_quality: u8,
    /// No preview file means headless.
    pub preview_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct TelegramSettings {
    pub api_base: String,
    pub bot_token: Option<String>,
    pub chat_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SmsSettings {
    pub api_base: String,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub from_number: Option<String>,
    pub to_numbers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub stop_poll: Duration,
    pub max_consecutive_detect_failures: u32,
    pub max_frames: Option<u64>,
}

impl DefectConfig {
    /// Load from the file named by `DEFECT_CONFIG` (if any), then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DEFECT_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DefectConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            device: camera_file
                .device
                .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            width: camera_file.width.unwrap_or(DEFAULT_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_HEIGHT),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            max_retries: camera_file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: Duration::from_secs(
                camera_file
                    .retry_delay_secs
                    .unwrap_or(DEFAULT_RETRY_DELAY_SECS),
            ),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR_BACKEND.to_string()),
            model_path: detector_file.model_path,
            input_width: detector_file.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
            input_height: detector_file.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE),
            iou_threshold: detector_file.iou_threshold.unwrap_or(DEFAULT_IOU),
            stub_every_n: detector_file.stub_every_n.unwrap_or(DEFAULT_STUB_EVERY_N),
        };

        let labels = match file.labels {
            Some(raw) => parse_labels(raw)?,
            None => DEFAULT_LABELS
                .iter()
                .map(|(id, name)| (*id, name.to_string()))
                .collect(),
        };

        let output_file = file.output.unwrap_or_default();
        let output = OutputSettings {
            video_path: output_file
                .video_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VIDEO_PATH)),
            fps: output_file.fps.unwrap_or(camera.target_fps),
            jpeg_quality: output_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            preview_path: output_file.preview_path,
        };

        let alerts_file = file.alerts.unwrap_or_default();
        let alerts = AlertSettings {
            workers: alerts_file.workers.unwrap_or(DEFAULT_ALERT_WORKERS),
            queue_capacity: alerts_file.queue_capacity.unwrap_or(DEFAULT_ALERT_QUEUE),
            http_timeout: Duration::from_secs(
                alerts_file
                    .http_timeout_secs
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
        };

        let telegram_file = file.telegram.unwrap_or_default();
        let telegram = TelegramSettings {
            api_base: telegram_file
                .api_base
                .unwrap_or_else(|| TELEGRAM_API_BASE.to_string()),
            bot_token: telegram_file.bot_token,
            chat_ids: telegram_file.chat_ids.unwrap_or_default(),
        };

        let sms_file = file.sms.unwrap_or_default();
        let sms = SmsSettings {
            api_base: sms_file
                .api_base
                .unwrap_or_else(|| TWILIO_API_BASE.to_string()),
            account_sid: sms_file.account_sid,
            auth_token: sms_file.auth_token,
            from_number: sms_file.from_number,
            to_numbers: sms_file.to_numbers.unwrap_or_default(),
        };

        let loop_file = file.loop_.unwrap_or_default();
        let loop_settings = LoopConfig {
            stop_poll: Duration::from_millis(loop_file.stop_poll_ms.unwrap_or(DEFAULT_STOP_POLL_MS)),
            max_consecutive_detect_failures: loop_file
                .max_consecutive_detect_failures
                .unwrap_or(DEFAULT_MAX_DETECT_FAILURES),
            max_frames: loop_file.max_frames,
        };

        Ok(Self {
            camera,
            detector,
            labels,
            output,
            alerts,
            telegram,
            sms,
            loop_settings,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = env_non_empty("DEFECT_DEVICE") {
            self.camera.device = device;
        }
        if let Some(retries) = env_non_empty("DEFECT_MAX_RETRIES") {
            self.camera.max_retries = retries
                .parse()
                .map_err(|_| anyhow!("DEFECT_MAX_RETRIES must be an integer"))?;
        }
        if let Some(delay) = env_non_empty("DEFECT_RETRY_DELAY_SECS") {
            let seconds: u64 = delay.parse().map_err(|_| {
                anyhow!("DEFECT_RETRY_DELAY_SECS must be an integer number of seconds")
            })?;
            self.camera.retry_delay = Duration::from_secs(seconds);
        }
        if let Some(backend) = env_non_empty("DEFECT_DETECTOR_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(path) = env_non_empty("DEFECT_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_non_empty("DEFECT_OUTPUT") {
            self.output.video_path = PathBuf::from(path);
        }
        if let Some(path) = env_non_empty("DEFECT_PREVIEW") {
            self.output.preview_path = Some(PathBuf::from(path));
        }
        if let Some(token) = env_non_empty("DEFECT_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Ok(chat_ids) = std::env::var("DEFECT_TELEGRAM_CHAT_IDS") {
            let parsed = split_csv(&chat_ids);
            if !parsed.is_empty() {
                self.telegram.chat_ids = parsed;
            }
        }
        if let Some(sid) = env_non_empty("DEFECT_TWILIO_ACCOUNT_SID") {
            self.sms.account_sid = Some(sid);
        }
        if let Some(token) = env_non_empty("DEFECT_TWILIO_AUTH_TOKEN") {
            self.sms.auth_token = Some(token);
        }
        if let Some(from) = env_non_empty("DEFECT_TWILIO_FROM") {
            self.sms.from_number = Some(from);
        }
        if let Ok(to) = std::env::var("DEFECT_TWILIO_TO") {
            let parsed = split_csv(&to);
            if !parsed.is_empty() {
                self.sms.to_numbers = parsed;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.camera.target_fps == 0 || self.output.fps == 0 {
            return Err(anyhow!("frame rates must be greater than zero"));
        }
        if self.camera.max_retries == 0 {
            return Err(anyhow!("camera max_retries must be at least 1"));
        }
        match self.detector.backend.as_str() {
            "stub" => {
                if self.detector.stub_every_n == 0 {
                    return Err(anyhow!("detector stub_every_n must be at least 1"));
                }
            }
            "tract" => {
                if self.detector.model_path.is_none() {
                    return Err(anyhow!("detector backend 'tract' requires model_path"));
                }
            }
            other => return Err(anyhow!("unknown detector backend '{}'", other)),
        }
        for (name, value) in [
            ("confidence_threshold", self.detector.confidence_threshold),
            ("iou_threshold", self.detector.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("detector {} must be within 0..=1", name));
            }
        }
        if self.labels.is_empty() {
            return Err(anyhow!("label table must not be empty"));
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(anyhow!("output jpeg_quality must be within 1..=100"));
        }
        if self.alerts.workers == 0 || self.alerts.queue_capacity == 0 {
            return Err(anyhow!("alerts workers and queue_capacity must be at least 1"));
        }
        if self.loop_settings.max_consecutive_detect_failures == 0 {
            return Err(anyhow!("loop max_consecutive_detect_failures must be at least 1"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.camera.max_retries,
            delay: self.camera.retry_delay,
        }
    }

    pub fn geometry(&self) -> CaptureGeometry {
        CaptureGeometry {
            width: self.camera.width,
            height: self.camera.height,
            target_fps: self.camera.target_fps,
        }
    }

    pub fn label_table(&self) -> LabelTable {
        LabelTable::new(self.labels.iter().map(|(id, name)| (*id, name.clone())))
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.alerts.workers,
            queue_capacity: self.alerts.queue_capacity,
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            stop_poll: self.loop_settings.stop_poll,
            max_consecutive_detect_failures: self.loop_settings.max_consecutive_detect_failures,
            max_frames: self.loop_settings.max_frames,
        }
    }

    /// Transports that are fully configured. Partial configuration is logged
    /// and skipped.
    pub fn notifiers(&self) -> Result<Vec<Arc<dyn Notifier>>> {
        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();

        match (&self.telegram.bot_token, self.telegram.chat_ids.is_empty()) {
            (Some(token), false) => {
                notifiers.push(Arc::new(TelegramNotifier::new(TelegramConfig {
                    api_base: self.telegram.api_base.clone(),
                    bot_token: token.clone(),
                    chat_ids: self.telegram.chat_ids.clone(),
                    timeout: self.alerts.http_timeout,
                })?));
            }
            (None, true) => {}
            _ => log::warn!("telegram alerts disabled: needs both bot_token and chat_ids"),
        }

        let sms = &self.sms;
        match (
            &sms.account_sid,
            &sms.auth_token,
            &sms.from_number,
            sms.to_numbers.is_empty(),
        ) {
            (Some(sid), Some(token), Some(from), false) => {
                notifiers.push(Arc::new(SmsNotifier::new(SmsConfig {
                    api_base: sms.api_base.clone(),
                    account_sid: sid.clone(),
                    auth_token: token.clone(),
                    from_number: from.clone(),
                    to_numbers: sms.to_numbers.clone(),
                    timeout: self.alerts.http_timeout,
                })?));
            }
            (None, None, None, true) => {}
            _ => log::warn!(
                "sms alerts disabled: needs account_sid, auth_token, from_number and to_numbers"
            ),
        }

        if notifiers.is_empty() {
            log::warn!("no alert transport configured; detections will only be logged");
        }
        Ok(notifiers)
    }

    pub fn detector(&self) -> Result<Box<dyn DetectorBackend>> {
        match self.detector.backend.as_str() {
            "stub" => {
                let classes: Vec<ClassId> = self.labels.keys().copied().collect();
                Ok(Box::new(ScriptedBackend::new(
                    self.detector.stub_every_n,
                    classes,
                )?))
            }
            "tract" => tract_detector(&self.detector),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

#[cfg(feature = "backend-tract")]
fn tract_detector(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("detector backend 'tract' requires model_path"))?;
    let backend = crate::detect::TractBackend::new(
        model_path,
        settings.input_width,
        settings.input_height,
    )?
    .with_thresholds(settings.confidence_threshold, settings.iou_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn tract_detector(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "detector backend 'tract' requires the backend-tract feature"
    ))
}

fn read_config_file(path: &Path) -> Result<DefectConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_labels(raw: BTreeMap<String, String>) -> Result<BTreeMap<ClassId, String>> {
    raw.into_iter()
        .map(|(id, name)| {
            let id: ClassId = id
                .trim()
                .parse()
                .map_err(|_| anyhow!("label key '{}' is not an integer class id", id))?;
            if name.trim().is_empty() {
                return Err(anyhow!("label for class {} must not be empty", id));
            }
            Ok((id, name))
        })
        .collect()
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
