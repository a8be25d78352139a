//! Layered configuration: JSON file, environment overrides, validation.
//!
//! All values are supplied once at startup and immutable for the process
//! lifetime. The file path comes from `DROPWATCH_CONFIG`; every section is
//! optional and falls back to the deployed defaults.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::{RtspConfig, SourceDescriptor};
use crate::roi::Roi;
use crate::session::SessionParams;

const DEFAULT_DESCRIPTOR: &str = "stub://front_camera";
const DEFAULT_RTSP_PORT: u16 = 554;
const DEFAULT_RTSP_CHANNEL: u32 = 1;
const DEFAULT_RTSP_SUBTYPE: u32 = 0;
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_FRAME_WIDTH: u32 = 1280;
const DEFAULT_FRAME_HEIGHT: u32 = 720;
const DEFAULT_THRESHOLD: u64 = 1_500_000;
const DEFAULT_DETECT_FRAME_LIMIT: u32 = 25;
const DEFAULT_BUDGET_SECS: u64 = 300;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_IDLE_BACKOFF_MS: u64 = 500;
const DEFAULT_OPEN_BACKOFF_MS: u64 = 500;
const DEFAULT_READ_ATTEMPTS: u32 = 5;
const DEFAULT_MQTT_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_MQTT_CLIENT_ID: &str = "dropwatchd";
const DEFAULT_COMMAND_TOPIC: &str = "CTRL";
const DEFAULT_RESULT_TOPIC: &str = "CAMERA";
const DEFAULT_ROI: [[i32; 2]; 4] = [[615, 720], [1270, 719], [1270, 570], [615, 570]];

#[derive(Debug, Deserialize, Default)]
struct DropwatchConfigFile {
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    roi: Option<Vec<[i32; 2]>>,
    session: Option<SessionConfigFile>,
    mqtt: Option<MqttConfigFile>,
    snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    descriptor: Option<String>,
    username: Option<String>,
    password: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    channel: Option<u32>,
    subtype: Option<u32>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    threshold: Option<u64>,
    detect_frame_limit: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    budget_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
    idle_backoff_ms: Option<u64>,
    open_backoff_ms: Option<u64>,
    read_attempts: Option<u32>,
    emit_timeout_code: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    addr: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    command_topic: Option<String>,
    result_topic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DropwatchConfig {
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub roi: Roi,
    pub session: SessionSettings,
    pub mqtt: MqttSettings,
    pub snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Source descriptor: `stub://...`, `rtsp://...`, or `device:N`.
    pub descriptor: String,
    pub target_fps: u32,
    /// Frame geometry; also the coordinate space of the ROI polygon.
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub threshold: u64,
    pub detect_frame_limit: u32,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub budget: Duration,
    pub poll_interval: Duration,
    pub idle_backoff: Duration,
    pub open_backoff: Duration,
    pub read_attempts: u32,
    pub emit_timeout_code: bool,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub addr: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub command_topic: String,
    pub result_topic: String,
}

impl DropwatchConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DROPWATCH_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => DropwatchConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DropwatchConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            descriptor: descriptor_from_file(&camera_file),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            width: camera_file.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
        };

        let detection_file = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            threshold: detection_file.threshold.unwrap_or(DEFAULT_THRESHOLD),
            detect_frame_limit: detection_file
                .detect_frame_limit
                .unwrap_or(DEFAULT_DETECT_FRAME_LIMIT),
        };

        let points = file
            .roi
            .unwrap_or_else(|| DEFAULT_ROI.to_vec())
            .into_iter()
            .map(|[x, y]| (x, y))
            .collect();
        let roi = Roi::new(points)?;

        let session_file = file.session.unwrap_or_default();
        let session = SessionSettings {
            budget: Duration::from_secs(session_file.budget_secs.unwrap_or(DEFAULT_BUDGET_SECS)),
            poll_interval: Duration::from_millis(
                session_file
                    .poll_interval_ms
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            idle_backoff: Duration::from_millis(
                session_file
                    .idle_backoff_ms
                    .unwrap_or(DEFAULT_IDLE_BACKOFF_MS),
            ),
            open_backoff: Duration::from_millis(
                session_file
                    .open_backoff_ms
                    .unwrap_or(DEFAULT_OPEN_BACKOFF_MS),
            ),
            read_attempts: session_file.read_attempts.unwrap_or(DEFAULT_READ_ATTEMPTS),
            emit_timeout_code: session_file.emit_timeout_code.unwrap_or(false),
        };

        let mqtt_file = file.mqtt.unwrap_or_default();
        let mqtt = MqttSettings {
            addr: mqtt_file.addr.unwrap_or_else(|| DEFAULT_MQTT_ADDR.to_string()),
            client_id: mqtt_file
                .client_id
                .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            username: mqtt_file.username,
            password: mqtt_file.password,
            command_topic: mqtt_file
                .command_topic
                .unwrap_or_else(|| DEFAULT_COMMAND_TOPIC.to_string()),
            result_topic: mqtt_file
                .result_topic
                .unwrap_or_else(|| DEFAULT_RESULT_TOPIC.to_string()),
        };

        Ok(Self {
            camera,
            detection,
            roi,
            session,
            mqtt,
            snapshot_dir: file.snapshot_dir,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(descriptor) = std::env::var("DROPWATCH_CAMERA_URL") {
            if !descriptor.trim().is_empty() {
                self.camera.descriptor = descriptor;
            }
        }
        if let Ok(addr) = std::env::var("DROPWATCH_MQTT_ADDR") {
            if !addr.trim().is_empty() {
                self.mqtt.addr = addr;
            }
        }
        if let Ok(threshold) = std::env::var("DROPWATCH_THRESHOLD") {
            self.detection.threshold = threshold
                .parse()
                .map_err(|_| anyhow!("DROPWATCH_THRESHOLD must be an integer"))?;
        }
        if let Ok(limit) = std::env::var("DROPWATCH_DETECT_FRAME_LIMIT") {
            self.detection.detect_frame_limit = limit
                .parse()
                .map_err(|_| anyhow!("DROPWATCH_DETECT_FRAME_LIMIT must be an integer"))?;
        }
        if let Ok(budget) = std::env::var("DROPWATCH_BUDGET_SECS") {
            let seconds: u64 = budget
                .parse()
                .map_err(|_| anyhow!("DROPWATCH_BUDGET_SECS must be an integer number of seconds"))?;
            self.session.budget = Duration::from_secs(seconds);
        }
        if let Ok(dir) = std::env::var("DROPWATCH_SNAPSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.snapshot_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        SourceDescriptor::parse(&self.camera.descriptor)
            .map_err(|e| anyhow!("camera descriptor rejected: {}", e))?;
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera frame geometry must be non-zero"));
        }
        if self.detection.threshold == 0 {
            return Err(anyhow!("detection threshold must be greater than zero"));
        }
        if self.detection.detect_frame_limit == 0 {
            return Err(anyhow!("detect_frame_limit must be at least 1"));
        }
        if self.session.budget.as_secs() == 0 {
            return Err(anyhow!("session budget must be greater than zero"));
        }
        if self.session.read_attempts == 0 {
            return Err(anyhow!("read_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Session tunables for the controller.
    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            threshold: self.detection.threshold,
            detect_frame_limit: self.detection.detect_frame_limit,
            budget: self.session.budget,
            poll_interval: self.session.poll_interval,
            idle_backoff: self.session.idle_backoff,
            open_backoff: self.session.open_backoff,
            read_attempts: self.session.read_attempts,
            emit_timeout_code: self.session.emit_timeout_code,
        }
    }

    /// Stream configuration for the opener.
    pub fn rtsp_config(&self) -> RtspConfig {
        RtspConfig {
            descriptor: self.camera.descriptor.clone(),
            target_fps: self.camera.target_fps,
            width: self.camera.width,
            height: self.camera.height,
        }
    }
}

/// Resolve the camera section to a descriptor. An explicit `descriptor`
/// wins; otherwise credential parts are assembled into the vendor RTSP URL.
fn descriptor_from_file(camera: &CameraConfigFile) -> String {
    if let Some(descriptor) = &camera.descriptor {
        return descriptor.clone();
    }
    if let Some(host) = &camera.host {
        let credentials = match (&camera.username, &camera.password) {
            (Some(user), Some(password)) => format!("{}:{}@", user, password),
            (Some(user), None) => format!("{}@", user),
            _ => String::new(),
        };
        return format!(
            "rtsp://{}{}:{}/cam/realmonitor?channel={}&subtype={}",
            credentials,
            host,
            camera.port.unwrap_or(DEFAULT_RTSP_PORT),
            camera.channel.unwrap_or(DEFAULT_RTSP_CHANNEL),
            camera.subtype.unwrap_or(DEFAULT_RTSP_SUBTYPE),
        );
    }
    DEFAULT_DESCRIPTOR.to_string()
}

fn read_config_file(path: &Path) -> Result<DropwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
