use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::frame::{FrameSize, DEFAULT_FRAME_SIZE};
use crate::media::{CaptureConstraints, FacingMode};
use crate::overlay::OverlayToggles;

const DEFAULT_DETECTION_URL: &str = "ws://127.0.0.1:8000/ws/detections";
const DEFAULT_IP_STREAM_URL: &str = "http://192.168.1.100:8080/video";
const DEFAULT_SERVER_STREAM_URL: &str = "http://127.0.0.1:8000/video_feed";
const DEFAULT_CAMERA: &str = "stub://camera";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
const DEFAULT_SIMULATION_INTERVAL_MS: u64 = 100;
const DEFAULT_SNAPSHOT_DIR: &str = "snapshots";

#[derive(Debug, Deserialize, Default)]
struct TelemetryConfigFile {
    detection: Option<DetectionConfigFile>,
    sources: Option<SourcesConfigFile>,
    capture: Option<CaptureConfigFile>,
    simulation: Option<SimulationConfigFile>,
    overlay: Option<OverlayConfigFile>,
    snapshot: Option<SnapshotConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    url: Option<String>,
    reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourcesConfigFile {
    camera: Option<String>,
    ip_stream_url: Option<String>,
    server_stream_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    facing: Option<FacingMode>,
}

#[derive(Debug, Deserialize, Default)]
struct SimulationConfigFile {
    interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    enabled: Option<bool>,
    show_boxes: Option<bool>,
    show_labels: Option<bool>,
    font_path: Option<PathBuf>,
    frame_size: Option<[f64; 2]>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub detection_url: String,
    pub reconnect_delay: Duration,
    pub sources: SourceSettings,
    pub capture: CaptureConstraints,
    pub simulation_interval: Duration,
    pub overlay: OverlaySettings,
    pub snapshot_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Device camera spec: `stub://...` or an `http(s)://` MJPEG camera.
    pub camera: String,
    pub ip_stream_url: String,
    pub server_stream_url: String,
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub enabled: bool,
    pub toggles: OverlayToggles,
    pub font_path: Option<PathBuf>,
    /// Detector frame size assumed when a message omits it.
    pub default_frame_size: FrameSize,
}

impl TelemetryConfig {
    /// Defaults, then the file named by `HERD_TELEMETRY_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HERD_TELEMETRY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `path` without consulting the environment.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TelemetryConfigFile) -> Self {
        let detection = file.detection.unwrap_or_default();
        let sources = file.sources.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let overlay = file.overlay.unwrap_or_default();

        let defaults = CaptureConstraints::default();
        let default_frame_size = overlay
            .frame_size
            .map(|[w, h]| FrameSize::new(w, h))
            .unwrap_or(DEFAULT_FRAME_SIZE);

        Self {
            detection_url: detection
                .url
                .unwrap_or_else(|| DEFAULT_DETECTION_URL.to_string()),
            reconnect_delay: Duration::from_millis(
                detection
                    .reconnect_delay_ms
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
            ),
            sources: SourceSettings {
                camera: sources.camera.unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
                ip_stream_url: sources
                    .ip_stream_url
                    .unwrap_or_else(|| DEFAULT_IP_STREAM_URL.to_string()),
                server_stream_url: sources
                    .server_stream_url
                    .unwrap_or_else(|| DEFAULT_SERVER_STREAM_URL.to_string()),
            },
            capture: CaptureConstraints {
                ideal_width: capture.width.unwrap_or(defaults.ideal_width),
                ideal_height: capture.height.unwrap_or(defaults.ideal_height),
                facing: capture.facing.unwrap_or(defaults.facing),
            },
            simulation_interval: Duration::from_millis(
                file.simulation
                    .and_then(|sim| sim.interval_ms)
                    .unwrap_or(DEFAULT_SIMULATION_INTERVAL_MS),
            ),
            overlay: OverlaySettings {
                enabled: overlay.enabled.unwrap_or(true),
                toggles: OverlayToggles {
                    show_boxes: overlay.show_boxes.unwrap_or(true),
                    show_labels: overlay.show_labels.unwrap_or(true),
                },
                font_path: overlay.font_path,
                default_frame_size,
            },
            snapshot_dir: file
                .snapshot
                .and_then(|snapshot| snapshot.dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_nonempty("HERD_DETECTION_URL") {
            self.detection_url = url;
        }
        if let Some(url) = env_nonempty("HERD_IP_STREAM_URL") {
            self.sources.ip_stream_url = url;
        }
        if let Some(url) = env_nonempty("HERD_SERVER_STREAM_URL") {
            self.sources.server_stream_url = url;
        }
        if let Some(camera) = env_nonempty("HERD_CAMERA_DEVICE") {
            self.sources.camera = camera;
        }
        if let Some(delay) = env_nonempty("HERD_RECONNECT_DELAY_MS") {
            let ms: u64 = delay.parse().map_err(|_| {
                anyhow!("HERD_RECONNECT_DELAY_MS must be an integer number of milliseconds")
            })?;
            self.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(interval) = env_nonempty("HERD_SIMULATION_INTERVAL_MS") {
            let ms: u64 = interval.parse().map_err(|_| {
                anyhow!("HERD_SIMULATION_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.simulation_interval = Duration::from_millis(ms);
        }
        if let Some(dir) = env_nonempty("HERD_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(font) = env_nonempty("HERD_OVERLAY_FONT") {
            self.overlay.font_path = Some(PathBuf::from(font));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        check_url("detection url", &self.detection_url, &["ws", "wss"])?;
        check_url(
            "ip stream url",
            &self.sources.ip_stream_url,
            &["http", "https", "stub"],
        )?;
        check_url(
            "server stream url",
            &self.sources.server_stream_url,
            &["http", "https", "stub"],
        )?;
        check_url("camera device", &self.sources.camera, &["http", "https", "stub"])?;

        if self.reconnect_delay.is_zero() {
            return Err(anyhow!("reconnect delay must be greater than zero"));
        }
        if self.simulation_interval.is_zero() {
            return Err(anyhow!("simulation interval must be greater than zero"));
        }
        if self.capture.ideal_width == 0 || self.capture.ideal_height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if !self.overlay.default_frame_size.is_valid() {
            return Err(anyhow!(
                "overlay frame_size must be two positive numbers, got {}x{}",
                self.overlay.default_frame_size.width,
                self.overlay.default_frame_size.height
            ));
        }
        Ok(())
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_file(TelemetryConfigFile::default())
    }
}

fn read_config_file(path: &Path) -> Result<TelemetryConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn check_url(what: &str, value: &str, schemes: &[&str]) -> Result<()> {
    let url = Url::parse(value).map_err(|e| anyhow!("invalid {} '{}': {}", what, value, e))?;
    if !schemes.contains(&url.scheme()) {
        return Err(anyhow!(
            "{} '{}' must use one of: {}",
            what,
            value,
            schemes.join(", ")
        ));
    }
    Ok(())
}
