use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::common::error::{FaceAuthError, Result};
use crate::common::paths;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub embedder: EmbedderConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
    /// Longest wait for a single frame before the read fails.
    #[serde(default = "default_frame_timeout")]
    pub frame_timeout_ms: u64,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }
fn default_warmup_frames() -> u32 { 3 }
fn default_warmup_delay() -> u64 { 50 }
fn default_frame_timeout() -> u64 { 1000 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
            warmup_frames: default_warmup_frames(),
            warmup_delay_ms: default_warmup_delay(),
            frame_timeout_ms: default_frame_timeout(),
        }
    }
}

impl CameraConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_detector_path")]
    pub detector_path: PathBuf,
    #[serde(default = "default_embedder_path")]
    pub embedder_path: PathBuf,
}

fn default_detector_path() -> PathBuf {
    paths::system_models_dir().join("face_detector.onnx")
}

fn default_embedder_path() -> PathBuf {
    paths::system_models_dir().join("arcfaceresnet100-8.onnx")
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector_path: default_detector_path(),
            embedder_path: default_embedder_path(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_input")]
    pub input_width: u32,
    #[serde(default = "default_detector_input")]
    pub input_height: u32,
    #[serde(default = "default_detection_confidence")]
    pub confidence: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    /// Smallest face edge, in frame pixels, that counts as a detection.
    #[serde(default = "default_min_face_size")]
    pub min_face_size: f32,
}

fn default_detector_input() -> u32 { 640 }
fn default_detection_confidence() -> f32 { 0.5 }
fn default_iou_threshold() -> f32 { 0.45 }
fn default_min_face_size() -> f32 { 80.0 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: default_detector_input(),
            input_height: default_detector_input(),
            confidence: default_detection_confidence(),
            iou_threshold: default_iou_threshold(),
            min_face_size: default_min_face_size(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmbedderConfig {
    #[serde(default = "default_embedder_input")]
    pub input_size: u32,
    /// 1 feeds luma only, 3 feeds RGB planes.
    #[serde(default = "default_channels")]
    pub channels: u32,
    #[serde(default)]
    pub normalization_mean: f32,
    #[serde(default = "default_normalization_std")]
    pub normalization_std: f32,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_embedder_input() -> u32 { 112 }
fn default_channels() -> u32 { 3 }
fn default_normalization_std() -> f32 { 255.0 }
fn default_dimension() -> usize { 512 }
fn default_optimization_level() -> u32 { 3 }

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            input_size: default_embedder_input(),
            channels: default_channels(),
            normalization_mean: 0.0,
            normalization_std: default_normalization_std(),
            dimension: default_dimension(),
            optimization_level: default_optimization_level(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub attempt_interval_ms: u64,
}

fn default_threshold() -> f64 { 0.6 }
fn default_timeout_seconds() -> f64 { 5.0 }
fn default_max_attempts() -> u32 { 30 }

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_threshold(),
            timeout_seconds: default_timeout_seconds(),
            max_attempts: default_max_attempts(),
            attempt_interval_ms: 0,
        }
    }
}

impl AuthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }

    pub fn attempt_interval(&self) -> Duration {
        Duration::from_millis(self.attempt_interval_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "paths::system_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: paths::system_data_dir() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "paths::system_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: f64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_seconds: f64,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    #[serde(default = "default_poll_interval")]
    pub accept_poll_interval_ms: u64,
}

fn default_read_timeout() -> f64 { 10.0 }
fn default_write_timeout() -> f64 { 5.0 }
fn default_max_request_bytes() -> usize { 1024 }
fn default_poll_interval() -> u64 { 100 }

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: paths::system_socket_path(),
            read_timeout_seconds: default_read_timeout(),
            write_timeout_seconds: default_write_timeout(),
            max_request_bytes: default_max_request_bytes(),
            accept_poll_interval_ms: default_poll_interval(),
        }
    }
}

impl ServiceConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout_seconds)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.write_timeout_seconds)
    }

    pub fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_interval_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnrollmentConfig {
    #[serde(default = "default_samples")]
    pub samples: usize,
    #[serde(default = "default_max_failed_captures")]
    pub max_failed_captures: usize,
}

fn default_samples() -> usize { 5 }
fn default_max_failed_captures() -> usize { 20 }

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            samples: default_samples(),
            max_failed_captures: default_max_failed_captures(),
        }
    }
}

impl Config {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FaceAuthError::Config(format!(
                "Config file not found: {}", path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Loads `path` when it exists, otherwise falls back to built-in defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            tracing::warn!("Config file {} not found, using defaults", path.display());
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Loads the config for a run mode, then applies that mode's path overrides.
    pub fn for_run_mode(paths: &paths::Paths, explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load_or_default(&paths.config_file())?,
        };

        if let Some(data_dir) = paths.data_dir_override() {
            config.storage.data_dir = data_dir;
        }
        if let Some(socket_path) = paths.socket_path_override() {
            config.service.socket_path = socket_path;
        }
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| FaceAuthError::Config(format!("Config parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(FaceAuthError::Config(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(FaceAuthError::Config(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        if self.camera.frame_timeout_ms == 0 || self.camera.frame_timeout_ms > 10_000 {
            return Err(FaceAuthError::Config(format!(
                "Camera frame_timeout_ms must be between 1 and 10000, got {}",
                self.camera.frame_timeout_ms
            )));
        }

        if !(-1.0..=1.0).contains(&self.auth.similarity_threshold) {
            return Err(FaceAuthError::Config(format!(
                "Similarity threshold must be between -1.0 and 1.0, got {}",
                self.auth.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            return Err(FaceAuthError::Config(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.detector.confidence
            )));
        }

        if !(self.auth.timeout_seconds > 0.0 && self.auth.timeout_seconds <= 60.0) {
            return Err(FaceAuthError::Config(format!(
                "Timeout must be between 0 and 60 seconds, got {}",
                self.auth.timeout_seconds
            )));
        }
        if self.auth.max_attempts == 0 {
            return Err(FaceAuthError::Config("max_attempts must be at least 1".into()));
        }

        if self.detector.input_width == 0 || self.detector.input_width > 4096 {
            return Err(FaceAuthError::Config(format!(
                "Detector input width must be between 1 and 4096, got {}",
                self.detector.input_width
            )));
        }
        if self.detector.input_height == 0 || self.detector.input_height > 4096 {
            return Err(FaceAuthError::Config(format!(
                "Detector input height must be between 1 and 4096, got {}",
                self.detector.input_height
            )));
        }

        if self.embedder.input_size == 0 || self.embedder.input_size > 1024 {
            return Err(FaceAuthError::Config(format!(
                "Embedder input size must be between 1 and 1024, got {}",
                self.embedder.input_size
            )));
        }
        if self.embedder.channels != 1 && self.embedder.channels != 3 {
            return Err(FaceAuthError::Config(format!(
                "Embedder channels must be 1 or 3, got {}", self.embedder.channels
            )));
        }
        if self.embedder.normalization_std == 0.0 {
            return Err(FaceAuthError::Config("Embedder normalization_std must be non-zero".into()));
        }
        if self.embedder.dimension == 0 {
            return Err(FaceAuthError::Config("Embedding dimension must be at least 1".into()));
        }

        for (name, seconds) in [
            ("read_timeout_seconds", self.service.read_timeout_seconds),
            ("write_timeout_seconds", self.service.write_timeout_seconds),
        ] {
            // Also rejects NaN and infinity.
            if !(seconds > 0.0 && seconds <= 300.0) {
                return Err(FaceAuthError::Config(format!(
                    "Service {} must be between 0 and 300 seconds, got {}", name, seconds
                )));
            }
        }
        if self.service.max_request_bytes < 16 || self.service.max_request_bytes > 64 * 1024 {
            return Err(FaceAuthError::Config(format!(
                "max_request_bytes must be between 16 and 65536, got {}",
                self.service.max_request_bytes
            )));
        }

        if self.enrollment.samples == 0 {
            return Err(FaceAuthError::Config("Enrollment needs at least one sample".into()));
        }

        Ok(())
    }
}
