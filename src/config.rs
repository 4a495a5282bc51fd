// src/config.rs - Try-on configuration and device-class presets
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, TryOnError};
use crate::pose::BackendKind;
use crate::tracking::{BOOTSTRAP_SAMPLES, MAX_WINDOW};
use crate::video::Facing;

/// Device class the core is parameterized by. One pipeline, different budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
    Advanced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TryOnConfig {
    pub device_class: DeviceClass,
    pub capture: CaptureConfig,
    pub detection: DetectionConfig,
    pub measurement: MeasurementConfig,
    pub stability: StabilityConfig,
    pub fit: FitConfig,
    pub render: RenderConfig,
    pub session: SessionConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device_index: u32,
    pub facing: Facing,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Origin of the page embedding the view surface, when served to a browser.
    pub origin: Option<String>,
    /// How long to wait for the first frame with known dimensions.
    pub metadata_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub model_path: PathBuf,
    pub interval_ms: u64,
    pub preferred_backend: BackendKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementConfig {
    pub min_keypoint_confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub window: usize,
    pub min_samples: usize,
    /// Blend rate used when tracking is unstable.
    pub min_rate: f32,
    /// Blend rate used when tracking is fully stable.
    pub max_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub min_scale: f32,
    pub max_scale: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Largest bounding-box dimension every garment is normalized to.
    pub canonical_size: f32,
    pub fov_degrees: f32,
    pub overlay_opacity: f32,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Consecutive failed frames before the session gives up. 0 never escalates.
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_directory: PathBuf,
}

impl Default for TryOnConfig {
    fn default() -> Self {
        Self::for_device(DeviceClass::Desktop)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        TryOnConfig::default().capture
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        TryOnConfig::default().detection
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            min_keypoint_confidence: 0.4,
        }
    }
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            window: 8,
            min_samples: 5,
            min_rate: 0.25,
            max_rate: 0.75,
        }
    }
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            min_scale: 0.3,
            max_scale: 2.5,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            canonical_size: 1.0,
            fov_degrees: 45.0,
            overlay_opacity: 0.92,
            viewport_width: 1280,
            viewport_height: 720,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 30,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_directory: directories::UserDirs::new()
                .and_then(|dirs| dirs.picture_dir().map(|p| p.join("FittingRoom")))
                .unwrap_or_else(|| PathBuf::from("./output")),
        }
    }
}

impl TryOnConfig {
    pub fn for_device(device_class: DeviceClass) -> Self {
        let (width, height, fps, interval_ms, backend) = match device_class {
            DeviceClass::Desktop => (1280, 720, 30, 100, BackendKind::Accelerated),
            DeviceClass::Mobile => (640, 480, 24, 150, BackendKind::Cpu),
            DeviceClass::Advanced => (1280, 720, 30, 100, BackendKind::Accelerated),
        };

        let mut stability = StabilityConfig::default();
        let mut measurement = MeasurementConfig::default();
        if device_class == DeviceClass::Advanced {
            stability.window = 10;
            measurement.min_keypoint_confidence = 0.3;
        }

        Self {
            device_class,
            capture: CaptureConfig {
                device_index: 0,
                facing: Facing::Front,
                width,
                height,
                fps,
                origin: None,
                metadata_timeout_ms: 3000,
            },
            detection: DetectionConfig {
                model_path: PathBuf::from("models/movenet_lightning.onnx"),
                interval_ms,
                preferred_backend: backend,
            },
            measurement,
            stability,
            fit: FitConfig::default(),
            render: RenderConfig {
                viewport_width: width,
                viewport_height: height,
                ..RenderConfig::default()
            },
            session: SessionConfig::default(),
            export: ExportConfig::default(),
        }
    }

    /// Loads a TOML file. Keys that are absent fall back to the preset of the file's
    /// `device_class` (desktop when unspecified).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TryOnError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), device = ?config.device_class, "loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let overrides: toml::Value =
            toml::from_str(content).map_err(|e| TryOnError::Config(e.to_string()))?;

        let device_class = match overrides.get("device_class") {
            Some(value) => value
                .clone()
                .try_into::<DeviceClass>()
                .map_err(|e| TryOnError::Config(format!("device_class: {}", e)))?,
            None => DeviceClass::default(),
        };

        let mut merged = toml::Value::try_from(Self::for_device(device_class))
            .map_err(|e| TryOnError::Config(e.to_string()))?;
        merge_toml(&mut merged, overrides);

        let config: Self = merged
            .try_into()
            .map_err(|e| TryOnError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `fitting_room.toml` from the platform config directory, or the defaults.
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            debug!(path = %path.display(), "no configuration file, using defaults");
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("ignoring configuration {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.measurement.min_keypoint_confidence;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(TryOnError::Config(format!(
                "measurement.min_keypoint_confidence must be in [0, 1], got {}",
                threshold
            )));
        }

        let s = &self.stability;
        if !(BOOTSTRAP_SAMPLES..=MAX_WINDOW).contains(&s.window) {
            return Err(TryOnError::Config(format!(
                "stability.window must be in [{}, {}], got {}",
                BOOTSTRAP_SAMPLES, MAX_WINDOW, s.window
            )));
        }
        if s.min_samples < BOOTSTRAP_SAMPLES || s.min_samples > s.window {
            return Err(TryOnError::Config(format!(
                "stability.min_samples ({}) must be between {} and stability.window ({})",
                s.min_samples, BOOTSTRAP_SAMPLES, s.window
            )));
        }
        if !(0.0 < s.min_rate && s.min_rate <= s.max_rate && s.max_rate <= 1.0) {
            return Err(TryOnError::Config(format!(
                "stability rates must satisfy 0 < min_rate <= max_rate <= 1, got {} / {}",
                s.min_rate, s.max_rate
            )));
        }

        let f = &self.fit;
        if !(f.min_scale > 0.0 && f.min_scale <= f.max_scale && f.max_scale.is_finite()) {
            return Err(TryOnError::Config(format!(
                "fit scale range [{}, {}] is invalid",
                f.min_scale, f.max_scale
            )));
        }

        if self.render.canonical_size <= 0.0 {
            return Err(TryOnError::Config("render.canonical_size must be positive".into()));
        }
        if !(1.0..179.0).contains(&self.render.fov_degrees) {
            return Err(TryOnError::Config("render.fov_degrees must be in [1, 179)".into()));
        }
        if self.detection.interval_ms == 0 {
            return Err(TryOnError::Config("detection.interval_ms must be nonzero".into()));
        }

        Ok(())
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection.interval_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.capture.metadata_timeout_ms)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "fittingroom", "FittingRoom")
        .map(|dirs| dirs.config_dir().join("fitting_room.toml"))
}

fn merge_toml(base: &mut toml::Value, overrides: toml::Value) {
    match (base, overrides) {
        (toml::Value::Table(base), toml::Value::Table(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, value) => *base = value,
    }
}
