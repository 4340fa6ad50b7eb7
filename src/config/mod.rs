//! Persisted user settings (`~/.camstream/settings.json`).

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::capture::{DeviceSelector, Facing, ResolutionClass, ResolutionPolicy};
use crate::encoder::EncoderMode;
use crate::pipeline::{PipelineConfig, ZoomState};
use crate::transport::Endpoint;

pub const DEFAULT_SETTINGS_PATH: &str = "~/.camstream/settings.json";
pub const DEFAULT_PORT: u16 = 8181;
pub const DEFAULT_FPS: f64 = 10.0;
pub const FPS_CHOICES: [f64; 5] = [5.0, 10.0, 15.0, 24.0, 30.0];

pub const KEYS: [&str; 12] = [
    "host",
    "port",
    "path",
    "secure",
    "resolution",
    "fps",
    "zoom",
    "device",
    "mode",
    "policy",
    "announce",
    "inhibit_sleep",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub path: Option<String>,
    pub secure: bool,
    pub resolution: ResolutionClass,
    pub fps: f64,
    pub zoom: f64,
    /// Device id, or `front`/`back` to pick by facing.
    pub device: Option<String>,
    pub mode: EncoderMode,
    pub policy: ResolutionPolicy,
    pub announce: bool,
    pub inhibit_sleep: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            path: None,
            secure: false,
            resolution: ResolutionClass::Medium,
            fps: DEFAULT_FPS,
            zoom: 1.0,
            device: None,
            mode: EncoderMode::Still,
            policy: ResolutionPolicy::Ideal,
            announce: true,
            inhibit_sleep: false,
        }
    }
}

impl Settings {
    /// Read settings, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid settings file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    /// Update one field from its string form, as given to `config set`.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "host" => self.host = value.to_string(),
            "port" => self.port = value.parse().context("port must be 1-65535")?,
            "path" => self.path = optional(value),
            "secure" => self.secure = parse_bool(value)?,
            "resolution" => self.resolution = parse_enum(value)?,
            "fps" => {
                let fps: f64 = value.parse().context("fps must be a number")?;
                if !(fps.is_finite() && fps > 0.0) {
                    bail!("fps must be positive");
                }
                self.fps = fps;
            }
            "zoom" => {
                let zoom: f64 = value.parse().context("zoom must be a number")?;
                self.zoom = ZoomState::new(zoom).factor();
            }
            "device" => self.device = optional(value),
            "mode" => self.mode = parse_enum(value)?,
            "policy" => self.policy = parse_enum(value)?,
            "announce" => self.announce = parse_bool(value)?,
            "inhibit_sleep" => self.inhibit_sleep = parse_bool(value)?,
            other => bail!("unknown setting `{}` (expected one of: {})", other, KEYS.join(", ")),
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.host.trim().to_string(),
            port: self.port,
            path: self.path.clone(),
            secure: self.secure,
        }
    }

    pub fn device_selector(&self) -> DeviceSelector {
        match self.device.as_deref().map(str::trim) {
            None | Some("") | Some("default") => DeviceSelector::SystemDefault,
            Some("front") | Some("user") => DeviceSelector::Facing(Facing::User),
            Some("back") | Some("environment") => DeviceSelector::Facing(Facing::Environment),
            Some(id) => DeviceSelector::Device {
                id: id.to_string(),
                label: None,
            },
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            endpoint: self.endpoint(),
            resolution: self.resolution,
            frame_rate: self.fps,
            zoom: ZoomState::new(self.zoom),
            device: self.device_selector(),
            mode: self.mode,
            policy: self.policy,
            announce: self.announce,
            inhibit_sleep: self.inhibit_sleep,
        }
    }

    /// Copy back what the user changed interactively. The endpoint is left
    /// alone so per-run overrides never end up on disk.
    pub fn absorb(&mut self, config: &PipelineConfig) {
        self.resolution = config.resolution;
        self.fps = config.frame_rate;
        self.zoom = config.zoom.factor();
        self.mode = config.mode;
        self.device = match &config.device {
            DeviceSelector::SystemDefault => None,
            DeviceSelector::Facing(Facing::User) => Some("front".to_string()),
            DeviceSelector::Facing(Facing::Environment) => Some("back".to_string()),
            DeviceSelector::Device { id, .. } => Some(id.clone()),
        };
    }
}

/// Next entry of the fps cycle.
pub fn next_fps(current: f64) -> f64 {
    FPS_CHOICES
        .iter()
        .copied()
        .find(|fps| *fps > current)
        .unwrap_or(FPS_CHOICES[0])
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => bail!("expected true or false, got `{}`", other),
    }
}

fn parse_enum<T: ValueEnum>(value: &str) -> Result<T> {
    T::from_str(value, true).map_err(|e| anyhow::anyhow!(e))
}

pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            let mut buf = PathBuf::from(home);
            buf.push(stripped);
            return buf;
        }
    }
    PathBuf::from(path)
}

/// Directory holding settings and logs.
pub fn data_dir() -> PathBuf {
    expand_path("~/.camstream")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.port, 8181);
        assert_eq!(settings.resolution, ResolutionClass::Medium);
        assert_eq!(settings.fps, 10.0);
        assert!(settings.host.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.host = "192.168.1.20".into();
        settings.zoom = 2.5;
        settings.mode = EncoderMode::Continuous;
        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"host": "cam.local", "resolution": "high"}"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.host, "cam.local");
        assert_eq!(settings.resolution, ResolutionClass::High);
        assert_eq!(settings.port, 8181);
        assert!(settings.announce);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn test_set_by_key() {
        let mut settings = Settings::default();
        settings.set("host", " 10.0.0.5 ").unwrap();
        settings.set("port", "9000").unwrap();
        settings.set("resolution", "LOW").unwrap();
        settings.set("zoom", "20").unwrap();
        settings.set("secure", "yes").unwrap();
        settings.set("policy", "exact").unwrap();
        settings.set("path", "").unwrap();

        assert_eq!(settings.host, "10.0.0.5");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.resolution, ResolutionClass::Low);
        assert_eq!(settings.zoom, 8.0);
        assert!(settings.secure);
        assert_eq!(settings.policy, ResolutionPolicy::Exact);
        assert_eq!(settings.path, None);
        assert_eq!(settings.endpoint().url(), "wss://10.0.0.5:9000");

        assert!(settings.set("port", "99999").is_err());
        assert!(settings.set("fps", "0").is_err());
        assert!(settings.set("mode", "mp4").is_err());
        assert!(settings.set("colour", "red").is_err());
    }

    #[test]
    fn test_device_selector() {
        let mut settings = Settings::default();
        assert_eq!(settings.device_selector(), DeviceSelector::SystemDefault);

        settings.device = Some("back".into());
        assert_eq!(
            settings.device_selector(),
            DeviceSelector::Facing(Facing::Environment)
        );

        settings.device = Some("/dev/video2".into());
        assert_eq!(
            settings.device_selector(),
            DeviceSelector::Device {
                id: "/dev/video2".into(),
                label: None
            }
        );
    }

    #[test]
    fn test_absorb_keeps_interactive_changes() {
        let mut settings = Settings::default();
        let mut config = settings.pipeline_config();
        config.zoom.zoom_in();
        config.resolution = ResolutionClass::High;
        config.frame_rate = 24.0;
        config.device = DeviceSelector::Facing(Facing::User);

        settings.absorb(&config);
        assert_eq!(settings.zoom, 1.5);
        assert_eq!(settings.resolution, ResolutionClass::High);
        assert_eq!(settings.fps, 24.0);
        assert_eq!(settings.device.as_deref(), Some("front"));
    }

    #[test]
    fn test_fps_cycle() {
        assert_eq!(next_fps(5.0), 10.0);
        assert_eq!(next_fps(12.0), 15.0);
        assert_eq!(next_fps(30.0), 5.0);
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("/tmp/x"), PathBuf::from("/tmp/x"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_path("~/a/b"), PathBuf::from(home).join("a/b"));
        }
    }
}
