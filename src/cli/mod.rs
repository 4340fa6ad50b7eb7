use clap::{Args, Parser, Subcommand};

use crate::capture::{ResolutionClass, ResolutionPolicy};
use crate::config::{Settings, DEFAULT_SETTINGS_PATH};
use crate::encoder::EncoderMode;

#[derive(Parser)]
#[command(name = "camstream")]
#[command(about = "📷 Stream a zoomed, annotated webcam feed over WebSocket", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Settings file path
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_PATH)]
    pub settings: String,

    /// Use the built-in test pattern instead of a real camera
    #[arg(long, global = true)]
    pub synthetic: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Interactive streaming console (default)
    Stream {
        #[command(flatten)]
        overrides: Overrides,

        /// Force preview graphics protocol (sixel, kitty, iterm2, halfblocks)
        #[arg(long)]
        graphics: Option<String>,
    },

    /// Stream without a UI until Ctrl-C
    Run {
        #[command(flatten)]
        overrides: Overrides,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// List available cameras
    Devices,

    /// Inspect or change saved settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the current settings
    Show,

    /// Change one setting
    Set {
        /// Setting name (host, port, resolution, fps, zoom, mode, ...)
        key: String,
        value: String,
    },

    /// Restore defaults
    Reset,
}

/// Per-run overrides on top of the saved settings. Not persisted.
#[derive(Args, Default, Clone)]
pub struct Overrides {
    /// Server host or IP
    #[arg(long)]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Output resolution
    #[arg(short, long, value_enum)]
    pub resolution: Option<ResolutionClass>,

    /// Frames per second
    #[arg(short, long)]
    pub fps: Option<f64>,

    /// Digital zoom factor (1.0-8.0)
    #[arg(short, long)]
    pub zoom: Option<f64>,

    /// Encoder mode
    #[arg(short, long, value_enum)]
    pub mode: Option<EncoderMode>,

    /// Resolution constraints as hard requirements or soft targets
    #[arg(long, value_enum)]
    pub policy: Option<ResolutionPolicy>,

    /// Camera id, or front/back
    #[arg(short, long)]
    pub device: Option<String>,

    /// Connect with wss://
    #[arg(long)]
    pub secure: bool,
}

impl Overrides {
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.host = host.trim().to_string();
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(resolution) = self.resolution {
            settings.resolution = resolution;
        }
        if let Some(fps) = self.fps {
            settings.fps = fps;
        }
        if let Some(zoom) = self.zoom {
            settings.zoom = zoom;
        }
        if let Some(mode) = self.mode {
            settings.mode = mode;
        }
        if let Some(policy) = self.policy {
            settings.policy = policy;
        }
        if let Some(device) = &self.device {
            settings.device = Some(device.clone());
        }
        if self.secure {
            settings.secure = true;
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_console() {
        let cli = Cli::try_parse_from(["camstream"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.settings, DEFAULT_SETTINGS_PATH);
        assert!(!cli.synthetic);
    }

    #[test]
    fn test_synthetic_is_global() {
        let cli = Cli::try_parse_from(["camstream", "devices", "--synthetic"]).unwrap();
        assert!(cli.synthetic);
        assert!(matches!(cli.command, Some(Commands::Devices)));
    }

    #[test]
    fn test_run_overrides_apply() {
        let cli = Cli::try_parse_from([
            "camstream",
            "run",
            "--host",
            "10.0.0.9",
            "--resolution",
            "high",
            "--zoom",
            "2",
            "--duration",
            "30",
            "--settings",
            "/tmp/s.json",
        ])
        .unwrap();
        assert_eq!(cli.settings, "/tmp/s.json");

        let Some(Commands::Run { overrides, duration }) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(duration, Some(30));

        let mut settings = Settings::default();
        overrides.apply(&mut settings);
        assert_eq!(settings.host, "10.0.0.9");
        assert_eq!(settings.resolution, ResolutionClass::High);
        assert_eq!(settings.zoom, 2.0);
        assert_eq!(settings.port, 8181);
        assert!(!settings.secure);
    }

    #[test]
    fn test_config_set_parses() {
        let cli = Cli::try_parse_from(["camstream", "config", "set", "port", "9000"]).unwrap();
        let Some(Commands::Config {
            action: ConfigAction::Set { key, value },
        }) = cli.command
        else {
            panic!("expected config set");
        };
        assert_eq!((key.as_str(), value.as_str()), ("port", "9000"));
    }
}
