mod capture;
mod cli;
mod config;
mod encoder;
mod error;
mod pipeline;
mod render;
mod status;
mod transport;
mod tui;

use anyhow::{Context, Result};
use cli::{Cli, Commands, ConfigAction, Overrides};
use config::{data_dir, expand_path, Settings};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use capture::CameraBackend;
use encoder::BuiltinCodecs;
use pipeline::{PipelineController, PipelineEvent};

const LOG_FILE: &str = "camstream.log";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    let settings_path = expand_path(&cli.settings);
    let synthetic = cli.synthetic;

    let command = cli.command.unwrap_or(Commands::Stream {
        overrides: Overrides::default(),
        graphics: None,
    });

    match command {
        Commands::Stream {
            overrides,
            graphics,
        } => {
            init_logging(true)?;
            start_console(&settings_path, &overrides, graphics.as_deref(), synthetic).await?;
        }
        Commands::Run {
            overrides,
            duration,
        } => {
            init_logging(false)?;
            run_headless(&settings_path, &overrides, duration, synthetic).await?;
        }
        Commands::Devices => {
            init_logging(false)?;
            list_devices(synthetic)?;
        }
        Commands::Config { action } => {
            config_command(&settings_path, action)?;
        }
    }

    Ok(())
}

/// `CAMSTREAM_LOG` wins over `RUST_LOG`; default `info`. The console logs to
/// a file so the alternate screen stays intact.
fn init_logging(to_file: bool) -> Result<()> {
    let filter = EnvFilter::try_from_env("CAMSTREAM_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if to_file {
        let dir = data_dir();
        std::fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE))
            .with_context(|| format!("Failed to open log file in {}", dir.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn camera_backend(synthetic: bool) -> Result<Box<dyn CameraBackend>> {
    let backend = capture::backend(synthetic).context("No camera backend")?;
    if synthetic {
        info!("using the synthetic test-pattern camera");
    }
    Ok(backend)
}

fn load_settings(path: &Path, overrides: &Overrides) -> Result<(Settings, Settings)> {
    let saved = Settings::load(path)?;
    let mut effective = saved.clone();
    overrides.apply(&mut effective);
    Ok((saved, effective))
}

async fn start_console(
    path: &Path,
    overrides: &Overrides,
    graphics: Option<&str>,
    synthetic: bool,
) -> Result<()> {
    let (saved, effective) = load_settings(path, overrides)?;
    let backend = camera_backend(synthetic)?;

    // Query the terminal before raw mode.
    let picker = tui::create_picker(graphics);

    let controller =
        PipelineController::new(effective.pipeline_config(), backend, Box::new(BuiltinCodecs));
    let mut ui = tui::StreamUI::new(controller, saved, path.to_path_buf(), Some(picker));
    ui.run().await
}

async fn run_headless(
    path: &Path,
    overrides: &Overrides,
    duration: Option<u64>,
    synthetic: bool,
) -> Result<()> {
    let (_, effective) = load_settings(path, overrides)?;

    let mut controller = PipelineController::new(
        effective.pipeline_config(),
        camera_backend(synthetic)?,
        Box::new(BuiltinCodecs),
    );
    controller.start().context("Failed to start streaming")?;
    info!(url = %effective.endpoint(), "connecting");

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = &mut deadline => {
                info!("duration elapsed");
                break;
            }
            event = controller.step() => match event {
                PipelineEvent::Streaming { url, mime } => {
                    info!(url = %url, mime = %mime, "streaming");
                }
                PipelineEvent::Failed(err) => {
                    return Err(err).context("Streaming failed");
                }
                _ => {}
            }
        }
    }

    controller.stop();
    info!(frames_sent = controller.frames_sent(), "done");
    Ok(())
}

fn list_devices(synthetic: bool) -> Result<()> {
    let backend = camera_backend(synthetic)?;
    let devices = backend.devices().context("Failed to list cameras")?;

    if devices.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }
    for device in devices {
        let facing = match device.facing {
            Some(facing) => format!("{:?}", facing).to_lowercase(),
            None => "-".to_string(),
        };
        println!("{:<24} {:<12} {}", device.id, facing, device.label);
    }
    Ok(())
}

fn config_command(path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let settings = Settings::load(path)?;
            println!("# {}", path.display());
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        ConfigAction::Set { key, value } => {
            let mut settings = Settings::load(path)?;
            settings.set(&key, &value)?;
            settings.save(path)?;
            println!("✅ {} = {}", key, value);
        }
        ConfigAction::Reset => {
            Settings::default().save(path)?;
            println!("✅ Settings reset: {}", path.display());
        }
    }
    Ok(())
}
