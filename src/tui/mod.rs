mod preview;
mod render;

pub use preview::create_picker;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use ratatui_image::picker::Picker;
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::capture::{DeviceInfo, DeviceSelector};
use crate::config::{next_fps, Settings};
use crate::encoder::EncoderMode;
use crate::error::PipelineError;
use crate::capture::negotiate::MIN_ZOOM;
use crate::pipeline::{PipelineController, PipelineEvent};

use preview::Preview;

const ACTIVITY_LINES: usize = 50;
const INPUT_POLL: Duration = Duration::from_millis(50);

/// One line of the activity panel.
pub(crate) struct Activity {
    pub text: String,
    pub is_error: bool,
}

pub struct StreamUI {
    pub(crate) controller: PipelineController,
    /// What is on disk; only interactive changes are folded back into it.
    pub(crate) saved: Settings,
    pub(crate) settings_path: PathBuf,
    pub(crate) devices: Vec<DeviceInfo>,
    pub(crate) picker: Option<Picker>,
    pub(crate) preview: Preview,
    pub(crate) preview_enabled: bool,
    pub(crate) activity: VecDeque<Activity>,
}

impl StreamUI {
    pub fn new(
        controller: PipelineController,
        saved: Settings,
        settings_path: PathBuf,
        picker: Option<Picker>,
    ) -> Self {
        let devices = match controller.backend().devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "failed to list cameras");
                Vec::new()
            }
        };
        let mut ui = Self {
            controller,
            saved,
            settings_path,
            devices,
            preview_enabled: picker.is_some(),
            picker,
            preview: Preview::default(),
            activity: VecDeque::new(),
        };
        ui.log(format!("{} camera(s) found", ui.devices.len()));
        if ui.controller.config().endpoint.host.is_empty() {
            ui.log("No server configured: run `camstream config set host <ip>`".to_string());
        }
        ui
    }

    pub async fn run(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_loop(&mut terminal).await;

        self.controller.stop();

        // Restore terminal
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    async fn run_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> Result<()> {
        loop {
            terminal.draw(|f| self.ui(f))?;

            // `step` is cancel-safe, so the timeout just hands control back
            // to the keyboard.
            if let Ok(event) = tokio::time::timeout(INPUT_POLL, self.controller.step()).await {
                self.on_pipeline_event(event);
            }

            while event::poll(Duration::ZERO)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press && self.handle_key(key) {
                        return Ok(());
                    }
                }
            }
        }
    }

    pub(crate) fn on_pipeline_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Streaming { url, mime } => {
                self.log(format!("Streaming to {} as {}", url, mime));
            }
            PipelineEvent::Frame { .. } => {
                if self.preview_enabled {
                    if let Some(picker) = self.picker.as_mut() {
                        self.preview.update(picker, self.controller.last_frame());
                    }
                }
            }
            PipelineEvent::Failed(err) => self.report(&err),
            PipelineEvent::Flushed { .. } | PipelineEvent::Ignored => {}
        }
    }

    /// Apply one key press. Returns true when the user asked to quit.
    pub(crate) fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return true;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('s') => {
                info!("start requested");
                let result = self.controller.start();
                self.after(result, false);
            }
            KeyCode::Char('x') => {
                if self.controller.state().is_active() {
                    self.controller.stop();
                    self.preview.clear();
                    self.log("Streaming stopped".to_string());
                }
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                let result = self.controller.zoom_in();
                self.after(result, true);
            }
            KeyCode::Char('-') | KeyCode::Char('_') => {
                let result = self.controller.zoom_out();
                self.after(result, true);
            }
            KeyCode::Char('0') => {
                let result = self.controller.set_zoom(MIN_ZOOM);
                self.after(result, true);
            }
            KeyCode::Char('r') => {
                let next = self.controller.config().resolution.next();
                let result = self.controller.set_resolution(next);
                self.after(result, true);
            }
            KeyCode::Char('f') => {
                let next = next_fps(self.controller.config().frame_rate);
                let result = self.controller.set_frame_rate(next);
                self.after(result, true);
            }
            KeyCode::Char('c') => match self.next_device() {
                Some(device) => {
                    let result = self.controller.select_device(device);
                    self.after(result, true);
                }
                None => self.log("No other camera available".to_string()),
            },
            KeyCode::Char('m') => {
                let next = match self.controller.config().mode {
                    EncoderMode::Still => EncoderMode::Continuous,
                    EncoderMode::Continuous => EncoderMode::Still,
                };
                let result = self.controller.set_mode(next);
                self.after(result, true);
            }
            KeyCode::Char('p') => {
                if self.picker.is_some() {
                    self.preview_enabled = !self.preview_enabled;
                    if !self.preview_enabled {
                        self.preview.clear();
                    }
                }
            }
            KeyCode::Char('w') => self.persist(),
            _ => {}
        }
        false
    }

    fn after(&mut self, result: Result<(), PipelineError>, persist: bool) {
        if persist {
            self.persist();
        }
        if let Err(e) = result {
            self.report(&e);
        }
    }

    fn report(&mut self, err: &PipelineError) {
        self.preview.clear();
        self.push(format!("[{}] {}", err.class(), err), true);
    }

    /// Fold interactive changes into the saved settings and write them out.
    pub(crate) fn persist(&mut self) {
        self.saved.absorb(self.controller.config());
        match self.saved.save(&self.settings_path) {
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, "failed to save settings");
                self.log(format!("Failed to save settings: {}", e));
            }
        }
    }

    /// The camera after the current one, wrapping around.
    fn next_device(&self) -> Option<DeviceSelector> {
        if self.devices.is_empty() {
            return None;
        }
        // The system default resolves to the first camera.
        let current = match &self.controller.config().device {
            DeviceSelector::Device { id, .. } => self.devices.iter().position(|d| &d.id == id),
            DeviceSelector::Facing(facing) => {
                self.devices.iter().position(|d| d.facing == Some(*facing))
            }
            DeviceSelector::SystemDefault => None,
        }
        .unwrap_or(0);
        let next = (current + 1) % self.devices.len();
        if next == current {
            return None;
        }
        let device = &self.devices[next];
        Some(DeviceSelector::Device {
            id: device.id.clone(),
            label: Some(device.label.clone()),
        })
    }

    pub(crate) fn log(&mut self, line: String) {
        self.push(line, false);
    }

    fn push(&mut self, line: String, is_error: bool) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        self.activity.push_back(Activity {
            text: format!("{} {}", stamp, line),
            is_error,
        });
        while self.activity.len() > ACTIVITY_LINES {
            self.activity.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticCamera;
    use crate::capture::ResolutionClass;
    use crate::encoder::BuiltinCodecs;
    use crate::pipeline::PipelineState;
    use tempfile::{tempdir, TempDir};

    fn key(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
    }

    fn ui(settings: Settings) -> (StreamUI, TempDir) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let controller = PipelineController::new(
            settings.pipeline_config(),
            Box::new(SyntheticCamera::new()),
            Box::new(BuiltinCodecs),
        );
        (StreamUI::new(controller, settings, path, None), dir)
    }

    #[tokio::test]
    async fn test_quit_keys() {
        let (mut ui, _dir) = ui(Settings::default());
        assert!(!ui.handle_key(key('z')));
        assert!(ui.handle_key(key('q')));
        assert!(ui.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)));
    }

    #[tokio::test]
    async fn test_changes_are_persisted() {
        let (mut ui, _dir) = ui(Settings::default());
        ui.handle_key(key('+'));
        ui.handle_key(key('r'));
        ui.handle_key(key('f'));

        let saved = Settings::load(&ui.settings_path).unwrap();
        assert_eq!(saved.zoom, 1.5);
        assert_eq!(saved.resolution, ResolutionClass::High);
        assert_eq!(saved.fps, 15.0);
        assert_eq!(ui.controller.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn test_start_without_host_is_reported() {
        let (mut ui, _dir) = ui(Settings::default());
        ui.handle_key(key('s'));
        assert_eq!(ui.controller.state(), PipelineState::Idle);
        let last = ui.activity.back().unwrap();
        assert!(last.is_error);
        assert!(last.text.ends_with("[config] enter server host and port first"));
    }

    #[tokio::test]
    async fn test_camera_cycles_through_devices() {
        let (mut ui, _dir) = ui(Settings::default());
        ui.handle_key(key('c'));
        assert_eq!(
            ui.controller.config().device,
            DeviceSelector::Device {
                id: "synthetic-1".into(),
                label: Some("Rear Camera".into())
            }
        );
        ui.handle_key(key('c'));
        assert!(matches!(
            &ui.controller.config().device,
            DeviceSelector::Device { id, .. } if id == "synthetic-0"
        ));
        let saved = Settings::load(&ui.settings_path).unwrap();
        assert_eq!(saved.device.as_deref(), Some("synthetic-0"));
    }

    #[tokio::test]
    async fn test_mode_toggle_and_preview_without_picker() {
        let (mut ui, _dir) = ui(Settings::default());
        ui.handle_key(key('m'));
        assert_eq!(ui.controller.config().mode, EncoderMode::Continuous);
        ui.handle_key(key('p'));
        assert!(!ui.preview_enabled);
    }

    #[tokio::test]
    async fn test_draws_idle_console() {
        let (mut ui, _dir) = ui(Settings::default());
        let mut terminal = Terminal::new(ratatui::backend::TestBackend::new(100, 30)).unwrap();
        terminal.draw(|f| ui.ui(f)).unwrap();

        let text: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(text.contains("camstream"));
        assert!(text.contains("no server configured"));
        assert!(text.contains("Preview unavailable"));
    }

    #[tokio::test]
    async fn test_activity_is_bounded() {
        let (mut ui, _dir) = ui(Settings::default());
        for i in 0..(ACTIVITY_LINES + 10) {
            ui.log(format!("line {}", i));
        }
        assert_eq!(ui.activity.len(), ACTIVITY_LINES);
        assert!(ui.activity.back().unwrap().text.ends_with("line 59"));
    }

    #[tokio::test]
    async fn test_bracketed_info_is_not_an_error() {
        let (mut ui, _dir) = ui(Settings::default());
        ui.log("Streaming to ws://[::1]:8181 as image/jpeg".to_string());
        assert!(!ui.activity.back().unwrap().is_error);
    }

    #[tokio::test]
    async fn test_zoom_reset_key() {
        let (mut ui, _dir) = ui(Settings::default());
        ui.handle_key(key('+'));
        ui.handle_key(key('+'));
        assert_eq!(ui.controller.config().zoom.factor(), 2.0);

        ui.handle_key(key('0'));
        assert_eq!(ui.controller.config().zoom.factor(), 1.0);
        assert_eq!(Settings::load(&ui.settings_path).unwrap().zoom, 1.0);
    }
}
