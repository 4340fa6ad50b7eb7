use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};
use ratatui_image::StatefulImage;

use super::StreamUI;
use crate::capture::DeviceSelector;
use crate::pipeline::{PipelineState, APP_VERSION};

const KEY_HINTS: [(&str, &str); 11] = [
    ("s", "start"),
    ("x", "stop"),
    ("+/-", "zoom"),
    ("0", "1x"),
    ("r", "resolution"),
    ("f", "fps"),
    ("c", "camera"),
    ("m", "mode"),
    ("p", "preview"),
    ("w", "save"),
    ("q", "quit"),
];

fn state_style(state: PipelineState) -> (&'static str, Color) {
    match state {
        PipelineState::Idle => ("● Idle", Color::DarkGray),
        PipelineState::Starting => ("◐ Starting", Color::Yellow),
        PipelineState::Streaming => ("● Streaming", Color::Green),
        PipelineState::Stopping => ("◑ Stopping", Color::Yellow),
    }
}

impl StreamUI {
    pub(crate) fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4), // Header needs 4: border + 2 content lines + border
                Constraint::Min(8),
                Constraint::Length(7),
                Constraint::Length(1), // Key hints
            ])
            .split(f.area());

        self.render_header(f, chunks[0]);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(20), Constraint::Length(38)])
            .split(chunks[1]);
        self.render_preview(f, body[0]);
        self.render_session(f, body[1]);

        self.render_activity(f, chunks[2]);
        Self::render_hints(f, chunks[3]);
    }

    fn render_header(&self, f: &mut Frame, area: Rect) {
        let config = self.controller.config();
        let endpoint = if config.endpoint.host.is_empty() {
            "no server configured".to_string()
        } else {
            config.endpoint.url()
        };
        let (state, color) = state_style(self.controller.state());

        let header = Paragraph::new(vec![
            Line::from(vec![
                Span::styled(
                    format!("📷 camstream v{}", APP_VERSION),
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                ),
                Span::raw(" | "),
                Span::styled(endpoint, Style::default().fg(Color::Yellow)),
                Span::raw(" | "),
                Span::styled(state, Style::default().fg(color).add_modifier(Modifier::BOLD)),
            ]),
            Line::from(Span::raw(self.controller.status().to_string())),
        ])
        .block(Block::default().borders(Borders::ALL).title("Status"));
        f.render_widget(header, area);
    }

    fn render_preview(&mut self, f: &mut Frame, area: Rect) {
        if !self.preview_enabled {
            let text = if self.picker.is_some() {
                "Preview off (p to show)"
            } else {
                "Preview unavailable in this terminal"
            };
            let placeholder = Paragraph::new(text)
                .style(Style::default().fg(Color::DarkGray))
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).title("Preview"));
            f.render_widget(placeholder, area);
            return;
        }

        // Render the image directly, no border: borders make ratatui clear
        // the area, which flickers with Sixel/Kitty.
        match self.preview.protocol_mut() {
            Some(protocol) => {
                f.render_stateful_widget(StatefulImage::default(), area, protocol);
            }
            None => {
                let waiting = if self.controller.state() == PipelineState::Streaming {
                    "waiting for frames..."
                } else {
                    "press s to start streaming"
                };
                let placeholder = Paragraph::new(waiting)
                    .style(Style::default().fg(Color::DarkGray))
                    .alignment(Alignment::Center);
                f.render_widget(placeholder, area);
            }
        }
    }

    fn render_session(&self, f: &mut Frame, area: Rect) {
        let config = self.controller.config();
        let readings = self.controller.readings();
        let granted = self
            .controller
            .negotiated()
            .map(|g| format!("{} @ {:.0} fps", g.resolution(), g.frame_rate))
            .unwrap_or_else(|| "—".to_string());
        let camera = self
            .controller
            .device_label()
            .map(str::to_string)
            .unwrap_or_else(|| match &config.device {
                DeviceSelector::Device {
                    label: Some(label), ..
                } => label.clone(),
                DeviceSelector::Device { id, .. } => id.clone(),
                DeviceSelector::Facing(facing) => format!("{:?}", facing),
                DeviceSelector::SystemDefault => "default".to_string(),
            });

        let row = |label: &'static str, value: String| {
            Line::from(vec![
                Span::styled(format!("{:<11}", label), Style::default().fg(Color::DarkGray)),
                Span::raw(value),
            ])
        };

        let lines = vec![
            row("Resolution", config.resolution.label()),
            row("Capture", granted),
            row("Zoom", format!("{:.1}x", config.zoom.factor())),
            row("FPS", format!("{}", config.frame_rate)),
            row("Mode", format!("{:?}", config.mode).to_lowercase()),
            row("Camera", camera),
            row("Sent", format!("{} payloads", self.controller.frames_sent())),
            Line::from(""),
            row("Time", readings.datetime),
            row("Power", readings.battery),
        ];

        let panel = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title("Session"));
        f.render_widget(panel, area);
    }

    fn render_activity(&self, f: &mut Frame, area: Rect) {
        let visible = area.height.saturating_sub(2) as usize;
        let items: Vec<ListItem> = self
            .activity
            .iter()
            .skip(self.activity.len().saturating_sub(visible))
            .map(|line| {
                let style = if line.is_error {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default()
                };
                ListItem::new(Span::styled(line.text.clone(), style))
            })
            .collect();

        let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Activity"));
        f.render_widget(list, area);
    }

    fn render_hints(f: &mut Frame, area: Rect) {
        let mut spans = vec![Span::raw(" ")];
        for (key, action) in KEY_HINTS {
            spans.push(Span::styled(
                key,
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ));
            spans.push(Span::raw(format!(" {} │ ", action)));
        }
        let hints = Paragraph::new(Line::from(spans))
            .style(Style::default().bg(Color::DarkGray).fg(Color::White));
        f.render_widget(hints, area);
    }
}
