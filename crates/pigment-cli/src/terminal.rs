use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use image::ImageFormat;
use pigment_contracts::events::{EventLog, EventPayload};
use pigment_contracts::presentation::{Artifact, LogLevel, StatusClass};
use pigment_engine::Presenter;
use serde_json::Value;

/// Terminal status line + stderr debug log + PNG file sink.
pub struct TerminalPresenter {
    events: Option<EventLog>,
    echo_debug: bool,
    target: Mutex<PathBuf>,
    delivered: Mutex<Option<PathBuf>>,
}

impl TerminalPresenter {
    pub fn new(target: impl Into<PathBuf>, events: Option<EventLog>, echo_debug: bool) -> Self {
        Self {
            events,
            echo_debug,
            target: Mutex::new(target.into()),
            delivered: Mutex::new(None),
        }
    }

    pub fn set_target(&self, target: impl Into<PathBuf>) {
        if let Ok(mut current) = self.target.lock() {
            *current = target.into();
        }
        if let Ok(mut delivered) = self.delivered.lock() {
            *delivered = None;
        }
    }

    /// Where the last artifact landed: the PNG or its data-URL fallback.
    pub fn delivered(&self) -> Option<PathBuf> {
        self.delivered.lock().ok().and_then(|path| path.clone())
    }

    fn target(&self) -> PathBuf {
        self.target
            .lock()
            .map(|path| path.clone())
            .unwrap_or_default()
    }

    fn mark_delivered(&self, path: PathBuf) {
        if let Ok(mut delivered) = self.delivered.lock() {
            *delivered = Some(path);
        }
    }
}

impl Presenter for TerminalPresenter {
    fn begin_session(&self, session_id: &str) {
        if let Some(events) = &self.events {
            events.set_session(Some(session_id));
            let mut payload = EventPayload::new();
            payload.insert(
                "target".to_string(),
                Value::String(self.target().to_string_lossy().to_string()),
            );
            let _ = events.record("session_started", payload);
        }
    }

    fn end_session(&self) {
        if let Some(events) = &self.events {
            events.set_session(None);
        }
    }

    fn set_status(&self, text: &str, class: StatusClass) {
        eprintln!("[{}] {text}", class.as_str());
        if let Some(events) = &self.events {
            let _ = events.status(text, class);
        }
    }

    fn debug_log(&self, level: LogLevel, message: &str) {
        if self.echo_debug || level == LogLevel::Error {
            eprintln!("[{}] {message}", Local::now().format("%H:%M:%S"));
        }
        if let Some(events) = &self.events {
            let _ = events.debug_log(level, message);
        }
    }

    fn render_image(&self, artifact: &Artifact) -> Result<()> {
        image::load_from_memory_with_format(artifact.bytes(), ImageFormat::Png)
            .context("assembled bytes are not a decodable PNG")?;
        let path = self.target();
        write_creating_parent(&path, artifact.bytes())?;
        self.mark_delivered(path);
        Ok(())
    }

    fn render_fallback(&self, data_url: &str) -> Result<()> {
        let path = fallback_path(&self.target());
        write_creating_parent(&path, data_url.as_bytes())?;
        self.mark_delivered(path);
        Ok(())
    }
}

pub fn fallback_path(target: &Path) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    target.with_file_name(format!("{stem}.datauri.txt"))
}

fn write_creating_parent(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}
