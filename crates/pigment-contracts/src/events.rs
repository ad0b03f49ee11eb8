use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::presentation::{LogLevel, StatusClass};

pub type EventPayload = Map<String, Value>;

/// Append-only `events.jsonl` log for one generator process.
///
/// - default fields are `type`, `session_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventLog {
    inner: Arc<EventLogInner>,
}

#[derive(Debug)]
struct EventLogInner {
    path: PathBuf,
    session_id: Mutex<Option<String>>,
    lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(EventLogInner {
                path: path.into(),
                session_id: Mutex::new(None),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Tags every following record with `session_id`; `None` clears the tag.
    pub fn set_session(&self, session_id: Option<&str>) {
        if let Ok(mut current) = self.inner.session_id.lock() {
            *current = session_id.map(str::to_string);
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner
            .session_id
            .lock()
            .ok()
            .and_then(|current| current.clone())
    }

    pub fn record(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let row = self.row(event_type, payload);
        self.append(&row)?;
        Ok(Value::Object(row))
    }

    pub fn debug_log(&self, level: LogLevel, message: &str) -> anyhow::Result<Value> {
        let mut payload = EventPayload::new();
        payload.insert(
            "level".to_string(),
            Value::String(level.as_str().to_string()),
        );
        payload.insert("message".to_string(), Value::String(message.to_string()));
        self.record("debug_log", payload)
    }

    pub fn status(&self, text: &str, class: StatusClass) -> anyhow::Result<Value> {
        let mut payload = EventPayload::new();
        payload.insert("text".to_string(), Value::String(text.to_string()));
        payload.insert(
            "class".to_string(),
            Value::String(class.css_class().to_string()),
        );
        self.record("status", payload)
    }
    fn row(&self, event_type: &str, payload: EventPayload) -> EventPayload {
        let session = self.session_id().map_or(Value::Null, Value::String);
        let mut row = EventPayload::new();
        row.insert("type".to_string(), Value::String(event_type.to_string()));
        row.insert("session_id".to_string(), session);
        row.insert("ts".to_string(), Value::String(now_utc_iso()));
        row.extend(payload);
        row
    }

    fn append(&self, row: &EventPayload) -> anyhow::Result<()> {
        let path = &self.inner.path;
        let line = serde_json::to_string(row)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        writeln!(file, "{line}").with_context(|| format!("failed to append to {}", path.display()))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
