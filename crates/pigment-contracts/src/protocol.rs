use serde_json::Value;

/// Length of the backend framing header that prefixes every binary frame.
pub const FRAME_HEADER_LEN: usize = 8;

/// One unit delivered over the streaming channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Binary(Vec<u8>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Status { payload: Value },
    Progress { value: f64, max: f64 },
    /// `node == None` is the backend's "work completed" signal.
    Executing { node: Option<String> },
    ExecutionError { message: String },
    BinaryChunk { bytes: Vec<u8> },
    Unrecognized { event_type: String, raw: String },
    Malformed { raw: String, reason: String },
}

impl InboundEvent {
    pub fn is_noise(&self) -> bool {
        matches!(self, Self::Unrecognized { .. } | Self::Malformed { .. })
    }
}

/// Classifies one inbound frame. Pure: nothing is carried between calls.
pub fn decode_frame(frame: Frame) -> InboundEvent {
    match frame {
        Frame::Binary(bytes) => InboundEvent::BinaryChunk { bytes },
        Frame::Text(raw) => decode_text(raw),
    }
}

fn decode_text(raw: String) -> InboundEvent {
    let parsed: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            return InboundEvent::Malformed {
                reason: format!("invalid json: {err}"),
                raw,
            }
        }
    };
    let Some(event_type) = parsed.get("type").and_then(Value::as_str) else {
        return InboundEvent::Malformed {
            raw,
            reason: "missing type discriminator".to_string(),
        };
    };
    let data = parsed.get("data").cloned().unwrap_or(Value::Null);

    match event_type {
        "status" => InboundEvent::Status { payload: data },
        "progress" => {
            let value = data.get("value").and_then(Value::as_f64);
            let max = data.get("max").and_then(Value::as_f64);
            match (value, max) {
                (Some(value), Some(max)) => InboundEvent::Progress { value, max },
                _ => InboundEvent::Malformed {
                    raw,
                    reason: "progress requires numeric value and max".to_string(),
                },
            }
        }
        "executing" => {
            if !data.is_object() {
                return InboundEvent::Malformed {
                    raw,
                    reason: "executing requires a data object".to_string(),
                };
            }
            let node = match data.get("node") {
                None | Some(Value::Null) => None,
                Some(Value::String(id)) => Some(id.clone()),
                Some(other) => Some(other.to_string()),
            };
            InboundEvent::Executing { node }
        }
        "execution_error" => InboundEvent::ExecutionError {
            message: data
                .get("exception_message")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .unwrap_or("Backend reported an execution error")
                .to_string(),
        },
        "execution_interrupted" => InboundEvent::ExecutionError {
            message: "Execution interrupted".to_string(),
        },
        other => InboundEvent::Unrecognized {
            event_type: other.to_string(),
            raw,
        },
    }
}

/// `round(value / max * 100)` clamped to 0..=100; a non-positive or
/// non-finite `max` reads as 0%.
pub fn progress_percent(value: f64, max: f64) -> u8 {
    if !max.is_finite() || max <= 0.0 || !value.is_finite() {
        return 0;
    }
    let pct = (value / max * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}
