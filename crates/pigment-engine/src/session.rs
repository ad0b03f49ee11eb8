use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use pigment_contracts::presentation::{Artifact, LogLevel, StatusClass};
use pigment_contracts::protocol::{progress_percent, InboundEvent};
use uuid::Uuid;

use crate::error::GenerationError;
use crate::presenter::Presenter;
use crate::reassembler::{AssembleError, ChunkReassembler, QuietTimer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// What the orchestrator should do after feeding the session one input.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Continue,
    Completed(Artifact),
    Failed(GenerationError),
}

/// Post-mortem of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub prompt: String,
    pub status: SessionStatus,
    pub reconnect_count: u32,
    pub created_at: DateTime<Utc>,
    pub artifact_len: Option<usize>,
    pub failure: Option<String>,
}

/// One generation attempt from prompt to artifact or failure.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    prompt: String,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    reconnect_count: u32,
    epoch: Option<u64>,
    chunks: ChunkReassembler,
    quiet: QuietTimer,
    progress: Option<u8>,
    artifact_len: Option<usize>,
    failure: Option<GenerationError>,
}

impl Session {
    pub fn new(prompt: &str, quiet_period: Duration) -> Result<Self, GenerationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            prompt: prompt.to_string(),
            status: SessionStatus::Idle,
            created_at: Utc::now(),
            reconnect_count: 0,
            epoch: None,
            chunks: ChunkReassembler::new(),
            quiet: QuietTimer::new(quiet_period),
            progress: None,
            artifact_len: None,
            failure: None,
        })
    }

    pub fn id(&self) -> String {
        self.id.to_string()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn progress(&self) -> Option<u8> {
        self.progress
    }

    pub fn buffered_chunks(&self) -> usize {
        self.chunks.fragment_count()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.chunks.total_len()
    }

    pub fn quiet_deadline(&self) -> Option<Instant> {
        self.quiet.deadline()
    }

    /// Ties the session to the connection it streams from.
    pub fn bind(&mut self, epoch: u64, reconnect_count: u32) {
        self.epoch = Some(epoch);
        self.reconnect_count = reconnect_count;
    }

    /// Frames read on any other connection belong to no live session.
    pub fn accepts(&self, epoch: u64) -> bool {
        !self.status.is_terminal() && self.epoch == Some(epoch)
    }

    pub fn begin_request(&mut self) -> bool {
        if self.status != SessionStatus::Idle {
            return false;
        }
        self.status = SessionStatus::Requesting;
        true
    }

    pub fn handle(&mut self, event: InboundEvent, now: Instant, log: &dyn Presenter) -> Step {
        if !matches!(
            self.status,
            SessionStatus::Requesting | SessionStatus::Streaming
        ) {
            log.debug_log(
                LogLevel::Warning,
                &format!(
                    "Discarding event for {} session {}",
                    self.status.as_str(),
                    self.id
                ),
            );
            return Step::Continue;
        }

        match event {
            InboundEvent::BinaryChunk { bytes } => {
                log.debug_log(
                    LogLevel::Info,
                    &format!("Received binary data ({} bytes)", bytes.len()),
                );
                if self.chunks.append(&bytes) == 0 {
                    log.debug_log(
                        LogLevel::Warning,
                        "Binary frame carries no image payload; ignoring",
                    );
                    return Step::Continue;
                }
                if self.status == SessionStatus::Requesting {
                    self.status = SessionStatus::Streaming;
                    log.debug_log(LogLevel::Info, "Starting new image reception");
                    log.set_status("Receiving image...", StatusClass::Loading);
                }
                self.quiet.arm(now);
                Step::Continue
            }
            InboundEvent::Progress { value, max } => {
                let pct = progress_percent(value, max);
                self.progress = Some(pct);
                log.set_status(&format!("Generating... {pct}%"), StatusClass::Loading);
                Step::Continue
            }
            InboundEvent::Status { payload } => {
                log.debug_log(LogLevel::Info, &format!("Server status: {payload}"));
                Step::Continue
            }
            InboundEvent::Executing { node: Some(node) } => {
                log.debug_log(LogLevel::Info, &format!("Executing node {node}"));
                Step::Continue
            }
            InboundEvent::Executing { node: None } => {
                log.debug_log(LogLevel::Success, "Generation completed");
                self.assemble(log)
            }
            InboundEvent::ExecutionError { message } => {
                Step::Failed(self.fail(GenerationError::BackendFailed(message)))
            }
            InboundEvent::Unrecognized { event_type, .. } => {
                log.debug_log(
                    LogLevel::Warning,
                    &format!("Unknown message type: {event_type}"),
                );
                Step::Continue
            }
            InboundEvent::Malformed { raw, reason } => {
                log.debug_log(
                    LogLevel::Warning,
                    &format!(
                        "Received malformed message ({reason}): {}",
                        truncate_chars(&raw, 100)
                    ),
                );
                Step::Continue
            }
        }
    }

    /// Quiet-period check; call on every poll tick.
    pub fn poll(&mut self, now: Instant, log: &dyn Presenter) -> Step {
        if self.status != SessionStatus::Streaming || !self.quiet.fire_if_due(now) {
            return Step::Continue;
        }
        log.debug_log(LogLevel::Info, "No new chunks within quiet period; assembling");
        self.assemble(log)
    }

    /// The remote closed the channel. Buffered chunks are a truncated image
    /// and are dropped with the session.
    pub fn on_remote_close(&mut self, log: &dyn Presenter) -> Step {
        if self.status.is_terminal() {
            return Step::Continue;
        }
        if self.status == SessionStatus::Streaming {
            log.debug_log(
                LogLevel::Warning,
                &format!(
                    "Connection closed mid-stream; discarding {} buffered chunks",
                    self.chunks.fragment_count()
                ),
            );
        }
        Step::Failed(self.fail(GenerationError::ConnectionClosed))
    }

    pub fn fail(&mut self, err: GenerationError) -> GenerationError {
        self.status = SessionStatus::Failed;
        self.reset_buffers();
        self.failure = Some(err.clone());
        err
    }

    pub fn time_out(&mut self, timeout: Duration) -> GenerationError {
        self.status = SessionStatus::TimedOut;
        self.reset_buffers();
        let err = GenerationError::ImageTimeout { timeout };
        self.failure = Some(err.clone());
        err
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id(),
            prompt: self.prompt.clone(),
            status: self.status,
            reconnect_count: self.reconnect_count,
            created_at: self.created_at,
            artifact_len: self.artifact_len,
            failure: self.failure.as_ref().map(ToString::to_string),
        }
    }

    fn assemble(&mut self, log: &dyn Presenter) -> Step {
        match self.chunks.assemble() {
            Ok(artifact) => {
                self.quiet.disarm();
                self.status = SessionStatus::Completed;
                self.artifact_len = Some(artifact.len());
                log.debug_log(
                    LogLevel::Success,
                    &format!(
                        "Image assembled ({} bytes, sha256 {})",
                        artifact.len(),
                        artifact.short_digest()
                    ),
                );
                Step::Completed(artifact)
            }
            Err(AssembleError::NoData) => {
                log.debug_log(LogLevel::Warning, &AssembleError::NoData.to_string());
                Step::Continue
            }
        }
    }

    fn reset_buffers(&mut self) {
        self.chunks.clear();
        self.quiet.disarm();
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
