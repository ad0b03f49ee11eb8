use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use pigment_contracts::presentation::{Artifact, LogLevel, StatusClass};
use pigment_contracts::protocol::{Frame, FRAME_HEADER_LEN};

use crate::clock::Clock;
use crate::connection::{ConnectError, Connector, FrameChannel, FrameRead};
use crate::presenter::Presenter;
use crate::submit::Submitter;

pub(crate) const SCRIPT_POLL: Duration = Duration::from_millis(100);

pub(crate) struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }

    pub(crate) fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }
}

pub(crate) fn framed(payload: &[u8]) -> Vec<u8> {
    let mut raw = vec![0u8; FRAME_HEADER_LEN];
    raw[3] = 1;
    raw[7] = 2;
    raw.extend_from_slice(payload);
    raw
}

#[derive(Debug, Clone)]
pub(crate) enum ScriptAction {
    Deliver(Frame),
    RemoteClose,
    Fail(String),
}

/// One scripted read result, delivered `wait` after the previous one.
#[derive(Debug, Clone)]
pub(crate) struct ScriptStep {
    wait: Duration,
    action: ScriptAction,
}

impl ScriptStep {
    pub(crate) fn chunk(wait: Duration, payload: &[u8]) -> Self {
        Self::raw_binary(wait, framed(payload))
    }

    pub(crate) fn raw_binary(wait: Duration, bytes: Vec<u8>) -> Self {
        Self {
            wait,
            action: ScriptAction::Deliver(Frame::Binary(bytes)),
        }
    }

    pub(crate) fn text(wait: Duration, raw: &str) -> Self {
        Self {
            wait,
            action: ScriptAction::Deliver(Frame::Text(raw.to_string())),
        }
    }

    pub(crate) fn completion(wait: Duration) -> Self {
        Self::text(wait, r#"{"type":"executing","data":{"node":null,"prompt_id":"p-1"}}"#)
    }

    pub(crate) fn remote_close(wait: Duration) -> Self {
        Self {
            wait,
            action: ScriptAction::RemoteClose,
        }
    }

    pub(crate) fn error(wait: Duration, message: &str) -> Self {
        Self {
            wait,
            action: ScriptAction::Fail(message.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ConnectOutcome {
    Open(Vec<ScriptStep>),
    /// Handshake that takes the given time before succeeding.
    Slow(Duration, Vec<ScriptStep>),
    Timeout,
    Failed(String),
}

impl ConnectOutcome {
    pub(crate) fn open(steps: Vec<ScriptStep>) -> Self {
        Self::Open(steps)
    }
}

#[derive(Clone)]
pub(crate) struct ScriptedConnector {
    clock: Arc<ManualClock>,
    outcomes: Arc<Mutex<VecDeque<ConnectOutcome>>>,
    attempts: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub(crate) fn new(clock: Arc<ManualClock>, outcomes: Vec<ConnectOutcome>) -> Self {
        Self {
            clock,
            outcomes: Arc::new(Mutex::new(outcomes.into())),
            attempts: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn channels_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn channel(&self, steps: Vec<ScriptStep>) -> Box<dyn FrameChannel> {
        Box::new(ScriptedChannel {
            clock: self.clock.clone(),
            steps: steps.into(),
            closed: self.closed.clone(),
        })
    }
}

impl Connector for ScriptedConnector {
    fn connect(
        &self,
        _endpoint: &str,
        _deadline: Instant,
    ) -> Result<Box<dyn FrameChannel>, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcomes.lock().unwrap().pop_front();
        match outcome {
            Some(ConnectOutcome::Open(steps)) => Ok(self.channel(steps)),
            Some(ConnectOutcome::Slow(delay, steps)) => {
                self.clock.advance(delay);
                Ok(self.channel(steps))
            }
            Some(ConnectOutcome::Timeout) => Err(ConnectError::Timeout),
            Some(ConnectOutcome::Failed(reason)) => Err(ConnectError::Failed(reason)),
            None => Err(ConnectError::Failed("no scripted outcome".to_string())),
        }
    }
}

/// Replays a script against the manual clock; each idle read costs one poll.
struct ScriptedChannel {
    clock: Arc<ManualClock>,
    steps: VecDeque<ScriptStep>,
    closed: Arc<AtomicUsize>,
}

impl FrameChannel for ScriptedChannel {
    fn read_frame(&mut self) -> anyhow::Result<FrameRead> {
        let Some(front) = self.steps.front_mut() else {
            self.clock.advance(SCRIPT_POLL);
            return Ok(FrameRead::Idle);
        };
        if front.wait > SCRIPT_POLL {
            front.wait -= SCRIPT_POLL;
            self.clock.advance(SCRIPT_POLL);
            return Ok(FrameRead::Idle);
        }
        self.clock.advance(front.wait);
        match self.steps.pop_front().map(|step| step.action) {
            Some(ScriptAction::Deliver(frame)) => Ok(FrameRead::Frame(frame)),
            Some(ScriptAction::RemoteClose) => Ok(FrameRead::Closed),
            Some(ScriptAction::Fail(message)) => Err(anyhow!(message)),
            None => Ok(FrameRead::Idle),
        }
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct RecordingPresenter {
    statuses: Mutex<Vec<(String, StatusClass)>>,
    logs: Mutex<Vec<(LogLevel, String)>>,
    rendered: Mutex<Vec<Vec<u8>>>,
    fallbacks: Mutex<Vec<String>>,
    sessions: Mutex<Vec<String>>,
    reject_render: AtomicBool,
}

impl RecordingPresenter {
    pub(crate) fn rejecting_render() -> Self {
        let presenter = Self::default();
        presenter.reject_render.store(true, Ordering::SeqCst);
        presenter
    }

    pub(crate) fn has_log(&self, level: LogLevel, needle: &str) -> bool {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .any(|(logged, message)| *logged == level && message.contains(needle))
    }

    pub(crate) fn count_logs(&self, needle: &str) -> usize {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, message)| message.contains(needle))
            .count()
    }

    pub(crate) fn has_status(&self, text: &str, class: StatusClass) -> bool {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .any(|(logged, logged_class)| logged == text && *logged_class == class)
    }

    pub(crate) fn last_status(&self) -> Option<(String, StatusClass)> {
        self.statuses.lock().unwrap().last().cloned()
    }

    pub(crate) fn rendered(&self) -> Vec<Vec<u8>> {
        self.rendered.lock().unwrap().clone()
    }

    pub(crate) fn fallbacks(&self) -> Vec<String> {
        self.fallbacks.lock().unwrap().clone()
    }

    pub(crate) fn sessions(&self) -> Vec<String> {
        self.sessions.lock().unwrap().clone()
    }
}

impl Presenter for RecordingPresenter {
    fn begin_session(&self, session_id: &str) {
        self.sessions.lock().unwrap().push(session_id.to_string());
    }

    fn set_status(&self, text: &str, class: StatusClass) {
        self.statuses.lock().unwrap().push((text.to_string(), class));
    }

    fn debug_log(&self, level: LogLevel, message: &str) {
        self.logs.lock().unwrap().push((level, message.to_string()));
    }

    fn render_image(&self, artifact: &Artifact) -> anyhow::Result<()> {
        if self.reject_render.load(Ordering::SeqCst) {
            anyhow::bail!("image decoder rejected blob");
        }
        self.rendered.lock().unwrap().push(artifact.bytes().to_vec());
        Ok(())
    }

    fn render_fallback(&self, data_url: &str) -> anyhow::Result<()> {
        self.fallbacks.lock().unwrap().push(data_url.to_string());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedSubmitter {
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
    rejection: Option<String>,
}

impl ScriptedSubmitter {
    pub(crate) fn rejecting(reason: &str) -> Self {
        Self {
            rejection: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Submitter for ScriptedSubmitter {
    fn submit(&self, prompt: &str) -> anyhow::Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.rejection {
            Some(reason) => Err(anyhow!(reason.clone())),
            None => Ok(Some("Generation started".to_string())),
        }
    }
}
