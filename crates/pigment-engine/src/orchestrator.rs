use std::sync::{Arc, Mutex, TryLockError};

use pigment_contracts::presentation::{Artifact, LogLevel, StatusClass};
use pigment_contracts::protocol::decode_frame;

use crate::clock::{Clock, SystemClock};
use crate::config::GeneratorConfig;
use crate::connection::{
    error_chain_message, ConnectionManager, ConnectionState, Connector, Delivery,
};
use crate::error::GenerationError;
use crate::presenter::Presenter;
use crate::session::{Session, SessionSummary, Step};
use crate::submit::{HttpSubmitter, Submitter};
use crate::transport::WsConnector;

/// Facade the UI drives: one prompt in, one artifact or one error out.
pub struct SessionOrchestrator {
    config: GeneratorConfig,
    presenter: Arc<dyn Presenter>,
    submitter: Box<dyn Submitter>,
    clock: Arc<dyn Clock>,
    inner: Mutex<OrchestratorState>,
}

struct OrchestratorState {
    connection: ConnectionManager,
    last_session: Option<SessionSummary>,
}

impl SessionOrchestrator {
    pub fn new(
        config: GeneratorConfig,
        presenter: Arc<dyn Presenter>,
        connector: Box<dyn Connector>,
        submitter: Box<dyn Submitter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let connection = ConnectionManager::new(connector, &config);
        Self {
            config,
            presenter,
            submitter,
            clock,
            inner: Mutex::new(OrchestratorState {
                connection,
                last_session: None,
            }),
        }
    }

    /// Wires the tungstenite transport and HTTP submitter from `config`.
    pub fn connect_default(
        config: GeneratorConfig,
        presenter: Arc<dyn Presenter>,
    ) -> anyhow::Result<Self> {
        let submitter = HttpSubmitter::new(config.submit_url.clone(), config.submit_timeout)?;
        let connector = WsConnector::new(config.poll_interval);
        Ok(Self::new(
            config,
            presenter,
            Box::new(connector),
            Box::new(submitter),
            Arc::new(SystemClock),
        ))
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn last_session(&self) -> Option<SessionSummary> {
        self.inner
            .lock()
            .ok()
            .and_then(|state| state.last_session.clone())
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.inner.lock().ok().map(|state| state.connection.state())
    }

    pub fn generate(&self, prompt: &str) -> Result<Artifact, GenerationError> {
        let mut session = match Session::new(prompt, self.config.quiet_period) {
            Ok(session) => session,
            Err(err) => return Err(self.report(err)),
        };
        let mut state = match self.inner.try_lock() {
            Ok(state) => state,
            Err(TryLockError::WouldBlock) => {
                return Err(self.report(GenerationError::SessionInFlight))
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        self.presenter.begin_session(&session.id());
        self.presenter
            .set_status("Starting generation...", StatusClass::Loading);
        let outcome = {
            let mut connection = state.connection.scoped(self.presenter.as_ref());
            self.drive(&mut session, &mut connection)
        };
        state.last_session = Some(session.summary());

        let result = match outcome {
            Ok(artifact) => {
                self.deliver(&artifact);
                Ok(artifact)
            }
            Err(err) => Err(self.report(err)),
        };
        self.presenter.end_session();
        // The single-flight guard covers delivery and end_session too.
        drop(state);
        result
    }

    fn drive(
        &self,
        session: &mut Session,
        connection: &mut ConnectionManager,
    ) -> Result<Artifact, GenerationError> {
        let log = self.presenter.as_ref();
        let epoch = connection
            .ensure_open(self.clock.as_ref(), log)
            .map_err(|err| session.fail(err))?;
        session.bind(epoch, connection.reconnect_attempts());
        session.begin_request();

        log.debug_log(LogLevel::Info, "Sending generation request");
        match self.submitter.submit(session.prompt()) {
            Ok(Some(message)) => log.debug_log(
                LogLevel::Success,
                &format!("Generation started successfully: {message}"),
            ),
            Ok(None) => log.debug_log(LogLevel::Success, "Generation started successfully"),
            Err(err) => {
                let reason = error_chain_message(&err);
                return Err(session.fail(GenerationError::SubmissionFailed(reason)));
            }
        }

        self.await_artifact(session, connection)
    }

    fn await_artifact(
        &self,
        session: &mut Session,
        connection: &mut ConnectionManager,
    ) -> Result<Artifact, GenerationError> {
        let log = self.presenter.as_ref();
        let deadline = self.clock.now() + self.config.session_timeout;
        loop {
            let now = self.clock.now();
            if let Some(done) = finish(session.poll(now, log)) {
                return done;
            }
            if now >= deadline {
                return Err(session.time_out(self.config.session_timeout));
            }

            let step = match connection.read(log) {
                Ok(Delivery::Frame { epoch, frame }) => {
                    let event = decode_frame(frame);
                    if !session.accepts(epoch) {
                        log.debug_log(
                            LogLevel::Warning,
                            "Discarding frame that belongs to no active session",
                        );
                        continue;
                    }
                    session.handle(event, self.clock.now(), log)
                }
                Ok(Delivery::Idle) => Step::Continue,
                Ok(Delivery::Closed) => session.on_remote_close(log),
                Err(err) => Step::Failed(session.fail(err)),
            };
            if let Some(done) = finish(step) {
                return done;
            }
        }
    }

    fn deliver(&self, artifact: &Artifact) {
        let log = self.presenter.as_ref();
        match log.render_image(artifact) {
            Ok(()) => {
                log.debug_log(LogLevel::Success, "Image successfully loaded");
                log.set_status("Image received!", StatusClass::Success);
            }
            Err(err) => {
                log.debug_log(
                    LogLevel::Error,
                    &format!("Failed to load image data: {err:#}"),
                );
                match log.render_fallback(&artifact.to_data_url()) {
                    Ok(()) => log.set_status("Image received!", StatusClass::Success),
                    Err(fallback_err) => {
                        log.debug_log(
                            LogLevel::Error,
                            &format!("Fallback rendering failed: {fallback_err:#}"),
                        );
                        log.set_status("Error: image could not be displayed", StatusClass::Error);
                    }
                }
            }
        }
    }

    fn report(&self, err: GenerationError) -> GenerationError {
        let message = format!("Error: {err}");
        self.presenter.debug_log(LogLevel::Error, &message);
        self.presenter.set_status(&message, StatusClass::Error);
        err
    }
}

fn finish(step: Step) -> Option<Result<Artifact, GenerationError>> {
    match step {
        Step::Continue => None,
        Step::Completed(artifact) => Some(Ok(artifact)),
        Step::Failed(err) => Some(Err(err)),
    }
}
