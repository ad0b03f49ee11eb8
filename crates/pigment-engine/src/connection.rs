use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use pigment_contracts::presentation::{LogLevel, StatusClass};
use pigment_contracts::protocol::Frame;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::GeneratorConfig;
use crate::error::GenerationError;
use crate::presenter::Presenter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
}

/// Result of one bounded read on an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    Frame(Frame),
    /// Nothing arrived within the poll interval.
    Idle,
    /// The remote side closed the channel.
    Closed,
}

pub trait FrameChannel: Send {
    fn read_frame(&mut self) -> anyhow::Result<FrameRead>;

    fn close(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("handshake deadline elapsed")]
    Timeout,
    #[error("{0}")]
    Failed(String),
}

pub trait Connector: Send + Sync {
    /// Opens a channel whose handshake completes before `deadline`. On
    /// `Timeout` the implementation has already torn down the half-open socket.
    fn connect(&self, endpoint: &str, deadline: Instant)
        -> Result<Box<dyn FrameChannel>, ConnectError>;
}

/// A frame together with the connection epoch it was read on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Frame { epoch: u64, frame: Frame },
    Idle,
    Closed,
}

/// Owns the single streaming connection and its bounded reconnect counter.
pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    endpoint: String,
    handshake_timeout: Duration,
    max_reconnect_attempts: u32,
    state: ConnectionState,
    channel: Option<Box<dyn FrameChannel>>,
    reconnect_attempts: u32,
    epoch: u64,
    handshake_deadline: Option<Instant>,
}

impl ConnectionManager {
    pub fn new(connector: Box<dyn Connector>, config: &GeneratorConfig) -> Self {
        Self {
            connector,
            endpoint: config.endpoint.clone(),
            handshake_timeout: config.handshake_timeout,
            max_reconnect_attempts: config.max_reconnect_attempts,
            state: ConnectionState::Closed,
            channel: None,
            reconnect_attempts: 0,
            epoch: 0,
            handshake_deadline: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn handshake_deadline(&self) -> Option<Instant> {
        self.handshake_deadline
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open && self.channel.is_some()
    }

    /// Returns the epoch of the open connection, connecting first if needed.
    pub fn ensure_open(
        &mut self,
        clock: &dyn Clock,
        log: &dyn Presenter,
    ) -> Result<u64, GenerationError> {
        if self.is_open() {
            return Ok(self.epoch);
        }
        if self.reconnect_attempts >= self.max_reconnect_attempts {
            log.debug_log(
                LogLevel::Error,
                "Max reconnection attempts reached; not connecting",
            );
            return Err(GenerationError::ReconnectLimitExceeded {
                max: self.max_reconnect_attempts,
            });
        }
        if let Some(mut stale) = self.channel.take() {
            stale.close();
            log.debug_log(LogLevel::Info, "Closed stale WebSocket before reconnecting");
        }

        self.reconnect_attempts += 1;
        self.state = ConnectionState::Connecting;
        let deadline = clock.now() + self.handshake_timeout;
        self.handshake_deadline = Some(deadline);
        log.debug_log(
            LogLevel::Info,
            &format!("Connecting to WebSocket: {}", self.endpoint),
        );

        let opened = self.connector.connect(&self.endpoint, deadline);
        self.handshake_deadline = None;
        match opened {
            Ok(mut channel) => {
                if clock.now() > deadline {
                    channel.close();
                    self.state = ConnectionState::Closed;
                    log.debug_log(LogLevel::Error, "WebSocket error: connection timeout");
                    return Err(GenerationError::HandshakeTimeout {
                        timeout: self.handshake_timeout,
                    });
                }
                self.channel = Some(channel);
                self.state = ConnectionState::Open;
                self.reconnect_attempts = 0;
                self.epoch += 1;
                log.debug_log(LogLevel::Success, "WebSocket connected");
                log.set_status("Connected to server", StatusClass::Success);
                Ok(self.epoch)
            }
            Err(ConnectError::Timeout) => {
                self.state = ConnectionState::Closed;
                log.debug_log(LogLevel::Error, "WebSocket error: connection timeout");
                Err(GenerationError::HandshakeTimeout {
                    timeout: self.handshake_timeout,
                })
            }
            Err(ConnectError::Failed(reason)) => {
                self.state = ConnectionState::Closed;
                log.debug_log(LogLevel::Error, &format!("WebSocket error: {reason}"));
                Err(GenerationError::ConnectionFailed(reason))
            }
        }
    }

    /// Idempotent.
    pub fn close(&mut self, log: &dyn Presenter) {
        let had_channel = match self.channel.take() {
            Some(mut channel) => {
                channel.close();
                true
            }
            None => false,
        };
        if had_channel || self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            log.debug_log(LogLevel::Info, "WebSocket closed");
        }
    }

    /// Closes the connection when the returned scope is dropped.
    pub fn scoped<'a>(&'a mut self, log: &'a dyn Presenter) -> ConnectionScope<'a> {
        ConnectionScope { manager: self, log }
    }

    pub fn read(&mut self, log: &dyn Presenter) -> Result<Delivery, GenerationError> {
        let Some(channel) = self.channel.as_mut() else {
            return Ok(Delivery::Closed);
        };
        match channel.read_frame() {
            Ok(FrameRead::Frame(frame)) => Ok(Delivery::Frame {
                epoch: self.epoch,
                frame,
            }),
            Ok(FrameRead::Idle) => Ok(Delivery::Idle),
            Ok(FrameRead::Closed) => {
                self.channel = None;
                self.state = ConnectionState::Closed;
                log.debug_log(LogLevel::Info, "WebSocket closed");
                Ok(Delivery::Closed)
            }
            Err(err) => {
                let reason = error_chain_message(&err);
                log.debug_log(LogLevel::Error, &format!("WebSocket error: {reason}"));
                self.close(log);
                Err(GenerationError::ConnectionFailed(reason))
            }
        }
    }
}

pub struct ConnectionScope<'a> {
    manager: &'a mut ConnectionManager,
    log: &'a dyn Presenter,
}

impl Deref for ConnectionScope<'_> {
    type Target = ConnectionManager;

    fn deref(&self) -> &Self::Target {
        self.manager
    }
}

impl DerefMut for ConnectionScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.manager
    }
}

impl Drop for ConnectionScope<'_> {
    fn drop(&mut self) {
        self.manager.close(self.log);
    }
}

pub(crate) fn error_chain_message(err: &anyhow::Error) -> String {
    err.chain()
        .map(|entry| entry.to_string())
        .filter(|entry| !entry.trim().is_empty())
        .collect::<Vec<String>>()
        .join(": ")
}
