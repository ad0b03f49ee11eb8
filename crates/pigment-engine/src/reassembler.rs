use std::time::{Duration, Instant};

use pigment_contracts::presentation::Artifact;
use pigment_contracts::protocol::FRAME_HEADER_LEN;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AssembleError {
    #[error("No image data to display")]
    NoData,
}

/// Ordered header-stripped fragments of the in-flight image.
#[derive(Debug, Default)]
pub struct ChunkReassembler {
    fragments: Vec<Vec<u8>>,
    total_len: usize,
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strips the framing header from `frame` and buffers the remainder.
    /// Returns the payload length; frames with no payload are not buffered.
    pub fn append(&mut self, frame: &[u8]) -> usize {
        let Some(payload) = frame.get(FRAME_HEADER_LEN..) else {
            return 0;
        };
        if payload.is_empty() {
            return 0;
        }
        self.total_len += payload.len();
        self.fragments.push(payload.to_vec());
        payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Concatenates fragments in arrival order and clears the buffer.
    pub fn assemble(&mut self) -> Result<Artifact, AssembleError> {
        if self.fragments.is_empty() {
            return Err(AssembleError::NoData);
        }
        let mut combined = Vec::with_capacity(self.total_len);
        for fragment in self.fragments.drain(..) {
            combined.extend_from_slice(&fragment);
        }
        self.total_len = 0;
        Ok(Artifact::new(combined))
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
        self.total_len = 0;
    }
}

/// Re-armable quiet-period deadline.
#[derive(Debug, Clone, Copy)]
pub struct QuietTimer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl QuietTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fires at most once per arming.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
