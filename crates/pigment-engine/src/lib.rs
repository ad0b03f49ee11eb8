//! Client-side streaming session engine: connection lifecycle, frame
//! interpretation, chunk reassembly and artifact delivery for one prompt at a
//! time.

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod orchestrator;
pub mod presenter;
pub mod reassembler;
pub mod session;
pub mod submit;
pub mod transport;

#[cfg(test)]
mod testing;

pub use clock::{Clock, SystemClock};
pub use config::GeneratorConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use error::GenerationError;
pub use orchestrator::SessionOrchestrator;
pub use presenter::Presenter;
pub use session::{SessionStatus, SessionSummary};
