//! QEMU human-monitor driver.
//!
//! The monitor is a line-oriented console without request ids: a command is
//! written, and everything up to the next prompt is its reply. This module
//! turns that byte stream into a command/response protocol.
//!
//! Key responsibilities:
//! - Open the console endpoint and bound every read by a timeout (`transport`).
//! - Serialize command/response cycles and strip echo and prompt (`protocol`).
//! - Offer the fixed monitor commands as named wrappers (`commands`).
//! - Derive the guest run-state from `info status` (`vm_state`).

pub mod commands;
pub mod protocol;
pub mod transport;
pub mod vm_state;

use thiserror::Error;

pub use protocol::MonitorProtocol;
pub use transport::{ConsoleTransport, StreamConsole, TransportError};
pub use vm_state::{RunState, VmState};

/// The monitor could not produce a well-formed reply.
///
/// Every variant except `InvalidCommand` leaves the session dead: the
/// protocol has no way to resynchronise once a reply boundary was missed.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("monitor abort: no prompt after `{command}`: {source}")]
    PromptNotFound {
        command: String,
        #[source]
        source: TransportError,
    },

    #[error("monitor abort: cannot write `{command}`: {source}")]
    WriteFailed {
        command: String,
        #[source]
        source: TransportError,
    },

    #[error("monitor abort: unparseable reply to `{command}`: {response:?}")]
    Unparseable { command: String, response: String },

    #[error("monitor abort: session is dead ({0})")]
    SessionDead(String),

    #[error("monitor commands must be a single line: {0:?}")]
    InvalidCommand(String),
}

impl ProtocolError {
    /// Whether the session must be treated as unusable after this error.
    pub fn is_abort(&self) -> bool {
        !matches!(self, ProtocolError::InvalidCommand(_))
    }
}
