// src/monitor/protocol.rs

//! Command/response cycle over a [`ConsoleTransport`].

use std::time::Duration;

use log::Level;
use parking_lot::Mutex;

use shared::constants::MONITOR_PROMPT;

use super::{ConsoleTransport, ProtocolError};
use crate::vmiids_log;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

struct Session {
    transport: Box<dyn ConsoleTransport>,
    /// Set once a reply boundary was missed; the reason is kept for later callers.
    dead: Option<String>,
}

/// One long-lived monitor session.
///
/// All commands go through a single lock, so command/response pairs from
/// different threads can never interleave on the wire.
pub struct MonitorProtocol {
    session: Mutex<Session>,
    prompt: String,
    timeout: Duration,
}

impl MonitorProtocol {
    pub fn new<T>(transport: T, prompt: impl Into<String>, timeout: Duration) -> Self
    where
        T: ConsoleTransport + 'static,
    {
        Self {
            session: Mutex::new(Session { transport: Box::new(transport), dead: None }),
            prompt: prompt.into(),
            timeout,
        }
    }

    /// QEMU's `(qemu)` prompt and a five second reply timeout.
    pub fn with_defaults<T: ConsoleTransport + 'static>(transport: T) -> Self {
        Self::new(transport, MONITOR_PROMPT, DEFAULT_TIMEOUT)
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn is_dead(&self) -> bool {
        self.session.lock().dead.is_some()
    }

    /// Consume the banner QEMU prints on connect, up to the first prompt.
    pub fn handshake(&self) -> Result<String, ProtocolError> {
        let mut session = self.session.lock();
        if let Some(reason) = &session.dead {
            return Err(ProtocolError::SessionDead(reason.clone()));
        }
        match session.transport.read_until(self.prompt.as_bytes(), self.timeout) {
            Ok(raw) => {
                let text = String::from_utf8_lossy(&raw);
                let banner = text.strip_suffix(self.prompt.as_str()).unwrap_or(&text).trim().to_owned();
                vmiids_log!(Level::Info, "monitor", "Monitor ready: {}", banner);
                Ok(banner)
            }
            Err(source) => {
                let err = ProtocolError::PromptNotFound { command: "<handshake>".into(), source };
                session.dead = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Send one command line and return the reply body.
    ///
    /// The body is everything between the echoed command and the next prompt,
    /// byte for byte. A missing prompt kills the session.
    pub fn send(&self, command: &str) -> Result<String, ProtocolError> {
        if command.contains(['\n', '\r']) {
            return Err(ProtocolError::InvalidCommand(command.into()));
        }

        let mut session = self.session.lock();
        if let Some(reason) = &session.dead {
            return Err(ProtocolError::SessionDead(reason.clone()));
        }

        log::debug!("monitor <- {command}");
        let line = format!("{command}\n");
        if let Err(source) = session.transport.write_all(line.as_bytes()) {
            let err = ProtocolError::WriteFailed { command: command.into(), source };
            return Err(kill(&mut session, err));
        }

        let raw = match session.transport.read_until(self.prompt.as_bytes(), self.timeout) {
            Ok(raw) => raw,
            Err(source) => {
                let err = ProtocolError::PromptNotFound { command: command.into(), source };
                return Err(kill(&mut session, err));
            }
        };
        drop(session);

        let text = String::from_utf8_lossy(&raw);
        let body = extract_body(&text, command, &self.prompt).to_owned();
        log::trace!("monitor -> {body:?}");
        Ok(body)
    }
}

fn kill(session: &mut Session, err: ProtocolError) -> ProtocolError {
    vmiids_log!(Level::Error, "monitor", "{}", err);
    metrics::counter!("vmiids_protocol_aborts_total").increment(1);
    session.dead = Some(err.to_string());
    err
}

/// Strip the trailing prompt and the echoed command line from a raw reply.
///
/// Leftovers of the previous prompt (the space after `(qemu)`, line breaks)
/// are skipped before looking for the echo. A reply without an echo is
/// returned as is.
pub fn extract_body<'a>(raw: &'a str, command: &str, prompt: &str) -> &'a str {
    let reply = raw.strip_suffix(prompt).unwrap_or(raw);
    let reply = reply.trim_start_matches([' ', '\r', '\n']);
    match reply.find('\n') {
        Some(eol) if reply[..eol].contains(command) => &reply[eol + 1..],
        None if reply.trim_end().ends_with(command) => "",
        _ => reply,
    }
}
