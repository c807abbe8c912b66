// src/monitor/vm_state.rs

//! Guest run-state derived from `info status`.
//!
//! Nothing is cached: the hypervisor is the only source of truth, so every
//! query goes back to the console.

use std::{fmt, sync::Arc};

use log::Level;

use super::{MonitorProtocol, ProtocolError};
use crate::vmiids_log;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Running => "running",
            RunState::Paused => "paused",
        })
    }
}

/// Classify an `info status` reply; `running` wins over `paused`.
pub fn parse_run_state(body: &str) -> Option<RunState> {
    if body.contains("running") {
        Some(RunState::Running)
    } else if body.contains("paused") {
        Some(RunState::Paused)
    } else {
        None
    }
}

/// Run-state view over a shared monitor session.
#[derive(Clone)]
pub struct VmState {
    monitor: Arc<MonitorProtocol>,
}

impl VmState {
    pub fn new(monitor: Arc<MonitorProtocol>) -> Self {
        Self { monitor }
    }

    pub fn monitor(&self) -> &Arc<MonitorProtocol> {
        &self.monitor
    }

    /// Query the current state. Anything that is neither running nor paused
    /// is an abort; the state is never guessed.
    pub fn run_state(&self) -> Result<RunState, ProtocolError> {
        let body = self.monitor.info_status()?;
        parse_run_state(&body).ok_or_else(|| ProtocolError::Unparseable {
            command: "info status".into(),
            response: body,
        })
    }

    pub fn is_running(&self) -> Result<bool, ProtocolError> {
        Ok(self.run_state()? == RunState::Running)
    }

    /// Issue `stop`. The monitor prints nothing on success, so callers that
    /// need confirmation must follow up with [`VmState::is_running`].
    pub fn pause(&self) -> Result<(), ProtocolError> {
        vmiids_log!(Level::Debug, "vm", "pause requested");
        self.monitor.cmd_stop().map(|_| ())
    }

    /// Issue `cont`; same caveat as [`VmState::pause`].
    pub fn resume(&self) -> Result<(), ProtocolError> {
        vmiids_log!(Level::Debug, "vm", "resume requested");
        self.monitor.cmd_cont().map(|_| ())
    }
}
