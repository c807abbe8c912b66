//! Control-plane messages exchanged between the daemon and `vmiids-ctl`.
//!
//! Every administrative reply carries a `success` flag, a human-readable
//! `message` and a [`Fault`] code, so callers can tell an unknown module from
//! a loader failure without parsing text. Transport failures never show up
//! here; they are reported by the client stub as [`crate::ClientError`].

include!(concat!(env!("OUT_DIR"), "/vmiids.control.Control.rs"));

/// Why an administrative call failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Fault {
    Unspecified = 0,
    /// No module of that name is known to the daemon.
    UnknownModule = 1,
    /// Insert of an active name, or removal of an inactive one.
    RegistryConflict = 2,
    LoadFailed = 3,
    /// The monitor console stopped producing well-formed replies.
    ProtocolAbort = 4,
    /// The module itself returned an error or panicked.
    ModuleFault = 5,
    /// The daemon was not in a state that allows the call.
    InvalidState = 6,
    MonitorUnavailable = 7,
}

impl Fault {
    pub fn as_str(self) -> &'static str {
        match self {
            Fault::Unspecified => "unspecified",
            Fault::UnknownModule => "unknown-module",
            Fault::RegistryConflict => "registry-conflict",
            Fault::LoadFailed => "load-failed",
            Fault::ProtocolAbort => "protocol-abort",
            Fault::ModuleFault => "module-fault",
            Fault::InvalidState => "invalid-state",
            Fault::MonitorUnavailable => "monitor-unavailable",
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names a module in one of the registries.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModuleRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoadRequest {
    #[prost(string, tag = "1")]
    pub path: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StopRequest {
    /// Signal number recorded in the daemon log; 0 for an administrative stop.
    #[prost(int32, tag = "1")]
    pub signal: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListModulesRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VmStatusRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusReply {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(enumeration = "Fault", tag = "3")]
    pub fault: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RunReply {
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// Text produced by the detection module.
    #[prost(string, tag = "2")]
    pub output: String,
    #[prost(enumeration = "Fault", tag = "3")]
    pub fault: i32,
    #[prost(string, tag = "4")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VmStatusReply {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(bool, tag = "2")]
    pub running: bool,
    #[prost(string, tag = "3")]
    pub message: String,
    #[prost(enumeration = "Fault", tag = "4")]
    pub fault: i32,
}

/// One module known to the daemon, active or not.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModuleEntry {
    /// `sensor`, `detection` or `notification`.
    #[prost(string, tag = "1")]
    pub kind: String,
    #[prost(string, tag = "2")]
    pub name: String,
    /// `builtin` or the path of the shared object that provided it.
    #[prost(string, tag = "3")]
    pub origin: String,
    #[prost(bool, tag = "4")]
    pub active: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LibraryEntry {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(string, tag = "2")]
    pub sha256: String,
    #[prost(string, repeated, tag = "3")]
    pub modules: Vec<String>,
    #[prost(message, optional, tag = "4")]
    pub loaded_at: Option<::prost_types::Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModuleListing {
    #[prost(message, repeated, tag = "1")]
    pub modules: Vec<ModuleEntry>,
    #[prost(message, repeated, tag = "2")]
    pub libraries: Vec<LibraryEntry>,
    /// Whether the collection loop is currently scheduled.
    #[prost(bool, tag = "3")]
    pub collecting: bool,
}

impl StatusReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), fault: Fault::Unspecified as i32 }
    }

    pub fn failed(fault: Fault, message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), fault: fault as i32 }
    }
}
