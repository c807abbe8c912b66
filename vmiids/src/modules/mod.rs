//! Module capability interfaces and the plumbing that hosts them.
//!
//! A module is one pluggable unit of behaviour of a given [`ModuleKind`]:
//! sensors observe the guest, detection modules evaluate what sensors see,
//! notification modules tell an operator about it. Modules only ever talk to
//! the rest of the system through a [`ModuleContext`].

pub mod builtin;
pub mod context;
pub mod loader;
pub mod plugin;
pub mod registry;

use std::{any::Any, fmt, str::FromStr, sync::Arc};

use thiserror::Error;

use crate::monitor::ProtocolError;

pub use context::{ModuleContext, ModuleOptions, WeakModuleContext};
pub use loader::{LoadError, ModuleLoader, Origin};
pub use plugin::{ModuleDescriptor, ModuleFactory, PluginDeclaration};
pub use registry::{ModuleRegistry, Registries};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModuleKind {
    Notification,
    Sensor,
    Detection,
}

impl ModuleKind {
    /// Construction order: sinks first, then what observes, then what evaluates.
    pub const ALL: [ModuleKind; 3] = [ModuleKind::Notification, ModuleKind::Sensor, ModuleKind::Detection];

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::Notification => "notification",
            ModuleKind::Sensor => "sensor",
            ModuleKind::Detection => "detection",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised by a module's own code.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module {module}: missing option '{option}'")]
    MissingOption { module: String, option: String },

    #[error("required module '{0}' is not active")]
    Unavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("module panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

/// Common identity of every module.
pub trait Module: Send + Sync {
    /// Unique within the module's own kind.
    fn name(&self) -> &str;
}

/// Observes guest state. Kind-specific queries live on the concrete type and
/// are reached through [`SensorModule::as_any`].
pub trait SensorModule: Module {
    /// Called once before the sensor becomes active.
    fn initialize(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
}

/// Evaluates sensor data; driven by the collection loop or run on demand.
pub trait DetectionModule: Module {
    /// One execution. The returned text is what an ad hoc run reports back.
    fn run(&self, ctx: &ModuleContext) -> Result<String, ModuleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Alert,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Alert => "ALERT",
        }
    }
}

impl FromStr for Severity {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "alert" => Ok(Severity::Alert),
            other => Err(ModuleError::InvalidArgument(format!("unknown severity '{other}'"))),
        }
    }
}

/// Operator-facing output.
pub trait NotificationModule: Module {
    fn notify(&self, severity: Severity, source: &str, message: &str);

    fn debug(&self, source: &str, message: &str) {
        self.notify(Severity::Debug, source, message);
    }

    fn info(&self, source: &str, message: &str) {
        self.notify(Severity::Info, source, message);
    }

    fn warn(&self, source: &str, message: &str) {
        self.notify(Severity::Warn, source, message);
    }

    fn alert(&self, source: &str, message: &str) {
        self.notify(Severity::Alert, source, message);
    }
}

/// A constructed module of any kind.
#[derive(Clone)]
pub enum ModuleInstance {
    Sensor(Arc<dyn SensorModule>),
    Detection(Arc<dyn DetectionModule>),
    Notification(Arc<dyn NotificationModule>),
}

impl ModuleInstance {
    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleInstance::Sensor(_) => ModuleKind::Sensor,
            ModuleInstance::Detection(_) => ModuleKind::Detection,
            ModuleInstance::Notification(_) => ModuleKind::Notification,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ModuleInstance::Sensor(m) => m.name(),
            ModuleInstance::Detection(m) => m.name(),
            ModuleInstance::Notification(m) => m.name(),
        }
    }
}
