// src/lib.rs
// ────────────────────────────────────────────────────────────────────────────
// Public library entry point. Re-exports everything for `main.rs`, the
// integration tests and module libraries built against this crate.

pub mod macros;
pub mod config;
pub mod control;
pub mod logging;
pub mod modules;
pub mod monitor;
pub mod orchestrator;
pub mod telemetry;

pub use modules::{
    DetectionModule, Module, ModuleContext, ModuleDescriptor, ModuleError, ModuleKind, NotificationModule,
    SensorModule, Severity,
};
pub use orchestrator::{Orchestrator, OrchestratorError, OrchestratorSettings};
