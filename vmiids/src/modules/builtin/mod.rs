// src/modules/builtin/mod.rs

//! Modules compiled into the daemon.
//!
//! They are catalogued at construction of the orchestrator through the same
//! descriptor path a module library uses; `[modules] builtin` decides which
//! of them are activated at start.

pub mod filesystem;
pub mod memory;
pub mod memtool;
pub mod shell;
pub mod vm_status;

pub use filesystem::FileSystemSensorModule;
pub use memory::MemorySensorModule;
pub use memtool::GuestProcess;
pub use shell::ShellNotificationModule;
pub use vm_status::VmStatusDetectionModule;

use super::ModuleDescriptor;

pub fn descriptors() -> Vec<ModuleDescriptor> {
    vec![
        ModuleDescriptor::notification(ShellNotificationModule::NAME, ShellNotificationModule::from_context),
        ModuleDescriptor::sensor(MemorySensorModule::NAME, MemorySensorModule::from_context),
        ModuleDescriptor::sensor(FileSystemSensorModule::NAME, FileSystemSensorModule::from_context),
        ModuleDescriptor::detection(VmStatusDetectionModule::NAME, |_| Ok(VmStatusDetectionModule)),
    ]
}

/// `sync`, then the configured cache-drop command through `sh -c`.
/// Failures are reported but never fatal.
pub(crate) fn clear_fs_cache(command: Option<&str>) -> bool {
    use std::process::Command;

    let mut ok = Command::new("sync").status().map(|s| s.success()).unwrap_or(false);
    if let Some(command) = command {
        ok &= Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
    }
    ok
}
