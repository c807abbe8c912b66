// src/modules/builtin/vm_status.rs

use super::ShellNotificationModule;
use crate::modules::{DetectionModule, Module, ModuleContext, ModuleError};

/// Reports whether the guest is running.
pub struct VmStatusDetectionModule;

impl VmStatusDetectionModule {
    pub const NAME: &'static str = "VmStatusDetectionModule";
}

impl Module for VmStatusDetectionModule {
    fn name(&self) -> &str {
        Self::NAME
    }
}

impl DetectionModule for VmStatusDetectionModule {
    fn run(&self, ctx: &ModuleContext) -> Result<String, ModuleError> {
        let vm = ctx.vm().ok_or_else(|| ModuleError::Unavailable("monitor".into()))?;
        let state = vm.run_state()?;
        let report = format!("guest is {state}");
        if let Some(notify) = ctx.notification(ShellNotificationModule::NAME) {
            notify.debug(Self::NAME, &report);
        }
        Ok(report)
    }
}
