// src/modules/builtin/shell.rs

use std::io::Write;

use log::Level;

use crate::{
    modules::{Module, ModuleContext, ModuleError, NotificationModule, Severity},
    vmiids_log,
};

/// Writes notifications to stdout and mirrors them into the log.
///
/// Option `min_severity` (`debug`, `info`, `warn`, `alert`; default `debug`)
/// drops anything below it.
pub struct ShellNotificationModule {
    min_severity: Severity,
}

impl ShellNotificationModule {
    pub const NAME: &'static str = "ShellNotificationModule";

    pub fn new(min_severity: Severity) -> Self {
        Self { min_severity }
    }

    pub fn from_context(ctx: &ModuleContext) -> Result<Self, ModuleError> {
        let min_severity = match ctx.option(Self::NAME, "min_severity") {
            Some(s) => s.parse()?,
            None => Severity::Debug,
        };
        Ok(Self::new(min_severity))
    }

    pub fn format_line(severity: Severity, source: &str, message: &str) -> String {
        format!(
            "[{}][{}][{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            severity.as_str(),
            source,
            message.trim_end()
        )
    }
}

impl Module for ShellNotificationModule {
    fn name(&self) -> &str {
        Self::NAME
    }
}

impl NotificationModule for ShellNotificationModule {
    fn notify(&self, severity: Severity, source: &str, message: &str) {
        if severity < self.min_severity {
            return;
        }
        let level = match severity {
            Severity::Debug => Level::Debug,
            Severity::Info => Level::Info,
            Severity::Warn => Level::Warn,
            Severity::Alert => Level::Error,
        };
        vmiids_log!(level, "notify", "{}: {}", source, message.trim_end());

        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", Self::format_line(severity, source, message));
    }
}
