// src/modules/builtin/memory.rs

use std::{
    any::Any,
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::Level;

use super::{
    ShellNotificationModule, clear_fs_cache,
    memtool::{GuestProcess, extract_script_output, parse_process_list},
};
use crate::{
    modules::{Module, ModuleContext, ModuleError, SensorModule, WeakModuleContext},
    vmiids_log,
};

/// Guest memory introspection through an external memory-forensics tool.
///
/// Options (`[modules.options.MemorySensorModule]`):
/// `memtool_path`, `memtool_script_path`, `saved_debugging_symbols`,
/// `memdump_file`, and optionally `clear_cache_command`.
pub struct MemorySensorModule {
    memtool_path: PathBuf,
    script_path: PathBuf,
    symbols: PathBuf,
    memdump: PathBuf,
    clear_cache_command: Option<String>,
    modules: WeakModuleContext,
}

impl MemorySensorModule {
    pub const NAME: &'static str = "MemorySensorModule";

    pub fn from_context(ctx: &ModuleContext) -> Result<Self, ModuleError> {
        let opts = ctx.options(Self::NAME);
        Ok(Self {
            memtool_path: opts.require("memtool_path")?.into(),
            script_path: opts.require("memtool_script_path")?.into(),
            symbols: opts.require("saved_debugging_symbols")?.into(),
            memdump: opts.require("memdump_file")?.into(),
            clear_cache_command: opts.get("clear_cache_command").map(str::to_owned),
            modules: ctx.downgrade(),
        })
    }

    /// Run one tool script against the memory dump and return the text the
    /// script printed.
    pub fn run_script(&self, script: &str) -> Result<String, ModuleError> {
        let mut child = Command::new(&self.memtool_path)
            .arg("-l")
            .arg(&self.symbols)
            .arg("-m")
            .arg(&self.memdump)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            writeln!(stdin, "sc {}", self.script_path.join(script).display())?;
        }
        let output = child.wait_with_output()?;

        let mut raw = String::from_utf8_lossy(&output.stdout).into_owned();
        raw.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            vmiids_log!(Level::Warn, "memory", "{} exited with {}", self.memtool_path.display(), output.status);
        }
        Ok(extract_script_output(&raw).to_owned())
    }

    /// Processes the guest kernel's task list currently holds, keyed by pid.
    pub fn process_list(&self) -> Result<BTreeMap<u32, GuestProcess>, ModuleError> {
        if !clear_fs_cache(self.clear_cache_command.as_deref()) {
            self.debug("file-system cache flush failed");
        }
        let output = self.run_script("tasklist.js")?;
        let processes = parse_process_list(&output);
        self.debug(&format!("task list holds {} processes", processes.len()));
        Ok(processes)
    }

    fn debug(&self, message: &str) {
        if let Some(notify) = self.modules.notification(ShellNotificationModule::NAME) {
            notify.debug(Self::NAME, message);
        }
    }
}

impl Module for MemorySensorModule {
    fn name(&self) -> &str {
        Self::NAME
    }
}

impl SensorModule for MemorySensorModule {
    fn initialize(&self) -> Result<(), ModuleError> {
        for path in [&self.memtool_path, &self.memdump] {
            require_file(path)?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn require_file(path: &Path) -> Result<(), ModuleError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ModuleError::Failed(format!("{} is not a file", path.display())))
    }
}
