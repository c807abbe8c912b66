// src/modules/builtin/filesystem.rs

use std::{
    any::Any,
    fs::{File, Metadata},
    path::{Component, Path, PathBuf},
};

use super::{ShellNotificationModule, clear_fs_cache};
use crate::modules::{Module, ModuleContext, ModuleError, SensorModule, WeakModuleContext};

/// Read-only view of the guest file system through a host-side mount.
///
/// Options: `file_system_path` (mount point), optionally
/// `clear_cache_command`. Guest paths are resolved below the mount point and
/// may not climb out of it.
pub struct FileSystemSensorModule {
    root: PathBuf,
    clear_cache_command: Option<String>,
    modules: WeakModuleContext,
}

impl FileSystemSensorModule {
    pub const NAME: &'static str = "FileSystemSensorModule";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), clear_cache_command: None, modules: WeakModuleContext::default() }
    }

    pub fn from_context(ctx: &ModuleContext) -> Result<Self, ModuleError> {
        let opts = ctx.options(Self::NAME);
        Ok(Self {
            root: opts.require("file_system_path")?.into(),
            clear_cache_command: opts.get("clear_cache_command").map(str::to_owned),
            modules: ctx.downgrade(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for an absolute guest path.
    pub fn resolve(&self, guest_path: &str) -> Result<PathBuf, ModuleError> {
        let mut resolved = self.root.clone();
        for component in Path::new(guest_path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(ModuleError::InvalidArgument(format!(
                        "guest path {guest_path:?} leaves the mount point"
                    )));
                }
            }
        }
        Ok(resolved)
    }

    /// Metadata of a guest file, after flushing the host's cache of it.
    pub fn metadata(&self, guest_path: &str) -> Result<Metadata, ModuleError> {
        let path = self.resolve(guest_path)?;
        self.refresh();
        Ok(std::fs::symlink_metadata(path)?)
    }

    pub fn file_exists(&self, guest_path: &str) -> bool {
        self.metadata(guest_path).is_ok()
    }

    pub fn open_file_ro(&self, guest_path: &str) -> Result<File, ModuleError> {
        let path = self.resolve(guest_path)?;
        self.refresh();
        Ok(File::open(path)?)
    }

    fn refresh(&self) {
        if !clear_fs_cache(self.clear_cache_command.as_deref()) {
            if let Some(notify) = self.modules.notification(ShellNotificationModule::NAME) {
                notify.debug(Self::NAME, "file-system cache flush failed");
            }
        }
    }
}

impl Module for FileSystemSensorModule {
    fn name(&self) -> &str {
        Self::NAME
    }
}

impl SensorModule for FileSystemSensorModule {
    fn initialize(&self) -> Result<(), ModuleError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(ModuleError::Failed(format!("{} is not a directory", self.root.display())))
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
