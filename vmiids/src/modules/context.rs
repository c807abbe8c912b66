// src/modules/context.rs

//! The only handle a module gets on the rest of the system.

use std::sync::{Arc, Weak};

use super::{ModuleError, NotificationModule, Registries, SensorModule};
use crate::{config::OptionTable, monitor::VmState};

/// Cheap to clone; every clone sees the same registries and monitor session.
#[derive(Clone)]
pub struct ModuleContext {
    registries: Arc<Registries>,
    // Modules of a batch still being constructed; looked up before the live ones.
    staged: Option<Arc<Registries>>,
    vm: Option<VmState>,
    options: Arc<OptionTable>,
}

impl ModuleContext {
    pub fn new(registries: Arc<Registries>, vm: Option<VmState>, options: Arc<OptionTable>) -> Self {
        Self { registries, staged: None, vm, options }
    }

    /// No monitor, no options, empty registries. Used by tools and tests
    /// that construct modules outside an orchestrator.
    pub fn detached() -> Self {
        Self::new(Arc::new(Registries::new()), None, Arc::new(OptionTable::new()))
    }

    /// Same context, with `staged` visible to lookups ahead of the live
    /// registries. Nothing is inserted into the live registries.
    pub(crate) fn staging(&self, staged: Arc<Registries>) -> Self {
        Self { staged: Some(staged), ..self.clone() }
    }

    /// The live registries. Staged modules are not in here.
    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    /// A handle a module may keep for its whole life. It does not keep the
    /// registries alive and never sees staged modules.
    pub fn downgrade(&self) -> WeakModuleContext {
        WeakModuleContext { registries: Arc::downgrade(&self.registries) }
    }

    pub fn sensor(&self, name: &str) -> Option<Arc<dyn SensorModule>> {
        self.staged
            .as_ref()
            .and_then(|staged| staged.sensors.lookup(name))
            .or_else(|| self.registries.sensors.lookup(name))
    }

    /// Resolve a sensor, downcast it to `T` and hand it to `f`.
    pub fn with_sensor<T: 'static, R>(&self, name: &str, f: impl FnOnce(&T) -> R) -> Result<R, ModuleError> {
        let sensor = self
            .sensor(name)
            .ok_or_else(|| ModuleError::Unavailable(name.to_owned()))?;
        let typed = sensor.as_any().downcast_ref::<T>().ok_or_else(|| {
            ModuleError::InvalidArgument(format!("sensor '{name}' is not a {}", std::any::type_name::<T>()))
        })?;
        Ok(f(typed))
    }

    pub fn notification(&self, name: &str) -> Option<Arc<dyn NotificationModule>> {
        self.staged
            .as_ref()
            .and_then(|staged| staged.notifications.lookup(name))
            .or_else(|| self.registries.notifications.lookup(name))
    }

    /// Monitor-backed guest state, if a monitor session is configured.
    pub fn vm(&self) -> Option<&VmState> {
        self.vm.as_ref()
    }

    pub fn options(&self, module: &str) -> ModuleOptions<'_> {
        ModuleOptions { module: module.to_owned(), table: &self.options }
    }

    /// Shorthand for `options(module).get(key)`.
    pub fn option(&self, module: &str, key: &str) -> Option<&str> {
        self.options
            .get(module)
            .and_then(|opts| opts.get(key))
            .map(String::as_str)
    }
}

/// Registry access for modules that outlive the call they were built in.
///
/// Every lookup goes to the live registry, so a dequeued module is gone for
/// its holders as well.
#[derive(Clone, Default)]
pub struct WeakModuleContext {
    registries: Weak<Registries>,
}

impl WeakModuleContext {
    pub fn notification(&self, name: &str) -> Option<Arc<dyn NotificationModule>> {
        self.registries.upgrade()?.notifications.lookup(name)
    }
}

/// Options of a single module, taken from `[modules.options.<name>]`.
pub struct ModuleOptions<'a> {
    module: String,
    table: &'a OptionTable,
}

impl<'a> ModuleOptions<'a> {
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.table
            .get(&self.module)
            .and_then(|opts| opts.get(key))
            .map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<String, ModuleError> {
        self.get(key)
            .map(str::to_owned)
            .ok_or_else(|| ModuleError::MissingOption {
                module: self.module.clone(),
                option: key.to_owned(),
            })
    }

    pub fn get_or(&self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn options_are_scoped_per_module() {
        let mut table = OptionTable::new();
        table.insert(
            "MemorySensorModule".into(),
            BTreeMap::from([("memtool_path".to_string(), "/opt/memtool".to_string())]),
        );
        let ctx = ModuleContext::new(Arc::new(Registries::new()), None, Arc::new(table));

        assert_eq!(ctx.option("MemorySensorModule", "memtool_path"), Some("/opt/memtool"));
        assert_eq!(ctx.option("Other", "memtool_path"), None);

        let err = ctx.options("MemorySensorModule").require("memdump_file").unwrap_err();
        assert!(matches!(err, ModuleError::MissingOption { ref option, .. } if option == "memdump_file"));
    }

    #[test]
    fn detached_context_has_nothing() {
        let ctx = ModuleContext::detached();
        assert!(ctx.vm().is_none());
        assert!(ctx.sensor("MemorySensorModule").is_none());
        assert!(matches!(
            ctx.with_sensor("MemorySensorModule", |_: &()| ()),
            Err(ModuleError::Unavailable(_))
        ));
    }

    #[test]
    fn sensors_are_handed_out_typed() {
        use crate::modules::builtin::{FileSystemSensorModule, MemorySensorModule};

        let ctx = ModuleContext::detached();
        ctx.registries()
            .sensors
            .insert(FileSystemSensorModule::NAME, Arc::new(FileSystemSensorModule::new("/srv/guest")));

        let root = ctx.with_sensor(FileSystemSensorModule::NAME, |fs: &FileSystemSensorModule| fs.root().to_owned());
        assert_eq!(root.unwrap(), std::path::PathBuf::from("/srv/guest"));

        let wrong = ctx.with_sensor(FileSystemSensorModule::NAME, |_: &MemorySensorModule| ());
        assert!(matches!(wrong, Err(ModuleError::InvalidArgument(_))));
    }

    #[test]
    fn staged_modules_are_visible_only_through_the_staging_context() {
        use crate::modules::{Severity, builtin::ShellNotificationModule};

        let ctx = ModuleContext::detached();
        let staged = Arc::new(Registries::new());
        staged
            .notifications
            .insert(ShellNotificationModule::NAME, Arc::new(ShellNotificationModule::new(Severity::Debug)));
        let staging = ctx.staging(staged);

        assert!(staging.notification(ShellNotificationModule::NAME).is_some());
        assert!(ctx.notification(ShellNotificationModule::NAME).is_none());
        assert!(staging.downgrade().notification(ShellNotificationModule::NAME).is_none());
    }
}
