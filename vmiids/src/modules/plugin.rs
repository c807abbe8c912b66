// src/modules/plugin.rs

//! What a module library exports, and how built-ins describe themselves.
//!
//! A library is a `cdylib` linked against this crate that places a
//! [`PluginDeclaration`] under [`DECLARATION_SYMBOL`] via [`declare_plugin!`].
//! Trait objects cross the boundary, so the library must be built by the
//! same compiler against the same crate version; both are checked at load.

use std::{fmt, sync::Arc};

use super::{
    DetectionModule, ModuleContext, ModuleError, ModuleInstance, ModuleKind, NotificationModule,
    SensorModule,
};

/// Bumped whenever [`PluginDeclaration`] or [`ModuleDescriptor`] change layout.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// `rustc --version` of the compiler that built this crate.
pub const RUSTC_VERSION: &str = env!("VMIIDS_RUSTC_VERSION");

pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DECLARATION_SYMBOL: &[u8] = b"vmiids_plugin_declaration\0";

pub type SensorFactory = Arc<dyn Fn(&ModuleContext) -> Result<Arc<dyn SensorModule>, ModuleError> + Send + Sync>;
pub type DetectionFactory =
    Arc<dyn Fn(&ModuleContext) -> Result<Arc<dyn DetectionModule>, ModuleError> + Send + Sync>;
pub type NotificationFactory =
    Arc<dyn Fn(&ModuleContext) -> Result<Arc<dyn NotificationModule>, ModuleError> + Send + Sync>;

/// Constructs a module of one kind.
#[derive(Clone)]
pub enum ModuleFactory {
    Sensor(SensorFactory),
    Detection(DetectionFactory),
    Notification(NotificationFactory),
}

impl ModuleFactory {
    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleFactory::Sensor(_) => ModuleKind::Sensor,
            ModuleFactory::Detection(_) => ModuleKind::Detection,
            ModuleFactory::Notification(_) => ModuleKind::Notification,
        }
    }

    pub fn build(&self, ctx: &ModuleContext) -> Result<ModuleInstance, ModuleError> {
        Ok(match self {
            ModuleFactory::Sensor(f) => ModuleInstance::Sensor(f(ctx)?),
            ModuleFactory::Detection(f) => ModuleInstance::Detection(f(ctx)?),
            ModuleFactory::Notification(f) => ModuleInstance::Notification(f(ctx)?),
        })
    }
}

/// One module a library (or the built-in set) can provide.
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub factory: ModuleFactory,
}

impl ModuleDescriptor {
    pub fn kind(&self) -> ModuleKind {
        self.factory.kind()
    }

    pub fn sensor<T, F>(name: impl Into<String>, factory: F) -> Self
    where
        T: SensorModule + 'static,
        F: Fn(&ModuleContext) -> Result<T, ModuleError> + Send + Sync + 'static,
    {
        let build: SensorFactory = Arc::new(move |ctx: &ModuleContext| -> Result<Arc<dyn SensorModule>, ModuleError> {
            Ok(Arc::new(factory(ctx)?))
        });
        Self { name: name.into(), factory: ModuleFactory::Sensor(build) }
    }

    pub fn detection<T, F>(name: impl Into<String>, factory: F) -> Self
    where
        T: DetectionModule + 'static,
        F: Fn(&ModuleContext) -> Result<T, ModuleError> + Send + Sync + 'static,
    {
        let build: DetectionFactory = Arc::new(move |ctx: &ModuleContext| -> Result<Arc<dyn DetectionModule>, ModuleError> {
            Ok(Arc::new(factory(ctx)?))
        });
        Self { name: name.into(), factory: ModuleFactory::Detection(build) }
    }

    pub fn notification<T, F>(name: impl Into<String>, factory: F) -> Self
    where
        T: NotificationModule + 'static,
        F: Fn(&ModuleContext) -> Result<T, ModuleError> + Send + Sync + 'static,
    {
        let build: NotificationFactory = Arc::new(move |ctx: &ModuleContext| -> Result<Arc<dyn NotificationModule>, ModuleError> {
            Ok(Arc::new(factory(ctx)?))
        });
        Self { name: name.into(), factory: ModuleFactory::Notification(build) }
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("kind", &self.kind())
            .field("name", &self.name)
            .finish()
    }
}

/// The static a module library exports.
pub struct PluginDeclaration {
    pub abi_version: u32,
    pub rustc_version: &'static str,
    pub core_version: &'static str,
    pub descriptors: fn() -> Vec<ModuleDescriptor>,
}

/// Export a [`PluginDeclaration`] from a `cdylib`.
///
/// ```ignore
/// fn descriptors() -> Vec<ModuleDescriptor> {
///     vec![ModuleDescriptor::detection("MyDetection", |_| Ok(MyDetection))]
/// }
/// vmiids::declare_plugin!(descriptors);
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($descriptors:path) => {
        #[unsafe(no_mangle)]
        #[allow(non_upper_case_globals)]
        pub static vmiids_plugin_declaration: $crate::modules::PluginDeclaration =
            $crate::modules::PluginDeclaration {
                abi_version: $crate::modules::plugin::PLUGIN_ABI_VERSION,
                rustc_version: $crate::modules::plugin::RUSTC_VERSION,
                core_version: $crate::modules::plugin::CORE_VERSION,
                descriptors: $descriptors,
            };
    };
}
