// src/modules/loader.rs

//! Module catalog and dynamic library loading.
//!
//! Key responsibilities:
//! - Keep the catalog of every module the process knows, active or not.
//! - Open module libraries, verify their declaration, and register what
//!   they describe all-or-nothing.
//! - Keep loaded libraries mapped for the rest of the process lifetime.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use libloading::{Library, Symbol};
use log::Level;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::{
    ModuleContext, ModuleDescriptor, ModuleError, ModuleInstance, ModuleKind, PluginDeclaration, Registries,
    plugin::{CORE_VERSION, DECLARATION_SYMBOL, PLUGIN_ABI_VERSION, RUSTC_VERSION},
};
use crate::vmiids_log;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open library {path}: {source}")]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("{path} does not export a module declaration: {source}")]
    MissingSymbol {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("{path}: plugin ABI {found}, expected {expected}")]
    AbiMismatch { path: PathBuf, found: u32, expected: u32 },

    #[error("{path}: built by `{found}` against vmiids {found_core}, host is `{expected}` / {expected_core}")]
    CompilerMismatch {
        path: PathBuf,
        found: String,
        found_core: String,
        expected: String,
        expected_core: String,
    },

    #[error("{kind} module '{name}' is already known")]
    NameCollision { kind: ModuleKind, name: String },

    #[error("cannot construct module '{name}': {source}")]
    Factory {
        name: String,
        #[source]
        source: ModuleError,
    },

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where a catalogued module came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Builtin,
    Library(PathBuf),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Builtin => f.write_str("builtin"),
            Origin::Library(path) => write!(f, "{}", path.display()),
        }
    }
}

struct CatalogEntry {
    descriptor: ModuleDescriptor,
    origin: Origin,
}

/// Public view of one catalog entry.
#[derive(Debug, Clone)]
pub struct CatalogItem {
    pub kind: ModuleKind,
    pub name: String,
    pub origin: Origin,
}

/// Public view of one loaded library.
#[derive(Debug, Clone)]
pub struct LibraryInfo {
    pub path: PathBuf,
    pub sha256: String,
    pub modules: Vec<String>,
    pub loaded_at: DateTime<Utc>,
}

struct LoadedLibrary {
    info: LibraryInfo,
    // Never unmapped: module vtables and factories point into it.
    _library: &'static Library,
}

#[derive(Default)]
pub struct ModuleLoader {
    catalog: Mutex<BTreeMap<(ModuleKind, String), CatalogEntry>>,
    libraries: Mutex<Vec<LoadedLibrary>>,
    // Serializes whole registrations.
    load_lock: Mutex<()>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record descriptors as known without activating anything.
    pub fn catalog(&self, origin: Origin, descriptors: Vec<ModuleDescriptor>) -> Result<(), LoadError> {
        let _guard = self.load_lock.lock();
        self.check_names(&descriptors, None)?;
        self.commit(origin, descriptors);
        Ok(())
    }

    /// Construct, activate and catalog `descriptors` as one unit.
    ///
    /// Kinds are constructed in [`ModuleKind::ALL`] order against a staging
    /// area, so a sensor factory already sees the batch's notification
    /// modules while nothing of the batch is live yet. The finished batch is
    /// activated in one step; on any failure none of it ever was.
    pub fn register(
        &self,
        origin: Origin,
        descriptors: Vec<ModuleDescriptor>,
        ctx: &ModuleContext,
    ) -> Result<Vec<(ModuleKind, String)>, LoadError> {
        let _guard = self.load_lock.lock();
        self.check_names(&descriptors, Some(ctx))?;

        let staged = Arc::new(Registries::staging());
        let staging = ctx.staging(Arc::clone(&staged));
        let mut batch: Vec<ModuleInstance> = Vec::with_capacity(descriptors.len());
        for kind in ModuleKind::ALL {
            for descriptor in descriptors.iter().filter(|d| d.kind() == kind) {
                match construct(descriptor, &staging) {
                    Ok(instance) => {
                        staged.insert(instance.clone());
                        batch.push(instance);
                    }
                    Err(source) => {
                        let e = LoadError::Factory { name: descriptor.name.clone(), source };
                        vmiids_log!(Level::Warn, "loader", "registration from {} rolled back: {}", origin, e);
                        return Err(e);
                    }
                }
            }
        }
        drop(staging);
        staged.clear();

        let activated: Vec<(ModuleKind, String)> =
            batch.iter().map(|instance| (instance.kind(), instance.name().to_owned())).collect();
        if let Err((kind, name)) = ctx.registries().insert_all(batch) {
            let e = LoadError::NameCollision { kind, name };
            vmiids_log!(Level::Warn, "loader", "registration from {} rolled back: {}", origin, e);
            return Err(e);
        }

        self.commit(origin, descriptors);
        Ok(activated)
    }

    /// Open `path`, verify its declaration and register its modules.
    ///
    /// Once the declaration checks out the library stays mapped, whether or
    /// not registration succeeds: its factories may have handed out objects
    /// whose code lives in it.
    pub fn load(&self, path: &Path, ctx: &ModuleContext) -> Result<LibraryInfo, LoadError> {
        // SAFETY: running a library's initialisers is inherent to loading
        // it; only libraries the operator configured or requested get here.
        let library = unsafe { Library::new(path) }
            .map_err(|source| LoadError::Library { path: path.to_owned(), source })?;

        let declaration: *const PluginDeclaration = {
            // SAFETY: the symbol is the address of a `PluginDeclaration`
            // static; layout compatibility is checked field by field below,
            // ABI version first.
            let symbol: Symbol<*const PluginDeclaration> = unsafe { library.get(DECLARATION_SYMBOL) }
                .map_err(|source| LoadError::MissingSymbol { path: path.to_owned(), source })?;
            *symbol
        };
        // SAFETY: points into `library`, which is alive until the leak below
        // and for the rest of the process after it.
        let declaration = unsafe { &*declaration };

        if declaration.abi_version != PLUGIN_ABI_VERSION {
            return Err(LoadError::AbiMismatch {
                path: path.to_owned(),
                found: declaration.abi_version,
                expected: PLUGIN_ABI_VERSION,
            });
        }
        if declaration.rustc_version != RUSTC_VERSION || declaration.core_version != CORE_VERSION {
            return Err(LoadError::CompilerMismatch {
                path: path.to_owned(),
                found: declaration.rustc_version.to_owned(),
                found_core: declaration.core_version.to_owned(),
                expected: RUSTC_VERSION.to_owned(),
                expected_core: CORE_VERSION.to_owned(),
            });
        }

        let sha256 = file_digest(path)?;
        let library: &'static Library = Box::leak(Box::new(library));
        let descriptors = (declaration.descriptors)();
        let activated = self
            .register(Origin::Library(path.to_owned()), descriptors, ctx)
            .inspect_err(|_| {
                vmiids_log!(Level::Warn, "loader", "{} stays mapped after the failed registration", path.display());
            })?;

        let info = LibraryInfo {
            path: path.to_owned(),
            sha256,
            modules: activated.iter().map(|(_, name)| name.clone()).collect(),
            loaded_at: Utc::now(),
        };
        vmiids_log!(
            Level::Info,
            "loader",
            "loaded {} (sha256 {}) providing {:?}",
            path.display(),
            info.sha256,
            info.modules
        );
        self.libraries.lock().push(LoadedLibrary { info: info.clone(), _library: library });
        Ok(info)
    }

    /// Build a fresh instance of a catalogued module. Sensors are initialised.
    pub fn instantiate(
        &self,
        kind: ModuleKind,
        name: &str,
        ctx: &ModuleContext,
    ) -> Option<Result<ModuleInstance, ModuleError>> {
        let descriptor = self.catalog.lock().get(&(kind, name.to_owned()))?.descriptor.clone();
        Some(construct(&descriptor, ctx))
    }

    pub fn is_known(&self, kind: ModuleKind, name: &str) -> bool {
        self.catalog.lock().contains_key(&(kind, name.to_owned()))
    }

    /// Catalogued kinds that carry `name`.
    pub fn kinds_of(&self, name: &str) -> Vec<ModuleKind> {
        self.catalog
            .lock()
            .keys()
            .filter(|(_, n)| n == name)
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn catalog_items(&self) -> Vec<CatalogItem> {
        self.catalog
            .lock()
            .iter()
            .map(|((kind, name), entry)| CatalogItem {
                kind: *kind,
                name: name.clone(),
                origin: entry.origin.clone(),
            })
            .collect()
    }

    pub fn libraries(&self) -> Vec<LibraryInfo> {
        self.libraries.lock().iter().map(|l| l.info.clone()).collect()
    }

    fn check_names(&self, descriptors: &[ModuleDescriptor], ctx: Option<&ModuleContext>) -> Result<(), LoadError> {
        let mut seen = BTreeSet::new();
        let catalog = self.catalog.lock();
        for d in descriptors {
            let key = (d.kind(), d.name.clone());
            let taken = !seen.insert(key.clone())
                || catalog.contains_key(&key)
                || ctx.is_some_and(|ctx| ctx.registries().contains(key.0, &key.1));
            if taken {
                return Err(LoadError::NameCollision { kind: key.0, name: key.1 });
            }
        }
        Ok(())
    }

    fn commit(&self, origin: Origin, descriptors: Vec<ModuleDescriptor>) {
        let mut catalog = self.catalog.lock();
        for descriptor in descriptors {
            vmiids_log!(Level::Debug, "loader", "catalogued {} module '{}' from {}", descriptor.kind(), descriptor.name, origin);
            catalog.insert(
                (descriptor.kind(), descriptor.name.clone()),
                CatalogEntry { descriptor, origin: origin.clone() },
            );
        }
    }
}

/// Run a descriptor's factory; sensors are initialised before they are handed out.
fn construct(descriptor: &ModuleDescriptor, ctx: &ModuleContext) -> Result<ModuleInstance, ModuleError> {
    let instance = descriptor.factory.build(ctx)?;
    if instance.name() != descriptor.name {
        return Err(ModuleError::Failed(format!(
            "factory for '{}' produced a module named '{}'",
            descriptor.name,
            instance.name()
        )));
    }
    if let ModuleInstance::Sensor(sensor) = &instance {
        sensor.initialize()?;
    }
    Ok(instance)
}

fn file_digest(path: &Path) -> Result<String, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io { path: path.to_owned(), source })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
