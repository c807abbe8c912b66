// src/orchestrator/mod.rs

//! Process-wide coordinator.
//!
//! Key responsibilities:
//! - Own the three module registries, the loader and the monitor session.
//! - Run the periodic collection loop on its own thread (`collector`).
//! - Host the control-plane listener on a second thread.
//! - Start, stop and join both, from whatever thread asks.

mod collector;

pub use collector::CollectionReport;

use std::{
    collections::BTreeSet,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{self, Sender};
use log::Level;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::{
    config::{Config, OptionTable},
    control::ControlHandle,
    modules::{
        DetectionModule, LoadError, ModuleContext, ModuleError, ModuleKind, ModuleLoader,
        NotificationModule, Origin, Registries, SensorModule, builtin, loader::LibraryInfo,
    },
    monitor::{ProtocolError, VmState},
    vmiids_log,
};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("orchestrator is already running")]
    AlreadyRunning,

    #[error("orchestrator has been stopped")]
    AlreadyStopped,

    #[error("unknown {kind} module '{name}'")]
    UnknownModule { kind: ModuleKind, name: String },

    #[error("{kind} module '{name}' is already active")]
    AlreadyActive { kind: ModuleKind, name: String },

    #[error("{kind} module '{name}' is not active")]
    NotActive { kind: ModuleKind, name: String },

    #[error("module '{name}' failed: {source}")]
    ModuleFault {
        name: String,
        #[source]
        source: ModuleError,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("no monitor session is configured")]
    MonitorUnavailable,

    #[error("control listener on {addr}: {source}")]
    Control {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot spawn collection thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Runtime knobs, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub interval: Duration,
    pub pause_vm: bool,
    /// Notification module told about module faults.
    pub report_to: Option<String>,
    /// `None` runs without a control listener.
    pub control_listen: Option<SocketAddr>,
    pub builtin_modules: Vec<String>,
    pub libraries: Vec<PathBuf>,
    pub library_dir: Option<PathBuf>,
    pub module_options: OptionTable,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            pause_vm: false,
            report_to: None,
            control_listen: None,
            builtin_modules: Vec::new(),
            libraries: Vec::new(),
            library_dir: None,
            module_options: OptionTable::new(),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            interval: cfg.collector.interval,
            pause_vm: cfg.collector.pause_vm,
            report_to: cfg.collector.report_to.clone(),
            control_listen: cfg.control.enabled.then_some(cfg.control.listen),
            builtin_modules: cfg.modules.builtin.clone(),
            libraries: cfg.modules.libraries.clone(),
            library_dir: cfg.modules.library_dir.clone(),
            module_options: cfg.modules.options.clone(),
        }
    }
}

/// Active/known state of one module, as reported to administrators.
#[derive(Debug, Clone)]
pub struct ModuleStatus {
    pub kind: ModuleKind,
    pub name: String,
    /// `None` for instances enqueued directly rather than from the catalog.
    pub origin: Option<Origin>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct ModuleSnapshot {
    pub modules: Vec<ModuleStatus>,
    pub libraries: Vec<LibraryInfo>,
    pub collecting: bool,
}

struct Tasks {
    collector: JoinHandle<()>,
    // Dropping it wakes the collector out of its inter-iteration wait.
    wake: Sender<()>,
    control: Option<ControlHandle>,
}

enum Lifecycle {
    Idle,
    Running(Tasks),
    Stopping,
    Stopped,
}

pub struct Orchestrator {
    registries: Arc<Registries>,
    ctx: ModuleContext,
    settings: OrchestratorSettings,
    shutdown: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    stopped: Condvar,
    control_addr: Mutex<Option<SocketAddr>>,
    // Last: module code must be gone before the catalog goes.
    loader: ModuleLoader,
}

impl Orchestrator {
    /// Build an idle orchestrator with the built-in modules catalogued.
    pub fn new(settings: OrchestratorSettings, vm: Option<VmState>) -> Result<Arc<Self>, OrchestratorError> {
        let registries = Arc::new(Registries::new());
        let ctx = ModuleContext::new(
            Arc::clone(&registries),
            vm,
            Arc::new(settings.module_options.clone()),
        );
        let loader = ModuleLoader::new();
        loader.catalog(Origin::Builtin, builtin::descriptors())?;

        Ok(Arc::new(Self {
            registries,
            ctx,
            settings,
            shutdown: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle::Idle),
            stopped: Condvar::new(),
            control_addr: Mutex::new(None),
            loader,
        }))
    }

    // ───── lifecycle ────────────────────────────────────────────────────────

    /// Perform the initial module loads, then spawn the collection loop and
    /// the control listener.
    ///
    /// Individual load failures are logged and do not prevent the start; a
    /// control listener that cannot bind does.
    pub fn start(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        let mut state = self.lifecycle.lock();
        match *state {
            Lifecycle::Idle => {}
            Lifecycle::Running(_) => return Err(OrchestratorError::AlreadyRunning),
            Lifecycle::Stopping | Lifecycle::Stopped => return Err(OrchestratorError::AlreadyStopped),
        }

        self.initial_loads();

        let control = match self.settings.control_listen {
            Some(addr) => {
                let handle = crate::control::spawn(Arc::clone(self), addr)
                    .map_err(|source| OrchestratorError::Control { addr, source })?;
                *self.control_addr.lock() = Some(handle.local_addr());
                Some(handle)
            }
            None => None,
        };

        let (wake, woken) = channel::bounded::<()>(0);
        let this = Arc::clone(self);
        let collector = thread::Builder::new()
            .name("vmiids-collector".into())
            .spawn(move || this.collection_loop(woken));
        let collector = match collector {
            Ok(handle) => handle,
            Err(source) => {
                if let Some(control) = control {
                    control.shutdown();
                }
                *self.control_addr.lock() = None;
                return Err(OrchestratorError::Spawn(source));
            }
        };

        *state = Lifecycle::Running(Tasks { collector, wake, control });
        vmiids_log!(
            Level::Info,
            "orchestrator",
            "started (interval={:?}, control={:?})",
            self.settings.interval,
            *self.control_addr.lock()
        );
        Ok(())
    }

    /// Cooperative shutdown. The collection loop stops at the next point
    /// between two modules. The listener stops accepting and gives in-flight
    /// calls a bounded grace period. Both are joined before this returns.
    ///
    /// Safe to call from any thread and more than once; a concurrent second
    /// call waits for the first to finish.
    pub fn stop(&self, signal: i32) {
        self.shutdown.store(true, Ordering::SeqCst);

        let tasks = {
            let mut state = self.lifecycle.lock();
            match std::mem::replace(&mut *state, Lifecycle::Stopping) {
                Lifecycle::Running(tasks) => tasks,
                Lifecycle::Idle | Lifecycle::Stopped => {
                    *state = Lifecycle::Stopped;
                    self.stopped.notify_all();
                    return;
                }
                Lifecycle::Stopping => {
                    while !matches!(*state, Lifecycle::Stopped) {
                        self.stopped.wait(&mut state);
                    }
                    return;
                }
            }
        };

        vmiids_log!(Level::Info, "orchestrator", "stopping (signal {})", signal);

        let Tasks { collector, wake, control } = tasks;
        drop(wake);
        if let Some(control) = control {
            control.shutdown();
        }
        if collector.thread().id() != thread::current().id() && collector.join().is_err() {
            vmiids_log!(Level::Error, "orchestrator", "collection thread panicked");
        }

        *self.lifecycle.lock() = Lifecycle::Stopped;
        self.stopped.notify_all();
        vmiids_log!(Level::Info, "orchestrator", "stopped");
    }

    /// Block until [`Orchestrator::stop`] has completed.
    pub fn wait(&self) {
        let mut state = self.lifecycle.lock();
        while !matches!(*state, Lifecycle::Stopped) {
            self.stopped.wait(&mut state);
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Address the control listener actually bound, once started.
    pub fn control_addr(&self) -> Option<SocketAddr> {
        *self.control_addr.lock()
    }

    fn initial_loads(&self) {
        let mut builtins: BTreeSet<(ModuleKind, &str)> = BTreeSet::new();
        for name in &self.settings.builtin_modules {
            let kinds = self.loader.kinds_of(name);
            if kinds.is_empty() {
                vmiids_log!(Level::Warn, "orchestrator", "unknown built-in module '{}'", name);
            }
            builtins.extend(kinds.into_iter().map(|kind| (kind, name.as_str())));
        }
        // Kind order: notification sinks exist before the sensors that look them up.
        for (kind, name) in builtins {
            if let Err(e) = self.enqueue(kind, name) {
                vmiids_log!(Level::Error, "orchestrator", "initial {} module '{}': {}", kind, name, e);
            }
        }

        for path in &self.settings.libraries {
            self.initial_library(path);
        }

        if let Some(dir) = &self.settings.library_dir {
            match shared_objects_in(dir) {
                Ok(paths) => paths.iter().for_each(|p| self.initial_library(p)),
                Err(e) => vmiids_log!(Level::Error, "orchestrator", "cannot list {}: {}", dir.display(), e),
            }
        }
    }

    fn initial_library(&self, path: &Path) {
        if let Err(e) = self.load_shared_object(path) {
            vmiids_log!(Level::Error, "orchestrator", "initial load failed: {}", e);
        }
    }

    // ───── module management ────────────────────────────────────────────────

    /// Activate a catalogued module by name.
    pub fn enqueue(&self, kind: ModuleKind, name: &str) -> Result<(), OrchestratorError> {
        if self.registries.contains(kind, name) {
            return Err(OrchestratorError::AlreadyActive { kind, name: name.to_owned() });
        }
        let instance = match self.loader.instantiate(kind, name, &self.ctx) {
            None => return Err(OrchestratorError::UnknownModule { kind, name: name.to_owned() }),
            Some(Err(source)) => return Err(OrchestratorError::ModuleFault { name: name.to_owned(), source }),
            Some(Ok(instance)) => instance,
        };
        if self.registries.insert(instance) {
            Ok(())
        } else {
            Err(OrchestratorError::AlreadyActive { kind, name: name.to_owned() })
        }
    }

    /// Deactivate a module. It stays catalogued and can be enqueued again.
    pub fn dequeue(&self, kind: ModuleKind, name: &str) -> Result<(), OrchestratorError> {
        if self.registries.remove(kind, name) {
            Ok(())
        } else if self.loader.is_known(kind, name) {
            Err(OrchestratorError::NotActive { kind, name: name.to_owned() })
        } else {
            Err(OrchestratorError::UnknownModule { kind, name: name.to_owned() })
        }
    }

    pub fn enqueue_detection_module(&self, name: &str) -> bool {
        self.report(self.enqueue(ModuleKind::Detection, name))
    }

    pub fn dequeue_detection_module(&self, name: &str) -> bool {
        self.report(self.dequeue(ModuleKind::Detection, name))
    }

    pub fn enqueue_notification_module(&self, name: &str) -> bool {
        self.report(self.enqueue(ModuleKind::Notification, name))
    }

    pub fn dequeue_notification_module(&self, name: &str) -> bool {
        self.report(self.dequeue(ModuleKind::Notification, name))
    }

    pub fn enqueue_sensor_module(&self, name: &str) -> bool {
        self.report(self.enqueue(ModuleKind::Sensor, name))
    }

    pub fn enqueue_detection_instance(&self, module: Arc<dyn DetectionModule>) -> bool {
        let name = module.name().to_owned();
        self.registries.detections.insert(name, module)
    }

    pub fn enqueue_notification_instance(&self, module: Arc<dyn NotificationModule>) -> bool {
        let name = module.name().to_owned();
        self.registries.notifications.insert(name, module)
    }

    /// Initialises the sensor before it becomes visible.
    pub fn enqueue_sensor_instance(&self, module: Arc<dyn SensorModule>) -> bool {
        if let Err(e) = module.initialize() {
            vmiids_log!(Level::Error, "orchestrator", "sensor '{}' failed to initialise: {}", module.name(), e);
            return false;
        }
        let name = module.name().to_owned();
        self.registries.sensors.insert(name, module)
    }

    pub fn get_sensor_module(&self, name: &str) -> Option<Arc<dyn SensorModule>> {
        self.registries.sensors.lookup(name)
    }

    pub fn get_notification_module(&self, name: &str) -> Option<Arc<dyn NotificationModule>> {
        self.registries.notifications.lookup(name)
    }

    pub fn load_shared_object(&self, path: &Path) -> Result<LibraryInfo, LoadError> {
        self.loader.load(path, &self.ctx)
    }

    pub fn list_modules(&self) -> ModuleSnapshot {
        let mut modules: Vec<ModuleStatus> = self
            .loader
            .catalog_items()
            .into_iter()
            .map(|item| ModuleStatus {
                active: self.registries.contains(item.kind, &item.name),
                kind: item.kind,
                name: item.name,
                origin: Some(item.origin),
            })
            .collect();

        for kind in ModuleKind::ALL {
            for name in self.registries.names(kind) {
                if !self.loader.is_known(kind, &name) {
                    modules.push(ModuleStatus { kind, name, origin: None, active: true });
                }
            }
        }
        modules.sort_by(|a, b| (a.kind, &a.name).cmp(&(b.kind, &b.name)));

        ModuleSnapshot {
            modules,
            libraries: self.loader.libraries(),
            collecting: self.is_started() && !self.is_stopping(),
        }
    }

    // ───── guest state ──────────────────────────────────────────────────────

    pub fn vm(&self) -> Option<&VmState> {
        self.ctx.vm()
    }

    pub fn vm_is_running(&self) -> Result<bool, OrchestratorError> {
        let vm = self.vm().ok_or(OrchestratorError::MonitorUnavailable)?;
        Ok(vm.is_running()?)
    }

    /// The context every module of this orchestrator is built with.
    pub fn context(&self) -> &ModuleContext {
        &self.ctx
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    fn report(&self, result: Result<(), OrchestratorError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                vmiids_log!(Level::Warn, "orchestrator", "{}", e);
                false
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.registries.clear();
    }
}

/// Every `*.so` directly inside `dir`, sorted by file name.
fn shared_objects_in(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "so"))
        .collect();
    paths.sort();
    Ok(paths)
}
