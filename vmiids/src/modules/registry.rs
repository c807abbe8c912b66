// src/modules/registry.rs

//! Name → module maps, one per module kind.
//!
//! Each registry has exactly one lock, held only for the map operation
//! itself. Modules run on snapshots taken under the lock, so a slow module
//! never blocks enqueue/dequeue and a snapshot never sees a half-applied
//! mutation. Removed instances are dropped after the lock is released.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use log::Level;
use parking_lot::Mutex;

use super::{
    DetectionModule, ModuleInstance, ModuleKind, NotificationModule, SensorModule,
};
use crate::vmiids_log;

pub struct ModuleRegistry<M: ?Sized> {
    kind: ModuleKind,
    // Staging registries keep quiet: no gauge, mutations logged at debug.
    published: bool,
    entries: Mutex<BTreeMap<String, Arc<M>>>,
}

impl<M: ?Sized> ModuleRegistry<M> {
    pub fn new(kind: ModuleKind) -> Self {
        Self { kind, published: true, entries: Mutex::new(BTreeMap::new()) }
    }

    fn unpublished(kind: ModuleKind) -> Self {
        Self { published: false, ..Self::new(kind) }
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Store `module` under `name`. Returns `false`, leaving the registry
    /// untouched, if the name is taken.
    pub fn insert(&self, name: impl Into<String>, module: Arc<M>) -> bool {
        let name = name.into();
        {
            let mut entries = self.entries.lock();
            if entries.contains_key(&name) {
                drop(entries);
                vmiids_log!(Level::Debug, "registry", "{} module '{}' already registered", self.kind, name);
                return false;
            }
            entries.insert(name.clone(), module);
            self.record_len(entries.len());
        }
        vmiids_log!(self.level(), "registry", "{} module '{}' enqueued", self.kind, name);
        true
    }

    /// Remove `name`. Returns `false` if it was not registered.
    pub fn remove(&self, name: &str) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            let removed = entries.remove(name);
            if removed.is_some() {
                self.record_len(entries.len());
            }
            removed
        };
        match removed {
            Some(module) => {
                // Last reference may go here, outside the lock.
                drop(module);
                vmiids_log!(self.level(), "registry", "{} module '{}' dequeued", self.kind, name);
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<M>> {
        self.entries.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    /// Point-in-time copy of all entries, in name order.
    pub fn snapshot(&self) -> Vec<(String, Arc<M>)> {
        self.entries
            .lock()
            .iter()
            .map(|(name, module)| (name.clone(), Arc::clone(module)))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every module; used at shutdown.
    pub fn clear(&self) {
        let drained = {
            let mut entries = self.entries.lock();
            self.record_len(0);
            std::mem::take(&mut *entries)
        };
        drop(drained);
    }

    // Called with the lock held so concurrent mutations publish in order.
    fn record_len(&self, len: usize) {
        if !self.published {
            return;
        }
        metrics::gauge!("vmiids_registered_modules", "kind" => self.kind.as_str()).set(len as f64);
    }

    fn level(&self) -> Level {
        if self.published { Level::Info } else { Level::Debug }
    }
}

/// The three registries the orchestrator owns.
pub struct Registries {
    pub sensors: ModuleRegistry<dyn SensorModule>,
    pub detections: ModuleRegistry<dyn DetectionModule>,
    pub notifications: ModuleRegistry<dyn NotificationModule>,
}

impl Registries {
    pub fn new() -> Self {
        Self {
            sensors: ModuleRegistry::new(ModuleKind::Sensor),
            detections: ModuleRegistry::new(ModuleKind::Detection),
            notifications: ModuleRegistry::new(ModuleKind::Notification),
        }
    }

    /// Registries for modules that are built but not yet active.
    pub(crate) fn staging() -> Self {
        Self {
            sensors: ModuleRegistry::unpublished(ModuleKind::Sensor),
            detections: ModuleRegistry::unpublished(ModuleKind::Detection),
            notifications: ModuleRegistry::unpublished(ModuleKind::Notification),
        }
    }

    pub fn contains(&self, kind: ModuleKind, name: &str) -> bool {
        match kind {
            ModuleKind::Sensor => self.sensors.contains(name),
            ModuleKind::Detection => self.detections.contains(name),
            ModuleKind::Notification => self.notifications.contains(name),
        }
    }

    /// Insert into the registry matching the instance's kind.
    pub fn insert(&self, instance: ModuleInstance) -> bool {
        let name = instance.name().to_owned();
        match instance {
            ModuleInstance::Sensor(m) => self.sensors.insert(name, m),
            ModuleInstance::Detection(m) => self.detections.insert(name, m),
            ModuleInstance::Notification(m) => self.notifications.insert(name, m),
        }
    }

    /// Insert every instance of `batch` or none of them.
    ///
    /// All three registries stay locked from the name check to the last
    /// insert, so no lookup or snapshot ever sees part of the batch. On a
    /// clash the first taken `(kind, name)` is returned and the batch is
    /// dropped after the locks are released.
    pub fn insert_all(&self, batch: Vec<ModuleInstance>) -> Result<(), (ModuleKind, String)> {
        let mut names = Vec::with_capacity(batch.len());
        {
            let mut sensors = self.sensors.entries.lock();
            let mut detections = self.detections.entries.lock();
            let mut notifications = self.notifications.entries.lock();

            let mut seen = BTreeSet::new();
            for instance in &batch {
                let key = (instance.kind(), instance.name().to_owned());
                let taken = match key.0 {
                    ModuleKind::Sensor => sensors.contains_key(&key.1),
                    ModuleKind::Detection => detections.contains_key(&key.1),
                    ModuleKind::Notification => notifications.contains_key(&key.1),
                };
                if taken || !seen.insert(key.clone()) {
                    return Err(key);
                }
            }

            for instance in batch {
                let name = instance.name().to_owned();
                names.push((instance.kind(), name.clone()));
                match instance {
                    ModuleInstance::Sensor(m) => {
                        sensors.insert(name, m);
                    }
                    ModuleInstance::Detection(m) => {
                        detections.insert(name, m);
                    }
                    ModuleInstance::Notification(m) => {
                        notifications.insert(name, m);
                    }
                }
            }
            self.sensors.record_len(sensors.len());
            self.detections.record_len(detections.len());
            self.notifications.record_len(notifications.len());
        }
        for (kind, name) in names {
            vmiids_log!(Level::Info, "registry", "{} module '{}' enqueued", kind, name);
        }
        Ok(())
    }

    pub fn remove(&self, kind: ModuleKind, name: &str) -> bool {
        match kind {
            ModuleKind::Sensor => self.sensors.remove(name),
            ModuleKind::Detection => self.detections.remove(name),
            ModuleKind::Notification => self.notifications.remove(name),
        }
    }

    pub fn names(&self, kind: ModuleKind) -> Vec<String> {
        match kind {
            ModuleKind::Sensor => self.sensors.names(),
            ModuleKind::Detection => self.detections.names(),
            ModuleKind::Notification => self.notifications.names(),
        }
    }

    /// Detection modules go first so nothing still running holds a sensor.
    pub fn clear(&self) {
        self.detections.clear();
        self.sensors.clear();
        self.notifications.clear();
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_then_reinsert() {
        let reg: ModuleRegistry<str> = ModuleRegistry::new(ModuleKind::Sensor);
        assert!(reg.insert("a", Arc::from("first")));
        assert!(reg.remove("a"));
        assert!(!reg.remove("a"));
        assert!(reg.insert("a", Arc::from("second")));
        assert_eq!(reg.lookup("a").as_deref(), Some("second"));
    }

    #[test]
    fn snapshot_is_name_ordered() {
        let reg: ModuleRegistry<str> = ModuleRegistry::new(ModuleKind::Detection);
        for name in ["c", "a", "b"] {
            reg.insert(name, Arc::from(name));
        }
        let names: Vec<_> = reg.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn batch_with_a_taken_name_inserts_nothing() {
        use crate::modules::{Module, NotificationModule, Severity};

        struct Sink(&'static str);
        impl Module for Sink {
            fn name(&self) -> &str {
                self.0
            }
        }
        impl NotificationModule for Sink {
            fn notify(&self, _: Severity, _: &str, _: &str) {}
        }

        let registries = Registries::new();
        assert!(registries.notifications.insert("taken", Arc::new(Sink("taken"))));

        let batch = vec![
            ModuleInstance::Notification(Arc::new(Sink("fresh"))),
            ModuleInstance::Notification(Arc::new(Sink("taken"))),
        ];
        assert_eq!(
            registries.insert_all(batch),
            Err((ModuleKind::Notification, "taken".to_string()))
        );
        assert_eq!(registries.names(ModuleKind::Notification), ["taken"]);

        let batch = vec![ModuleInstance::Notification(Arc::new(Sink("fresh")))];
        assert!(registries.insert_all(batch).is_ok());
        assert_eq!(registries.names(ModuleKind::Notification), ["fresh", "taken"]);
    }
}
