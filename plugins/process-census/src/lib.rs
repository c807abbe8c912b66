// src/lib.rs

//! Loadable detection module that tracks the guest's process table.
//!
//! Each run asks `MemorySensorModule` for the task list, reports processes
//! that appeared or vanished since the previous run, and raises an alert for
//! every name listed in the `required` option that is not running.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use vmiids::{
    DetectionModule, Module, ModuleContext, ModuleDescriptor, ModuleError, NotificationModule,
    modules::builtin::{GuestProcess, MemorySensorModule, ShellNotificationModule},
};

pub struct ProcessCensusDetectionModule {
    required: BTreeSet<String>,
    previous: Mutex<Option<BTreeMap<u32, GuestProcess>>>,
}

impl ProcessCensusDetectionModule {
    pub const NAME: &'static str = "ProcessCensusDetectionModule";

    pub fn new(required: impl IntoIterator<Item = String>) -> Self {
        Self { required: required.into_iter().collect(), previous: Mutex::new(None) }
    }

    pub fn from_context(ctx: &ModuleContext) -> Result<Self, ModuleError> {
        let required = ctx
            .option(Self::NAME, "required")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        Ok(Self::new(required))
    }

    /// Compare `current` against the previous census and remember it.
    pub fn census(&self, current: BTreeMap<u32, GuestProcess>) -> Census {
        let mut previous = self.previous.lock();
        let (started, exited) = match previous.as_ref() {
            Some(before) => (
                current.values().filter(|p| !before.contains_key(&p.pid)).cloned().collect(),
                before.values().filter(|p| !current.contains_key(&p.pid)).cloned().collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        let running: BTreeSet<&str> = current.values().map(|p| p.name.as_str()).collect();
        let missing = self
            .required
            .iter()
            .filter(|name| !running.contains(name.as_str()))
            .cloned()
            .collect();
        let census = Census { total: current.len(), started, exited, missing };
        *previous = Some(current);
        census
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Census {
    pub total: usize,
    pub started: Vec<GuestProcess>,
    pub exited: Vec<GuestProcess>,
    pub missing: Vec<String>,
}

impl Census {
    pub fn summary(&self) -> String {
        format!(
            "{} processes, {} started, {} exited, {} required missing",
            self.total,
            self.started.len(),
            self.exited.len(),
            self.missing.len()
        )
    }
}

impl Module for ProcessCensusDetectionModule {
    fn name(&self) -> &str {
        Self::NAME
    }
}

impl DetectionModule for ProcessCensusDetectionModule {
    fn run(&self, ctx: &ModuleContext) -> Result<String, ModuleError> {
        let processes = ctx.with_sensor(MemorySensorModule::NAME, MemorySensorModule::process_list)??;
        let census = self.census(processes);

        if let Some(notify) = ctx.notification(ShellNotificationModule::NAME) {
            report(notify.as_ref(), &census);
        }
        Ok(census.summary())
    }
}

fn report(notify: &dyn NotificationModule, census: &Census) {
    for p in &census.started {
        notify.info(ProcessCensusDetectionModule::NAME, &format!("started: {} (pid {})", p.name, p.pid));
    }
    for p in &census.exited {
        notify.info(ProcessCensusDetectionModule::NAME, &format!("exited: {} (pid {})", p.name, p.pid));
    }
    for name in &census.missing {
        notify.alert(ProcessCensusDetectionModule::NAME, &format!("required process '{name}' is not running"));
    }
}

fn descriptors() -> Vec<ModuleDescriptor> {
    vec![ModuleDescriptor::detection(
        ProcessCensusDetectionModule::NAME,
        ProcessCensusDetectionModule::from_context,
    )]
}

vmiids::declare_plugin!(descriptors);
