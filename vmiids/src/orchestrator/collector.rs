// src/orchestrator/collector.rs

//! The periodic collection loop and one-off detection runs.

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, atomic::Ordering},
};

use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::Level;

use super::{Orchestrator, OrchestratorError};
use crate::{
    modules::{DetectionModule, ModuleError, ModuleKind},
    vmiids_log,
};

/// Outcome of one [`Orchestrator::collect_thread_level`] iteration.
#[derive(Debug, Default, Clone)]
pub struct CollectionReport {
    /// Detection modules that ran to completion, in execution order.
    pub completed: Vec<String>,
    /// (module, error) for every module that failed or panicked.
    pub faults: Vec<(String, String)>,
    /// Shutdown was requested before every module ran.
    pub interrupted: bool,
    /// Sensors active when the iteration began.
    pub sensors: usize,
}

impl Orchestrator {
    pub(super) fn collection_loop(&self, wake: Receiver<()>) {
        vmiids_log!(Level::Info, "collector", "collection loop started");
        while !self.is_stopping() {
            match catch_unwind(AssertUnwindSafe(|| self.collect_thread_level())) {
                Ok(report) if !report.faults.is_empty() => vmiids_log!(
                    Level::Warn,
                    "collector",
                    "iteration finished with {} fault(s)",
                    report.faults.len()
                ),
                Ok(_) => {}
                Err(payload) => vmiids_log!(
                    Level::Error,
                    "collector",
                    "iteration aborted: {}",
                    panic_message(payload.as_ref())
                ),
            }
            match wake.recv_timeout(self.settings.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        vmiids_log!(Level::Info, "collector", "collection loop exited");
    }

    /// Run every active detection module once.
    ///
    /// Modules run on a snapshot taken at the start, so enqueue/dequeue
    /// during the iteration affect only the next one. A failing or panicking
    /// module is recorded and the iteration carries on with the next.
    pub fn collect_thread_level(&self) -> CollectionReport {
        let sensors = self.registries.sensors.snapshot();
        let detections = self.registries.detections.snapshot();
        metrics::counter!("vmiids_collection_iterations_total").increment(1);

        let mut report = CollectionReport { sensors: sensors.len(), ..Default::default() };
        let paused = self.settings.pause_vm && self.pause_guest();

        for (name, module) in &detections {
            if self.shutdown.load(Ordering::SeqCst) {
                report.interrupted = true;
                break;
            }
            match self.guarded_run(module) {
                Ok(output) => {
                    vmiids_log!(Level::Debug, "collector", "{}: {}", name, output.trim_end());
                    report.completed.push(name.clone());
                }
                Err(e) => {
                    self.record_fault(name, &e);
                    report.faults.push((name.clone(), e.to_string()));
                }
            }
        }

        if paused {
            if let Some(vm) = self.vm() {
                if let Err(e) = vm.resume() {
                    vmiids_log!(Level::Error, "collector", "cannot resume guest: {}", e);
                }
            }
        }
        report
    }

    /// Run one active detection module outside the loop and return its text.
    pub fn run_single_detection_module(&self, name: &str) -> Result<String, OrchestratorError> {
        let module = self.registries.detections.lookup(name).ok_or_else(|| {
            if self.loader.is_known(ModuleKind::Detection, name) {
                OrchestratorError::NotActive { kind: ModuleKind::Detection, name: name.to_owned() }
            } else {
                OrchestratorError::UnknownModule { kind: ModuleKind::Detection, name: name.to_owned() }
            }
        })?;
        self.guarded_run(&module).map_err(|source| {
            self.record_fault(name, &source);
            OrchestratorError::ModuleFault { name: name.to_owned(), source }
        })
    }

    fn guarded_run(&self, module: &Arc<dyn DetectionModule>) -> Result<String, ModuleError> {
        catch_unwind(AssertUnwindSafe(|| module.run(&self.ctx)))
            .unwrap_or_else(|payload| Err(ModuleError::Panicked(panic_message(payload.as_ref()))))
    }

    fn record_fault(&self, name: &str, error: &ModuleError) {
        vmiids_log!(Level::Error, "collector", "module '{}' failed: {}", name, error);
        metrics::counter!("vmiids_module_faults_total", "module" => name.to_owned()).increment(1);

        let Some(sink_name) = self.settings.report_to.as_deref() else {
            return;
        };
        let Some(sink) = self.registries.notifications.lookup(sink_name) else {
            return;
        };
        let alerted = catch_unwind(AssertUnwindSafe(|| sink.alert(name, &error.to_string())));
        if let Err(payload) = alerted {
            vmiids_log!(
                Level::Error,
                "collector",
                "notification module '{}' panicked reporting '{}': {}",
                sink_name,
                name,
                panic_message(payload.as_ref())
            );
        }
    }

    /// Pause a running guest; `true` only if this call paused it.
    fn pause_guest(&self) -> bool {
        let Some(vm) = self.vm() else {
            return false;
        };
        match vm.is_running().and_then(|running| if running { vm.pause().map(|()| true) } else { Ok(false) }) {
            Ok(paused) => paused,
            Err(e) => {
                vmiids_log!(Level::Error, "collector", "cannot pause guest, collecting live: {}", e);
                false
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
