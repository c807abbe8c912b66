//! Shared fixtures: a scripted monitor console and small test modules.

#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;

use vmiids::{
    DetectionModule, Module, ModuleContext, ModuleError, NotificationModule, SensorModule, Severity,
    monitor::{ConsoleTransport, MonitorProtocol, TransportError, VmState},
};

// ───── scripted console ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct Script {
    /// command → reply body (without echo and prompt)
    pub replies: BTreeMap<String, String>,
    /// Every command line written, in order.
    pub sent: Vec<String>,
}

/// Answers known commands like QEMU does (echo, body, prompt); unknown
/// commands never get a prompt, which reads as a timeout.
pub struct ScriptedConsole {
    script: Arc<Mutex<Script>>,
    pending: Vec<u8>,
}

impl ScriptedConsole {
    pub fn new(replies: &[(&str, &str)]) -> (Self, Arc<Mutex<Script>>) {
        let script = Arc::new(Mutex::new(Script {
            replies: replies.iter().map(|(c, r)| (c.to_string(), r.to_string())).collect(),
            sent: Vec::new(),
        }));
        (Self { script: Arc::clone(&script), pending: Vec::new() }, script)
    }
}

impl ConsoleTransport for ScriptedConsole {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let command = String::from_utf8_lossy(bytes).trim_end().to_string();
        let mut script = self.script.lock();
        if let Some(reply) = script.replies.get(&command) {
            self.pending.extend_from_slice(format!("{command}\r\n{reply}(qemu) ").as_bytes());
        }
        script.sent.push(command);
        Ok(())
    }

    fn read_until(&mut self, marker: &[u8], timeout: Duration) -> Result<Vec<u8>, TransportError> {
        match self.pending.windows(marker.len()).position(|w| w == marker) {
            Some(at) => Ok(self.pending.drain(..at + marker.len()).collect()),
            None => Err(TransportError::Timeout(timeout)),
        }
    }
}

pub fn scripted_monitor(replies: &[(&str, &str)]) -> (Arc<MonitorProtocol>, Arc<Mutex<Script>>) {
    let (console, script) = ScriptedConsole::new(replies);
    (Arc::new(MonitorProtocol::with_defaults(console)), script)
}

pub fn scripted_vm(replies: &[(&str, &str)]) -> (VmState, Arc<Mutex<Script>>) {
    let (monitor, script) = scripted_monitor(replies);
    (VmState::new(monitor), script)
}

// ───── detection modules ────────────────────────────────────────────────────

pub struct Counting {
    pub name: String,
    pub runs: Arc<AtomicUsize>,
}

impl Counting {
    pub fn new(name: &str) -> (Arc<Self>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (Arc::new(Self { name: name.into(), runs: Arc::clone(&runs) }), runs)
    }
}

impl Module for Counting {
    fn name(&self) -> &str {
        &self.name
    }
}

impl DetectionModule for Counting {
    fn run(&self, _ctx: &ModuleContext) -> Result<String, ModuleError> {
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{} run {n}", self.name))
    }
}

pub struct Failing(pub String);

impl Module for Failing {
    fn name(&self) -> &str {
        &self.0
    }
}

impl DetectionModule for Failing {
    fn run(&self, _ctx: &ModuleContext) -> Result<String, ModuleError> {
        Err(ModuleError::Failed("rootkit check could not read the task list".into()))
    }
}

pub struct Panicking(pub String);

impl Module for Panicking {
    fn name(&self) -> &str {
        &self.0
    }
}

impl DetectionModule for Panicking {
    fn run(&self, _ctx: &ModuleContext) -> Result<String, ModuleError> {
        panic!("index out of range in {}", self.0)
    }
}

/// Announces each run on `started`, then blocks until `release` yields.
pub struct Blocking {
    pub name: String,
    pub started: Sender<()>,
    pub release: Receiver<()>,
    pub runs: Arc<AtomicUsize>,
}

impl Module for Blocking {
    fn name(&self) -> &str {
        &self.name
    }
}

impl DetectionModule for Blocking {
    fn run(&self, _ctx: &ModuleContext) -> Result<String, ModuleError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let _ = self.started.send(());
        let _ = self.release.recv_timeout(Duration::from_secs(10));
        Ok("done".into())
    }
}

// ───── other kinds ──────────────────────────────────────────────────────────

pub type Notes = Arc<Mutex<Vec<(Severity, String, String)>>>;

pub struct Recorder {
    pub name: String,
    pub notes: Notes,
}

impl Recorder {
    pub fn new(name: &str) -> (Arc<Self>, Notes) {
        let notes = Notes::default();
        (Arc::new(Self { name: name.into(), notes: Arc::clone(&notes) }), notes)
    }
}

impl Module for Recorder {
    fn name(&self) -> &str {
        &self.name
    }
}

impl NotificationModule for Recorder {
    fn notify(&self, severity: Severity, source: &str, message: &str) {
        self.notes.lock().push((severity, source.into(), message.into()));
    }
}

/// Notification module that panics on every message.
pub struct Exploding(pub String);

impl Module for Exploding {
    fn name(&self) -> &str {
        &self.0
    }
}

impl NotificationModule for Exploding {
    fn notify(&self, _severity: Severity, source: &str, _message: &str) {
        panic!("mail relay refused the report about {source}")
    }
}

pub struct TestSensor {
    pub name: String,
    pub fail_init: bool,
}

impl Module for TestSensor {
    fn name(&self) -> &str {
        &self.name
    }
}

impl SensorModule for TestSensor {
    fn initialize(&self) -> Result<(), ModuleError> {
        if self.fail_init {
            Err(ModuleError::Failed("sensor not attached".into()))
        } else {
            Ok(())
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
