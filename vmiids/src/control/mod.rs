// src/control/mod.rs

//! gRPC control plane served by the daemon.
//!
//! Key responsibilities:
//! - Bind the listener synchronously so bind errors reach the caller.
//! - Host a tokio runtime on a dedicated thread and serve `vmiids.control.Control`.
//! - Translate orchestrator results into replies with a [`Fault`] code.
//! - Stop accepting on request and give in-flight calls [`DRAIN_GRACE`] to
//!   finish. Idle client connections do not hold the shutdown up.

use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::Level;
use tokio::sync::{Notify, oneshot};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status, transport::Server};

use shared::control::{
    Fault, LibraryEntry, ListModulesRequest, LoadRequest, ModuleEntry, ModuleListing, ModuleRequest,
    RunReply, StatusReply, StopRequest, VmStatusReply, VmStatusRequest,
    control_server::{Control, ControlServer},
};

use crate::{
    modules::{LoadError, ModuleError, ModuleKind},
    orchestrator::{ModuleSnapshot, Orchestrator, OrchestratorError},
    vmiids_log,
};

/// How long a stopping listener waits for open connections before it
/// drops them.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Running listener; dropped handles are not joined, call [`ControlHandle::shutdown`].
pub struct ControlHandle {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

impl ControlHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, drain for at most [`DRAIN_GRACE`], join the listener thread.
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
        if self.thread.thread().id() != thread::current().id() && self.thread.join().is_err() {
            vmiids_log!(Level::Error, "control", "listener thread panicked");
        }
    }
}

/// Bind `addr` and serve the control service on a new thread.
pub fn spawn(orchestrator: Arc<Orchestrator>, addr: SocketAddr) -> std::io::Result<ControlHandle> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let local = listener.local_addr()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("vmiids-rpc")
        .enable_all()
        .build()?;

    let (tx, rx) = oneshot::channel::<()>();
    let thread = thread::Builder::new()
        .name("vmiids-control".into())
        .spawn(move || {
            runtime.block_on(async move {
                let listener = match tokio::net::TcpListener::from_std(listener) {
                    Ok(l) => l,
                    Err(e) => {
                        vmiids_log!(Level::Error, "control", "cannot register listener: {}", e);
                        return;
                    }
                };
                vmiids_log!(Level::Info, "control", "listening on {}", local);

                let stopping = Arc::new(Notify::new());
                let signal = {
                    let stopping = Arc::clone(&stopping);
                    async move {
                        let _ = rx.await;
                        stopping.notify_one();
                    }
                };
                let serve = Server::builder()
                    .add_service(ControlServer::new(ControlService::new(orchestrator)))
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal);

                // Graceful shutdown waits for every connection to close,
                // including clients that simply stay connected.
                tokio::select! {
                    served = serve => {
                        if let Err(e) = served {
                            vmiids_log!(Level::Error, "control", "server error: {}", e);
                        }
                    }
                    _ = async {
                        stopping.notified().await;
                        tokio::time::sleep(DRAIN_GRACE).await;
                    } => {
                        vmiids_log!(Level::Warn, "control", "connections still open after {:?}, closing them", DRAIN_GRACE);
                    }
                }
            });
            runtime.shutdown_timeout(DRAIN_GRACE);
            vmiids_log!(Level::Info, "control", "listener on {} closed", local);
        })?;

    Ok(ControlHandle { addr: local, shutdown: tx, thread })
}

/// `Control` implementation dispatching to the orchestrator.
///
/// Orchestrator calls can block on the console or on module code, so each
/// one runs on the blocking pool.
pub struct ControlService {
    orchestrator: Arc<Orchestrator>,
}

impl ControlService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, Status>
    where
        T: Send + 'static,
        F: FnOnce(&Orchestrator) -> T + Send + 'static,
    {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::task::spawn_blocking(move || f(&orchestrator))
            .await
            .map_err(|e| Status::internal(format!("handler failed: {e}")))
    }
}

#[tonic::async_trait]
impl Control for ControlService {
    async fn enqueue_detection_module(
        &self,
        request: Request<ModuleRequest>,
    ) -> Result<Response<StatusReply>, Status> {
        let name = request.into_inner().name;
        let reply = self
            .blocking(move |o| {
                status_reply(o.enqueue(ModuleKind::Detection, &name), || format!("'{name}' enqueued"))
            })
            .await?;
        Ok(Response::new(reply))
    }

    async fn dequeue_detection_module(
        &self,
        request: Request<ModuleRequest>,
    ) -> Result<Response<StatusReply>, Status> {
        let name = request.into_inner().name;
        let reply = self
            .blocking(move |o| {
                status_reply(o.dequeue(ModuleKind::Detection, &name), || format!("'{name}' dequeued"))
            })
            .await?;
        Ok(Response::new(reply))
    }

    async fn run_single_detection_module(
        &self,
        request: Request<ModuleRequest>,
    ) -> Result<Response<RunReply>, Status> {
        let name = request.into_inner().name;
        let reply = self
            .blocking(move |o| match o.run_single_detection_module(&name) {
                Ok(output) => RunReply {
                    success: true,
                    output,
                    fault: Fault::Unspecified as i32,
                    message: String::new(),
                },
                Err(e) => RunReply {
                    success: false,
                    output: String::new(),
                    fault: fault_of(&e) as i32,
                    message: e.to_string(),
                },
            })
            .await?;
        Ok(Response::new(reply))
    }

    async fn stop_ids(&self, request: Request<StopRequest>) -> Result<Response<StatusReply>, Status> {
        let signal = request.into_inner().signal;
        if self.orchestrator.is_stopping() {
            return Ok(Response::new(StatusReply::failed(Fault::InvalidState, "already stopping")));
        }
        // stop() joins this listener, so it cannot run on one of its threads.
        let orchestrator = Arc::clone(&self.orchestrator);
        thread::Builder::new()
            .name("vmiids-stop".into())
            .spawn(move || orchestrator.stop(signal))
            .map_err(|e| Status::internal(format!("cannot spawn stop thread: {e}")))?;
        Ok(Response::new(StatusReply::ok("stopping")))
    }

    async fn load_shared_object(
        &self,
        request: Request<LoadRequest>,
    ) -> Result<Response<StatusReply>, Status> {
        let path = PathBuf::from(request.into_inner().path);
        let reply = self
            .blocking(move |o| match o.load_shared_object(&path) {
                Ok(info) => StatusReply::ok(format!(
                    "loaded {} (sha256 {}): {}",
                    info.path.display(),
                    info.sha256,
                    info.modules.join(", ")
                )),
                Err(e) => StatusReply::failed(load_fault(&e), e.to_string()),
            })
            .await?;
        Ok(Response::new(reply))
    }

    async fn list_modules(
        &self,
        _request: Request<ListModulesRequest>,
    ) -> Result<Response<ModuleListing>, Status> {
        let snapshot = self.blocking(|o| o.list_modules()).await?;
        Ok(Response::new(listing(snapshot)))
    }

    async fn vm_status(&self, _request: Request<VmStatusRequest>) -> Result<Response<VmStatusReply>, Status> {
        let reply = self
            .blocking(|o| match o.vm_is_running() {
                Ok(running) => VmStatusReply {
                    success: true,
                    running,
                    message: if running { "running".into() } else { "paused".into() },
                    fault: Fault::Unspecified as i32,
                },
                Err(e) => VmStatusReply {
                    success: false,
                    running: false,
                    message: e.to_string(),
                    fault: fault_of(&e) as i32,
                },
            })
            .await?;
        Ok(Response::new(reply))
    }
}

// ───── translation ──────────────────────────────────────────────────────────

fn status_reply(result: Result<(), OrchestratorError>, ok: impl FnOnce() -> String) -> StatusReply {
    match result {
        Ok(()) => StatusReply::ok(ok()),
        Err(e) => StatusReply::failed(fault_of(&e), e.to_string()),
    }
}

pub fn fault_of(error: &OrchestratorError) -> Fault {
    match error {
        OrchestratorError::UnknownModule { .. } => Fault::UnknownModule,
        OrchestratorError::AlreadyActive { .. } | OrchestratorError::NotActive { .. } => Fault::RegistryConflict,
        OrchestratorError::ModuleFault { source: ModuleError::Protocol(_), .. } => Fault::ProtocolAbort,
        OrchestratorError::ModuleFault { .. } => Fault::ModuleFault,
        OrchestratorError::Load(e) => load_fault(e),
        OrchestratorError::Protocol(_) => Fault::ProtocolAbort,
        OrchestratorError::MonitorUnavailable => Fault::MonitorUnavailable,
        OrchestratorError::AlreadyRunning
        | OrchestratorError::AlreadyStopped
        | OrchestratorError::Control { .. }
        | OrchestratorError::Spawn(_) => Fault::InvalidState,
    }
}

fn load_fault(error: &LoadError) -> Fault {
    match error {
        LoadError::NameCollision { .. } => Fault::RegistryConflict,
        _ => Fault::LoadFailed,
    }
}

fn listing(snapshot: ModuleSnapshot) -> ModuleListing {
    ModuleListing {
        modules: snapshot
            .modules
            .into_iter()
            .map(|m| ModuleEntry {
                kind: m.kind.to_string(),
                name: m.name,
                origin: m.origin.map(|o| o.to_string()).unwrap_or_else(|| "instance".into()),
                active: m.active,
            })
            .collect(),
        libraries: snapshot
            .libraries
            .into_iter()
            .map(|l| LibraryEntry {
                path: l.path.display().to_string(),
                sha256: l.sha256,
                modules: l.modules,
                loaded_at: Some(prost_types::Timestamp {
                    seconds: l.loaded_at.timestamp(),
                    nanos: l.loaded_at.timestamp_subsec_nanos() as i32,
                }),
            })
            .collect(),
        collecting: snapshot.collecting,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_and_lookup_faults_are_distinct() {
        let unknown = OrchestratorError::UnknownModule { kind: ModuleKind::Detection, name: "X".into() };
        let inactive = OrchestratorError::NotActive { kind: ModuleKind::Detection, name: "X".into() };
        assert_eq!(fault_of(&unknown), Fault::UnknownModule);
        assert_eq!(fault_of(&inactive), Fault::RegistryConflict);
        assert_eq!(fault_of(&OrchestratorError::MonitorUnavailable), Fault::MonitorUnavailable);
    }

    #[test]
    fn module_protocol_errors_surface_as_aborts() {
        let err = OrchestratorError::ModuleFault {
            name: "VmStatusDetectionModule".into(),
            source: ModuleError::Protocol(crate::monitor::ProtocolError::SessionDead("timeout".into())),
        };
        assert_eq!(fault_of(&err), Fault::ProtocolAbort);
    }
}
