// tests/control_grpc.rs
//
// Integration tests for the generated control-plane service.
//
// A dummy server answers every call from a fixed module table; the tests drive
// it once through the async generated client and once through the blocking
// `ControlClient` stub that `vmiids-ctl` uses.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{transport::Server, Request, Response, Status};
use vmiids_shared::control::{
    control_client::ControlClient as AsyncClient,
    control_server::{Control, ControlServer},
    Fault, ListModulesRequest, LoadRequest, ModuleListing, ModuleRequest, RunReply, StatusReply,
    StopRequest, VmStatusReply, VmStatusRequest,
};
use vmiids_shared::{ClientError, ControlClient};

const KNOWN: &str = "VmStatusDetectionModule";

#[derive(Default)]
pub struct DummyControl;

#[tonic::async_trait]
impl Control for DummyControl {
    async fn enqueue_detection_module(
        &self,
        request: Request<ModuleRequest>,
    ) -> Result<Response<StatusReply>, Status> {
        let name = request.into_inner().name;
        Ok(Response::new(if name == KNOWN {
            StatusReply::ok("enqueued")
        } else {
            StatusReply::failed(Fault::UnknownModule, format!("unknown module {name}"))
        }))
    }

    async fn dequeue_detection_module(
        &self,
        request: Request<ModuleRequest>,
    ) -> Result<Response<StatusReply>, Status> {
        self.enqueue_detection_module(request).await
    }

    async fn run_single_detection_module(
        &self,
        request: Request<ModuleRequest>,
    ) -> Result<Response<RunReply>, Status> {
        let name = request.into_inner().name;
        Ok(Response::new(RunReply {
            success: name == KNOWN,
            output: if name == KNOWN { "VM running".into() } else { String::new() },
            fault: if name == KNOWN { Fault::Unspecified as i32 } else { Fault::UnknownModule as i32 },
            message: String::new(),
        }))
    }

    async fn stop_ids(&self, request: Request<StopRequest>) -> Result<Response<StatusReply>, Status> {
        Ok(Response::new(StatusReply::ok(format!("stopping on signal {}", request.into_inner().signal))))
    }

    async fn load_shared_object(
        &self,
        request: Request<LoadRequest>,
    ) -> Result<Response<StatusReply>, Status> {
        let path = request.into_inner().path;
        Ok(Response::new(StatusReply::failed(Fault::LoadFailed, format!("cannot open {path}"))))
    }

    async fn list_modules(
        &self,
        _request: Request<ListModulesRequest>,
    ) -> Result<Response<ModuleListing>, Status> {
        Ok(Response::new(ModuleListing::default()))
    }

    async fn vm_status(
        &self,
        _request: Request<VmStatusRequest>,
    ) -> Result<Response<VmStatusReply>, Status> {
        Err(Status::internal("monitor wedged"))
    }
}

static SERVER: OnceCell<SocketAddr> = OnceCell::const_new();

/// Start the dummy server once, on a thread with its own runtime so the
/// blocking stub can be used from plain `#[test]` functions too.
async fn server_addr() -> SocketAddr {
    *SERVER
        .get_or_init(|| async {
            let (tx, rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let rt = tokio::runtime::Runtime::new().expect("runtime");
                rt.block_on(async move {
                    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
                    tx.send(listener.local_addr().expect("addr")).expect("send addr");
                    Server::builder()
                        .add_service(ControlServer::new(DummyControl))
                        .serve_with_incoming(TcpListenerStream::new(listener))
                        .await
                        .expect("serve");
                });
            });
            rx.recv().expect("server address")
        })
        .await
}

#[tokio::test]
async fn async_client_gets_well_formed_failure_for_unknown_module() {
    let addr = server_addr().await;
    let mut client = AsyncClient::connect(format!("http://{addr}")).await.expect("connect failed");

    let reply = client
        .dequeue_detection_module(ModuleRequest { name: "X".into() })
        .await
        .expect("grpc call failed")
        .into_inner();

    assert!(!reply.success);
    assert_eq!(reply.fault(), Fault::UnknownModule);
}

#[test]
fn blocking_client_round_trips() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let addr = rt.block_on(server_addr());

    let mut client = ControlClient::connect(&addr.to_string()).expect("connect failed");

    assert!(client.enqueue_detection_module(KNOWN).unwrap().success);

    let run = client.run_single_detection_module(KNOWN).unwrap();
    assert!(run.success);
    assert_eq!(run.output, "VM running");

    let load = client.load_shared_object("/nonexistent/libfoo.so").unwrap();
    assert!(!load.success);
    assert_eq!(load.fault(), Fault::LoadFailed);

    match client.vm_status() {
        Err(ClientError::Status { message, .. }) => assert_eq!(message, "monitor wedged"),
        other => panic!("expected a server status, got {other:?}"),
    }
}

#[test]
fn unreachable_server_is_a_transport_fault() {
    // Bind and immediately drop a listener to get a port nobody serves.
    let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();

    let err = ControlClient::connect_with_timeout(&format!("127.0.0.1:{port}"), Duration::from_secs(2))
        .err()
        .expect("connect should fail");

    assert!(err.is_transport(), "unexpected error: {err}");
}
