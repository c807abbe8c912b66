//! Blocking control-plane client.
//!
//! Administrative tools are plain synchronous programs, so the stub owns a
//! small current-thread Tokio runtime and blocks on every call until the
//! daemon replies or the per-call timeout expires.
//!
//! A reply with `success == false` is a well-formed answer from the daemon and
//! is returned as `Ok`. Only failures to reach the daemon end up in
//! [`ClientError`].

use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tonic::{Code, Request, transport::{Channel, Endpoint}};

use crate::constants::DEFAULT_RPC_TIMEOUT;
use crate::control::{
    control_client, ListModulesRequest, LoadRequest, ModuleListing, ModuleRequest, RunReply,
    StatusReply, StopRequest, VmStatusReply, VmStatusRequest,
};

/// Ways a control-plane call can fail before the daemon answered.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid control-plane address '{0}'")]
    InvalidAddress(String),

    #[error("cannot start client runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("cannot reach vmiids at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    Transport(String),

    /// The daemon answered with a gRPC status instead of a reply.
    #[error("server error ({code:?}): {message}")]
    Status { code: Code, message: String },
}

impl ClientError {
    /// `true` when the daemon could not be reached at all.
    pub fn is_transport(&self) -> bool {
        !matches!(self, ClientError::Status { .. } | ClientError::InvalidAddress(_))
    }

    fn from_status(status: tonic::Status, timeout: Duration) -> Self {
        match status.code() {
            Code::DeadlineExceeded | Code::Cancelled => ClientError::Timeout(timeout),
            Code::Unavailable => ClientError::Transport(status.message().to_owned()),
            code => ClientError::Status { code, message: status.message().to_owned() },
        }
    }
}

/// Synchronous stub for the daemon's control plane.
pub struct ControlClient {
    rt: Runtime,
    inner: control_client::ControlClient<Channel>,
    timeout: Duration,
}

impl ControlClient {
    /// Connect to `addr` (`host:port` or a full `http://` URI) with the
    /// default timeout.
    pub fn connect(addr: &str) -> Result<Self, ClientError> {
        Self::connect_with_timeout(addr, DEFAULT_RPC_TIMEOUT)
    }

    pub fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self, ClientError> {
        let uri = if addr.contains("://") { addr.to_owned() } else { format!("http://{addr}") };
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|_| ClientError::InvalidAddress(addr.to_owned()))?
            .connect_timeout(timeout)
            .timeout(timeout);

        let rt = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ClientError::Runtime)?;

        let channel = rt
            .block_on(async { tokio::time::timeout(timeout, endpoint.connect()).await })
            .map_err(|_| ClientError::Timeout(timeout))?
            .map_err(|source| ClientError::Connect { addr: addr.to_owned(), source })?;

        log::debug!("connected to control plane at {addr}");
        Ok(Self { rt, inner: control_client::ControlClient::new(channel), timeout })
    }

    pub fn enqueue_detection_module(&mut self, name: &str) -> Result<StatusReply, ClientError> {
        let req = ModuleRequest { name: name.to_owned() };
        let Self { rt, inner, timeout } = self;
        block(rt, *timeout, inner.enqueue_detection_module(Request::new(req)))
    }

    pub fn dequeue_detection_module(&mut self, name: &str) -> Result<StatusReply, ClientError> {
        let req = ModuleRequest { name: name.to_owned() };
        let Self { rt, inner, timeout } = self;
        block(rt, *timeout, inner.dequeue_detection_module(Request::new(req)))
    }

    pub fn run_single_detection_module(&mut self, name: &str) -> Result<RunReply, ClientError> {
        let req = ModuleRequest { name: name.to_owned() };
        let Self { rt, inner, timeout } = self;
        block(rt, *timeout, inner.run_single_detection_module(Request::new(req)))
    }

    pub fn stop_ids(&mut self, signal: i32) -> Result<StatusReply, ClientError> {
        let Self { rt, inner, timeout } = self;
        block(rt, *timeout, inner.stop_ids(Request::new(StopRequest { signal })))
    }

    pub fn load_shared_object(&mut self, path: &str) -> Result<StatusReply, ClientError> {
        let req = LoadRequest { path: path.to_owned() };
        let Self { rt, inner, timeout } = self;
        block(rt, *timeout, inner.load_shared_object(Request::new(req)))
    }

    pub fn list_modules(&mut self) -> Result<ModuleListing, ClientError> {
        let Self { rt, inner, timeout } = self;
        block(rt, *timeout, inner.list_modules(Request::new(ListModulesRequest {})))
    }

    pub fn vm_status(&mut self) -> Result<VmStatusReply, ClientError> {
        let Self { rt, inner, timeout } = self;
        block(rt, *timeout, inner.vm_status(Request::new(VmStatusRequest {})))
    }
}

/// Drive one unary call to completion on the stub's runtime.
fn block<T, F>(rt: &Runtime, timeout: Duration, call: F) -> Result<T, ClientError>
where
    F: std::future::Future<Output = Result<tonic::Response<T>, tonic::Status>>,
{
    match rt.block_on(async { tokio::time::timeout(timeout, call).await }) {
        Ok(Ok(resp)) => Ok(resp.into_inner()),
        Ok(Err(status)) => Err(ClientError::from_status(status, timeout)),
        Err(_) => Err(ClientError::Timeout(timeout)),
    }
}
