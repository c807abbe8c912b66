//! Types shared between the `vmiids` daemon and its administrative clients:
//! control-plane messages, the generated gRPC service and a blocking client.

pub mod client;
pub mod constants;
pub mod control;

pub use client::{ClientError, ControlClient};
pub use control::Fault;
