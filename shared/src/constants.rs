// src/constants.rs

use std::time::Duration;

/// Address the daemon's control plane listens on unless configured otherwise.
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:50551";
/// Serial device wired to the QEMU monitor inside the IDS VM.
pub const DEFAULT_MONITOR_DEVICE: &str = "/dev/ttyS1";
/// Prompt printed by the QEMU human monitor when it is ready for input.
pub const MONITOR_PROMPT: &str = "(qemu)";
/// Upper bound for a single control-plane call issued by the client stub.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);
