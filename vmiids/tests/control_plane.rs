//! End-to-end control plane: orchestrator listener + blocking client stub.

mod common;

use std::{
    net::SocketAddr,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel;
use shared::{ControlClient, Fault};
use vmiids::{
    control::DRAIN_GRACE,
    orchestrator::{Orchestrator, OrchestratorSettings},
};

fn started() -> (Arc<Orchestrator>, ControlClient) {
    let orch = Orchestrator::new(
        OrchestratorSettings {
            interval: Duration::from_millis(20),
            control_listen: Some(SocketAddr::from(([127, 0, 0, 1], 0))),
            ..Default::default()
        },
        None,
    )
    .unwrap();
    orch.start().unwrap();
    let addr = orch.control_addr().expect("listener bound");
    let client = ControlClient::connect_with_timeout(&addr.to_string(), Duration::from_secs(5)).unwrap();
    (orch, client)
}

fn shutdown(orch: &Arc<Orchestrator>) {
    let orch = Arc::clone(orch);
    let (tx, rx) = channel::bounded(1);
    thread::spawn(move || {
        orch.stop(0);
        let _ = tx.send(());
    });
    rx.recv_timeout(Duration::from_secs(10)).expect("orchestrator stopped");
}

#[test]
fn dequeue_of_an_unknown_module_is_a_well_formed_failure() {
    let (orch, mut client) = started();

    let reply = client.dequeue_detection_module("X").unwrap();
    assert!(!reply.success);
    assert_eq!(reply.fault, Fault::UnknownModule as i32);
    assert!(reply.message.contains("'X'"), "{}", reply.message);

    shutdown(&orch);
}

#[test]
fn module_management_round_trip() {
    let (orch, mut client) = started();

    let reply = client.enqueue_detection_module("VmStatusDetectionModule").unwrap();
    assert!(reply.success, "{}", reply.message);
    let reply = client.enqueue_detection_module("VmStatusDetectionModule").unwrap();
    assert_eq!(reply.fault, Fault::RegistryConflict as i32);

    // No monitor configured: the module itself fails.
    let run = client.run_single_detection_module("VmStatusDetectionModule").unwrap();
    assert!(!run.success);
    assert_eq!(run.fault, Fault::ModuleFault as i32);

    let status = client.vm_status().unwrap();
    assert!(!status.success);
    assert_eq!(status.fault, Fault::MonitorUnavailable as i32);

    let listing = client.list_modules().unwrap();
    assert!(listing.collecting);
    let entry = listing
        .modules
        .iter()
        .find(|m| m.name == "VmStatusDetectionModule")
        .expect("listed");
    assert!(entry.active);
    assert_eq!(entry.kind, "detection");
    assert_eq!(entry.origin, "builtin");

    let load = client.load_shared_object("/nonexistent/libnothing.so").unwrap();
    assert!(!load.success);
    assert_eq!(load.fault, Fault::LoadFailed as i32);

    let reply = client.dequeue_detection_module("VmStatusDetectionModule").unwrap();
    assert!(reply.success);

    shutdown(&orch);
}

#[test]
fn stop_ids_stops_the_daemon() {
    let (orch, mut client) = started();

    let reply = client.stop_ids(15).unwrap();
    assert!(reply.success, "{}", reply.message);

    let (tx, rx) = channel::bounded(1);
    let waiter = Arc::clone(&orch);
    thread::spawn(move || {
        waiter.wait();
        let _ = tx.send(());
    });
    rx.recv_timeout(Duration::from_secs(10)).expect("wait() returned");
    assert!(!orch.is_started());

    let err = client.dequeue_detection_module("X").unwrap_err();
    assert!(err.is_transport(), "{err}");
}

#[test]
fn stop_does_not_wait_for_idle_clients() {
    let (orch, mut client) = started();
    let listing = client.list_modules().unwrap();
    assert!(listing.collecting);

    // `client` stays connected and idle while the daemon stops.
    let began = Instant::now();
    shutdown(&orch);
    assert!(began.elapsed() < DRAIN_GRACE * 3, "stop took {:?}", began.elapsed());
    assert!(!orch.is_started());

    let err = client.list_modules().unwrap_err();
    assert!(err.is_transport(), "{err}");
}
