use prost::Message;
use vmiids_shared::control::{Fault, ModuleListing, ModuleEntry, RunReply, StatusReply};

#[test]
fn status_reply_carries_fault_code() {
    let reply = StatusReply::failed(Fault::UnknownModule, "no detection module 'X'");

    let decoded = StatusReply::decode(&*reply.encode_to_vec()).expect("decode failed");

    assert!(!decoded.success);
    assert_eq!(decoded.fault(), Fault::UnknownModule);
    assert_eq!(decoded.message, "no detection module 'X'");
}

#[test]
fn unknown_fault_values_fall_back_to_unspecified() {
    let reply = RunReply { success: false, output: String::new(), fault: 99, message: "?".into() };
    assert_eq!(reply.fault(), Fault::Unspecified);
}

#[test]
fn successful_reply_has_no_fault() {
    let reply = StatusReply::ok("enqueued");
    assert!(reply.success);
    assert_eq!(reply.fault(), Fault::Unspecified);
}

#[test]
fn listing_keeps_module_order() {
    let listing = ModuleListing {
        modules: vec![
            ModuleEntry { kind: "sensor".into(), name: "MemorySensorModule".into(), origin: "builtin".into(), active: true },
            ModuleEntry { kind: "detection".into(), name: "ProcessCensus".into(), origin: "/opt/libcensus.so".into(), active: false },
        ],
        libraries: vec![],
        collecting: true,
    };

    let decoded = ModuleListing::decode(&*listing.encode_to_vec()).expect("decode failed");

    assert_eq!(decoded.modules[0].name, "MemorySensorModule");
    assert_eq!(decoded.modules[1].origin, "/opt/libcensus.so");
    assert!(!decoded.modules[1].active);
    assert!(decoded.collecting);
}

#[test]
fn fault_names_are_stable() {
    assert_eq!(Fault::ProtocolAbort.to_string(), "protocol-abort");
    assert_eq!(Fault::LoadFailed.as_str(), "load-failed");
}
