//! Generates the control-plane gRPC server and client.
//!
//! The service is described with `tonic_build::manual` so the build does not
//! depend on a `protoc` binary; the message types are hand-written `prost`
//! structs in `src/control.rs`.

use tonic_build::manual::{Builder, Method, Service};

/// (method name, route name, request type, response type)
const METHODS: &[(&str, &str, &str, &str)] = &[
    ("enqueue_detection_module", "EnqueueDetectionModule", "ModuleRequest", "StatusReply"),
    ("dequeue_detection_module", "DequeueDetectionModule", "ModuleRequest", "StatusReply"),
    ("run_single_detection_module", "RunSingleDetectionModule", "ModuleRequest", "RunReply"),
    ("stop_ids", "StopIds", "StopRequest", "StatusReply"),
    ("load_shared_object", "LoadSharedObject", "LoadRequest", "StatusReply"),
    ("list_modules", "ListModules", "ListModulesRequest", "ModuleListing"),
    ("vm_status", "VmStatus", "VmStatusRequest", "VmStatusReply"),
];

fn main() {
    let service = METHODS
        .iter()
        .fold(
            Service::builder().name("Control").package("vmiids.control"),
            |builder, (name, route, input, output)| {
                builder.method(
                    Method::builder()
                        .name(name)
                        .route_name(route)
                        .input_type(format!("crate::control::{input}"))
                        .output_type(format!("crate::control::{output}"))
                        .codec_path("tonic::codec::ProstCodec")
                        .build(),
                )
            },
        )
        .build();

    Builder::new().compile(&[service]);

    println!("cargo:rerun-if-changed=build.rs");
}
