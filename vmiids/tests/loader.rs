//! All-or-nothing registration and library loading failures.

mod common;

use std::{path::Path, sync::Arc};

use common::{Counting, Failing, TestSensor, Recorder};
use parking_lot::Mutex;
use vmiids::{
    ModuleContext, ModuleDescriptor, ModuleError, ModuleKind,
    modules::{LoadError, ModuleLoader, Origin},
};

fn counting(name: &'static str) -> ModuleDescriptor {
    ModuleDescriptor::detection(name, move |_| Ok(Counting { name: name.into(), runs: Default::default() }))
}

fn recorder(name: &'static str) -> ModuleDescriptor {
    ModuleDescriptor::notification(name, move |_| Ok(Recorder { name: name.into(), notes: Default::default() }))
}

fn library(name: &str) -> Origin {
    Origin::Library(Path::new("/usr/lib/vmiids").join(name))
}

fn nothing_active(ctx: &ModuleContext) -> bool {
    ModuleKind::ALL.iter().all(|kind| ctx.registries().names(*kind).is_empty())
}

#[test]
fn batch_registers_every_kind() {
    let loader = ModuleLoader::new();
    let ctx = ModuleContext::detached();

    let activated = loader
        .register(
            library("libcensus.so"),
            vec![
                counting("CensusDetection"),
                recorder("MailNotification"),
                ModuleDescriptor::sensor("TapSensor", |_| Ok(TestSensor { name: "TapSensor".into(), fail_init: false })),
            ],
            &ctx,
        )
        .unwrap();

    // Construction order: notification, sensor, detection.
    let kinds: Vec<_> = activated.iter().map(|(k, _)| *k).collect();
    assert_eq!(kinds, ModuleKind::ALL);
    assert!(ctx.notification("MailNotification").is_some());
    assert!(ctx.sensor("TapSensor").is_some());
    assert!(ctx.registries().detections.contains("CensusDetection"));

    let items = loader.catalog_items();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| i.origin == library("libcensus.so")));
}

#[test]
fn duplicate_names_within_a_library_register_nothing() {
    let loader = ModuleLoader::new();
    let ctx = ModuleContext::detached();

    let err = loader
        .register(library("libdup.so"), vec![recorder("Mail"), counting("Twice"), counting("Twice")], &ctx)
        .unwrap_err();

    assert!(matches!(err, LoadError::NameCollision { kind: ModuleKind::Detection, ref name } if name == "Twice"));
    assert!(nothing_active(&ctx));
    assert!(loader.catalog_items().is_empty());
}

#[test]
fn same_name_in_different_kinds_is_allowed() {
    let loader = ModuleLoader::new();
    let ctx = ModuleContext::detached();
    loader
        .register(library("libshared.so"), vec![counting("Census"), recorder("Census")], &ctx)
        .unwrap();
    assert_eq!(loader.kinds_of("Census"), [ModuleKind::Notification, ModuleKind::Detection]);
}

#[test]
fn collision_with_a_known_module_rolls_back() {
    let loader = ModuleLoader::new();
    let ctx = ModuleContext::detached();
    loader.register(library("liba.so"), vec![counting("RootkitCheck")], &ctx).unwrap();

    let err = loader
        .register(library("libb.so"), vec![recorder("Mail"), counting("Fresh"), counting("RootkitCheck")], &ctx)
        .unwrap_err();

    assert!(matches!(err, LoadError::NameCollision { ref name, .. } if name == "RootkitCheck"));
    assert!(ctx.notification("Mail").is_none());
    assert!(!ctx.registries().detections.contains("Fresh"));
    assert_eq!(ctx.registries().detections.names(), ["RootkitCheck"]);
    assert!(!loader.is_known(ModuleKind::Detection, "Fresh"));
}

#[test]
fn collision_with_a_directly_enqueued_instance_is_detected() {
    let loader = ModuleLoader::new();
    let ctx = ModuleContext::detached();
    let (direct, _) = Counting::new("Direct");
    ctx.registries().detections.insert("Direct", direct as Arc<dyn vmiids::DetectionModule>);

    let err = loader.register(library("libc.so"), vec![counting("Direct")], &ctx).unwrap_err();
    assert!(matches!(err, LoadError::NameCollision { .. }));
}

#[test]
fn factory_failure_activates_nothing() {
    let loader = ModuleLoader::new();
    let ctx = ModuleContext::detached();

    let err = loader
        .register(
            library("libbroken.so"),
            vec![
                recorder("Mail"),
                counting("Good"),
                ModuleDescriptor::detection("Broken", |_| -> Result<Failing, ModuleError> {
                    Err(ModuleError::MissingOption { module: "Broken".into(), option: "threshold".into() })
                }),
            ],
            &ctx,
        )
        .unwrap_err();

    assert!(matches!(err, LoadError::Factory { ref name, .. } if name == "Broken"));
    assert!(nothing_active(&ctx));
    assert!(loader.catalog_items().is_empty());
}

#[test]
fn batch_under_construction_is_not_live() {
    let loader = ModuleLoader::new();
    let ctx = ModuleContext::detached();
    // (staged lookup, live detections snapshot, live notification lookup)
    let seen: Arc<Mutex<Option<(bool, usize, bool)>>> = Arc::default();

    let observed = Arc::clone(&seen);
    let err = loader
        .register(
            library("libhalf.so"),
            vec![
                recorder("Mail"),
                counting("Good"),
                ModuleDescriptor::detection("Zbroken", move |ctx| -> Result<Failing, ModuleError> {
                    *observed.lock() = Some((
                        ctx.notification("Mail").is_some(),
                        ctx.registries().detections.snapshot().len(),
                        ctx.registries().notifications.lookup("Mail").is_some(),
                    ));
                    Err(ModuleError::Failed("no configuration".into()))
                }),
            ],
            &ctx,
        )
        .unwrap_err();

    assert!(matches!(err, LoadError::Factory { ref name, .. } if name == "Zbroken"));
    assert_eq!(*seen.lock(), Some((true, 0, false)));
    assert!(nothing_active(&ctx));
}

#[test]
fn sensor_initialisation_failure_is_a_factory_failure() {
    let loader = ModuleLoader::new();
    let ctx = ModuleContext::detached();

    let err = loader
        .register(
            Origin::Builtin,
            vec![ModuleDescriptor::sensor("DeadTap", |_| Ok(TestSensor { name: "DeadTap".into(), fail_init: true }))],
            &ctx,
        )
        .unwrap_err();
    assert!(matches!(err, LoadError::Factory { source: ModuleError::Failed(_), .. }));
    assert!(nothing_active(&ctx));
}

#[test]
fn catalogued_modules_are_instantiated_on_demand() {
    let loader = ModuleLoader::new();
    let ctx = ModuleContext::detached();
    loader.catalog(Origin::Builtin, vec![counting("Later")]).unwrap();

    assert!(nothing_active(&ctx));
    let instance = loader.instantiate(ModuleKind::Detection, "Later", &ctx).unwrap().unwrap();
    assert_eq!(instance.name(), "Later");
    assert!(loader.instantiate(ModuleKind::Sensor, "Later", &ctx).is_none());

    let err = loader.catalog(Origin::Builtin, vec![counting("Later")]).unwrap_err();
    assert!(matches!(err, LoadError::NameCollision { .. }));
}

#[test]
fn missing_library_is_a_load_error() {
    let loader = ModuleLoader::new();
    let ctx = ModuleContext::detached();
    let err = loader.load(Path::new("/nonexistent/libnothing.so"), &ctx).unwrap_err();
    assert!(matches!(err, LoadError::Library { .. }), "{err}");
    assert!(loader.libraries().is_empty());
}

#[test]
fn garbage_file_is_not_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("libgarbage.so");
    std::fs::write(&path, b"this is not an ELF object").unwrap();

    let loader = ModuleLoader::new();
    let ctx = ModuleContext::detached();
    let err = loader.load(&path, &ctx).unwrap_err();
    assert!(matches!(err, LoadError::Library { .. }), "{err}");
    assert!(nothing_active(&ctx));
}
