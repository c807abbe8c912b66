use std::process::Command;

/// Record the compiler version so plugins built against a different
/// toolchain are refused at load time.
fn main() {
    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".into());
    let version = Command::new(rustc)
        .arg("--version")
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|v| v.trim().to_owned())
        .unwrap_or_else(|| "unknown".into());

    println!("cargo:rustc-env=VMIIDS_RUSTC_VERSION={version}");
    println!("cargo:rerun-if-changed=build.rs");
}
