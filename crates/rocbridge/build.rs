fn main() {
    // Foreign libraries resolve roc_alloc, roc_panic and friends against the executable,
    // so the binary has to export its symbols dynamically.
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    match target_os.as_str() {
        "macos" | "ios" => println!("cargo::rustc-link-arg-bins=-Wl,-export_dynamic"),
        "windows" => {}
        _ => println!("cargo::rustc-link-arg-bins=-rdynamic"),
    }
    println!("cargo::rerun-if-changed=build.rs");
}
