// build.rs
use std::env;

fn main() {
    println!("cargo:rerun-if-changed=src/arch/linkage.S");
    println!("cargo:rerun-if-changed=linker.ld");

    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    // host builds (unit tests) have no boot glue
    if arch != "x86" || os != "none" {
        return;
    }

    println!("cargo:rustc-link-arg-bins=-Tlinker.ld");
    // multiboot header, interrupt entry stubs and the ring-transfer routines
    cc::Build::new()
        .file("src/arch/linkage.S")
        .flag("-m32")
        .compile("linkage");
}
