//! Build script for tether-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version (1.77, for `offset_of!`)
//! - Platform support (process control is Linux-only)

fn main()
{
    // offset_of! on struct fields was stabilized in Rust 1.77
    match rustc_version::version() {
        Ok(rustc_version) => {
            let min_rust_version = rustc_version::Version::new(1, 77, 0);
            if rustc_version < min_rust_version {
                panic!("tether-core requires Rust {min_rust_version} or newer, found {rustc_version}");
            }
        }
        // If we can't get version (e.g., in some build environments), just warn
        Err(_) => println!("cargo:warning=could not verify Rust version"),
    }

    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("linux") {
        println!("cargo:warning=tether-core only implements process control on Linux; launch and attach will fail");
    }
}
