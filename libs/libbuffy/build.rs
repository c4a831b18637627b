//! Build script for libbuffy
//!
//! Resolves the default ring capacities from the build environment and
//! validates them before they reach the compiler. Firmware images pick their
//! sizes the same way the C headers of older targets did:
//!
//! ```text
//! BUFFY_TX_BUF_SIZE=1024 BUFFY_RX_BUF_SIZE=128 cargo build ...
//! ```

use std::env;
use std::fs;
use std::path::Path;

/// Default outbound (target -> host) ring size in bytes
const DEFAULT_TX_BUF_SIZE: usize = 512;

/// Default inbound (host -> target) ring size in bytes
const DEFAULT_RX_BUF_SIZE: usize = 64;

/// Largest ring the host tooling accepts (2^16)
const MAX_BUF_SIZE: usize = 1 << 16;

fn main() {
    println!("cargo:rerun-if-env-changed=BUFFY_TX_BUF_SIZE");
    println!("cargo:rerun-if-env-changed=BUFFY_RX_BUF_SIZE");

    let tx = resolve("BUFFY_TX_BUF_SIZE", DEFAULT_TX_BUF_SIZE);
    let rx = resolve("BUFFY_RX_BUF_SIZE", DEFAULT_RX_BUF_SIZE);

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set by cargo");
    let dest = Path::new(&out_dir).join("capacity.rs");

    let generated = format!(
        "/// Outbound (target -> host) ring size in bytes, from `BUFFY_TX_BUF_SIZE`\n\
         pub const OUTBOUND_CAPACITY: usize = {tx};\n\n\
         /// Inbound (host -> target) ring size in bytes, from `BUFFY_RX_BUF_SIZE`\n\
         pub const INBOUND_CAPACITY: usize = {rx};\n"
    );

    fs::write(&dest, generated).expect("Failed to write capacity.rs");
}

/// Read a buffer size from the environment, falling back to `default`
fn resolve(var: &str, default: usize) -> usize {
    let value = match env::var(var) {
        Ok(raw) => parse_size(raw.trim())
            .unwrap_or_else(|| panic!("{var}={raw:?} is not a valid buffer size")),
        Err(_) => return default,
    };

    if let Err(reason) = validate(value) {
        println!("cargo:warning===========================================");
        println!("cargo:warning=INVALID BUFFY BUFFER SIZE");
        println!("cargo:warning=  {var}={value}: {reason}");
        println!("cargo:warning===========================================");
        panic!("{var}={value}: {reason}");
    }

    if value != default {
        println!("cargo:warning={var} overridden: {value} bytes (default {default})");
    }

    value
}

/// Parse decimal or `0x`-prefixed hexadecimal sizes
fn parse_size(raw: &str) -> Option<usize> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn validate(size: usize) -> Result<(), &'static str> {
    if !size.is_power_of_two() {
        return Err("must be a power of two");
    }
    if size < 2 {
        return Err("must hold at least one usable byte (size >= 2)");
    }
    if size > MAX_BUF_SIZE {
        return Err("must not exceed 65536 bytes");
    }
    Ok(())
}
