//! # libbuffy-probe - Host Side of the Buffy Channel
//!
//! Reads and writes a libbuffy channel descriptor from outside the target,
//! through whatever memory access a debug probe provides.
//!
//! ## Quick Start
//!
//! ```no_run
//! use libbuffy_probe::{MemoryImage, Observer, ProbeConfig};
//!
//! # fn main() -> libbuffy_probe::Result<()> {
//! // A backend for a real probe implements `TargetMemory` instead
//! let memory = MemoryImage::new(0x2000_0000, std::fs::read("ram.bin")?);
//! let mut observer = Observer::attach(memory, 0x2000_0000, ProbeConfig::default())?;
//!
//! let mut buf = [0u8; 256];
//! let n = observer.read_outbound(&mut buf)?;
//! print!("{}", String::from_utf8_lossy(&buf[..n]));
//!
//! observer.write_inbound(b"reset\n")?;
//! observer.poll_overflow()?;
//! # Ok(())
//! # }
//! ```
//!
//! Locating the descriptor (scanning memory for the signature) is up to the
//! caller; `attach` takes its address.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod memory;
pub mod observer;

pub use config::ProbeConfig;
pub use error::{ProbeError, Result};
pub use memory::{AddressError, ImageError, LocalMemory, MemoryImage, TargetMemory};
pub use observer::Observer;
