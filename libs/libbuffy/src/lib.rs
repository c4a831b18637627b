//! # libbuffy - Shared-Memory Debug Channel
//!
//! A pair of byte rings in plain memory that firmware writes and reads while
//! a debug probe, with no way to synchronize with the CPU, reads and writes
//! the same memory from outside. No interrupts, no locks, no allocation.
//!
//! ## Features
//!
//! - **Self-describing descriptor** - a probe finds it by signature and reads
//!   its geometry from fixed offsets ([`layout`])
//! - **Three layouts** - [`InlineChannel`] (buffers inline),
//!   [`CountedInlineChannel`] (buffers inline after an overflow counter) and
//!   [`Channel`] (buffers by address, overflow counter, init flag)
//! - **Non-blocking transfers** - every call moves what fits and returns the
//!   count
//! - **Corruption guard** - an out-of-range index resets the ring instead of
//!   touching memory outside it
//! - **Compile-time sizing** - capacities are const generics checked to be
//!   powers of two, defaults from `BUFFY_TX_BUF_SIZE` / `BUFFY_RX_BUF_SIZE`
//!
//! ## Quick Start
//!
//! ```no_run
//! use libbuffy::InlineChannel;
//!
//! static CHANNEL: InlineChannel<512, 64> = InlineChannel::new();
//!
//! let (mut tx, mut rx) = CHANNEL.split().unwrap();
//! tx.write(b"hello from the target\n");
//!
//! let mut cmd = [0u8; 16];
//! let n = rx.read(&mut cmd);
//! ```
//!
//! ## Memory Ordering
//!
//! Each side copies bytes, issues a full fence, then publishes the index
//! advance, and fences again. Indices are `AtomicU32` so that a 32-bit probe
//! write is never torn.
//!
//! ## Feature Flags
//!
//! - `trace` - per-pass `log::trace!` output from the transfer loop
//! - `serde` - serialization for the layout description types

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod channel;
pub mod config;
pub mod inline;
pub mod layout;
pub mod ring;
pub mod shared;
pub mod storage;

pub use channel::Channel;
pub use config::{DefaultInlineChannel, InboundStorage, OutboundStorage};
pub use inline::{CountedInlineChannel, InlineChannel};
pub use layout::{
    Direction, Encoding, Endianness, InlineVariant, Layout, LayoutError, LayoutFeatures,
    PointerWidth, Revision, RingLayout,
};
pub use ring::RingPort;
pub use shared::{Inbound, Outbound, RingIndices};
pub use storage::RingStorage;

/// Prelude for firmware code
pub mod prelude {
    pub use crate::channel::Channel;
    pub use crate::inline::{CountedInlineChannel, InlineChannel};
    pub use crate::shared::{Inbound, Outbound};
    pub use crate::storage::RingStorage;
}
