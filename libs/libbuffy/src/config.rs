//! Build-time ring sizes
//!
//! Generated by `build.rs` from `BUFFY_TX_BUF_SIZE` and `BUFFY_RX_BUF_SIZE`
//! (512 and 64 bytes when unset).

use crate::inline::InlineChannel;
use crate::storage::RingStorage;

include!(concat!(env!("OUT_DIR"), "/capacity.rs"));

/// Outbound storage at the configured size
pub type OutboundStorage = RingStorage<OUTBOUND_CAPACITY>;

/// Inbound storage at the configured size
pub type InboundStorage = RingStorage<INBOUND_CAPACITY>;

/// Inline channel at the configured sizes
pub type DefaultInlineChannel = InlineChannel<OUTBOUND_CAPACITY, INBOUND_CAPACITY>;
