//! Configuration for the observer
//!
//! ```toml
//! endianness = "little"
//! pointer_width = "32"
//! max_capacity_exponent = 16
//! poll_interval_ms = 10
//! inline_variant = "plain"
//! ```
//!
//! Both revision 1 forms carry the same signature, so `inline_variant`
//! names the one the target was built with.

use std::path::Path;
use std::time::Duration;

use libbuffy::{Encoding, Endianness, InlineVariant, PointerWidth};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Observer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Target byte order
    #[serde(default)]
    pub endianness: Endianness,

    /// Target address width, for the buffer address fields
    #[serde(default)]
    pub pointer_width: PointerWidth,

    /// Largest capacity exponent accepted when decoding a header
    #[serde(default = "default_max_capacity_exponent")]
    pub max_capacity_exponent: u32,

    /// Delay between polls for callers that loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Which revision 1 form to decode: with or without the overflow counter
    #[serde(default)]
    pub inline_variant: InlineVariant,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            endianness: Endianness::default(),
            pointer_width: PointerWidth::default(),
            max_capacity_exponent: default_max_capacity_exponent(),
            poll_interval_ms: default_poll_interval_ms(),
            inline_variant: InlineVariant::default(),
        }
    }
}

impl ProbeConfig {
    /// Configuration matching the host, for observing descriptors in-process
    pub fn native() -> Self {
        let encoding = Encoding::NATIVE;
        Self {
            endianness: encoding.endianness,
            pointer_width: encoding.pointer_width,
            ..Self::default()
        }
    }

    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), ?config, "Loaded probe config");
        Ok(config)
    }

    /// Word encoding to decode headers with
    pub fn encoding(&self) -> Encoding {
        Encoding {
            endianness: self.endianness,
            pointer_width: self.pointer_width,
        }
    }

    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_max_capacity_exponent() -> u32 {
    libbuffy::storage::MAX_CAPACITY_EXPONENT
}

fn default_poll_interval_ms() -> u64 {
    10
}
