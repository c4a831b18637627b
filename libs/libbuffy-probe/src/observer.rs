//! The probe side of a channel
//!
//! [`Observer`] attaches to a descriptor at a known base address, decodes
//! its revision, and then runs the same ring engine as the firmware with the
//! roles swapped: it owns the outbound `tail` and the inbound `head`. Unlike
//! the firmware it never repairs an out-of-range index, since the other
//! index belongs to the target; it reports the fault and leaves both alone.

use std::sync::atomic::{fence, Ordering};

use libbuffy::layout::{Layout, RingLayout, PROBE_LEN};
use libbuffy::ring::{self, RingPort};
use libbuffy::{Direction, Encoding, LayoutError, Revision};
use tracing::{debug, trace, warn};

use crate::config::ProbeConfig;
use crate::error::{ProbeError, Result};
use crate::memory::TargetMemory;

/// Observer attached to one channel descriptor
#[derive(Debug)]
pub struct Observer<M> {
    memory: M,
    config: ProbeConfig,
    layout: Layout,
    last_overflow: u32,
}

impl<M: TargetMemory> Observer<M> {
    /// Attach to the descriptor at `base`
    ///
    /// Reads the signature, selects the revision, reads and decodes the full
    /// header. Fails if the descriptor is unknown, inconsistent or not yet
    /// initialized.
    pub fn attach(mut memory: M, base: u64, config: ProbeConfig) -> Result<Self> {
        let layout = read_layout(&mut memory, base, &config)?;
        debug!(
            base = format_args!("{base:#x}"),
            revision = ?layout.revision,
            features = ?layout.features(),
            outbound = layout.outbound.capacity(),
            inbound = layout.inbound.capacity(),
            "Attached to channel"
        );

        let mut observer = Self {
            memory,
            config,
            layout,
            last_overflow: 0,
        };
        observer.last_overflow = observer.overflow_count()?.unwrap_or(0);
        Ok(observer)
    }

    /// Re-read the header, e.g. after the target was reset
    pub fn refresh(&mut self) -> Result<()> {
        let layout = read_layout(&mut self.memory, self.layout.base, &self.config)?;
        if layout != self.layout {
            debug!(revision = ?layout.revision, "Channel layout changed");
        }
        self.layout = layout;
        self.last_overflow = self.overflow_count()?.unwrap_or(0);
        Ok(())
    }

    /// Decoded descriptor
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Descriptor revision
    pub fn revision(&self) -> Revision {
        self.layout.revision
    }

    /// Active configuration
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Drain bytes the target has written
    ///
    /// Returns the count read, 0 if the ring is empty.
    pub fn read_outbound(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut port = self.port(Direction::Outbound);
        let count = ring::consume(&mut port, buf)?;
        if count > 0 {
            trace!(count, "Read outbound bytes");
        }
        Ok(count)
    }

    /// Queue bytes for the target
    ///
    /// Returns the count written; less than `bytes.len()` when the ring
    /// filled up.
    pub fn write_inbound(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut port = self.port(Direction::Inbound);
        ring::produce(&mut port, bytes)
    }

    /// Bytes waiting in the outbound ring
    pub fn outbound_pending(&mut self) -> Result<usize> {
        let (head, tail, capacity) = self.indices(Direction::Outbound)?;
        Ok(ring::used_space(head, tail, capacity) as usize)
    }

    /// Room left in the inbound ring
    pub fn inbound_free(&mut self) -> Result<usize> {
        let (head, tail, capacity) = self.indices(Direction::Inbound)?;
        Ok(ring::free_space(head, tail, capacity) as usize)
    }

    /// Current overflow counter, `None` for layouts without one
    pub fn overflow_count(&mut self) -> Result<Option<u32>> {
        match self.layout.overflow_counter {
            Some(address) => {
                let encoding = self.config.encoding();
                read_word(&mut self.memory, address, encoding).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Overflows since the previous poll (or attach)
    ///
    /// The counter wraps, so the delta is computed modulo 2^32.
    pub fn poll_overflow(&mut self) -> Result<u32> {
        let Some(current) = self.overflow_count()? else {
            return Ok(0);
        };
        let delta = current.wrapping_sub(self.last_overflow);
        self.last_overflow = current;
        if delta > 0 {
            warn!(delta, total = current, "Outbound side overflowed {delta} times");
        }
        Ok(delta)
    }

    /// Read outbound bytes, polling up to `max_polls` times while empty
    ///
    /// Sleeps the configured poll interval between attempts.
    pub fn poll_outbound(&mut self, buf: &mut [u8], max_polls: usize) -> Result<usize> {
        for attempt in 0..max_polls {
            let count = self.read_outbound(buf)?;
            if count > 0 {
                return Ok(count);
            }
            if attempt + 1 < max_polls {
                std::thread::sleep(self.config.poll_interval());
            }
        }
        Ok(0)
    }

    /// The memory backend
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// The memory backend, mutably
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// Detach and return the memory backend
    pub fn into_inner(self) -> M {
        self.memory
    }

    fn port(&mut self, direction: Direction) -> RemotePort<'_, M> {
        RemotePort {
            memory: &mut self.memory,
            direction,
            ring: *self.layout.ring(direction),
            encoding: self.config.encoding(),
        }
    }

    /// Validated `(head, tail, capacity)` snapshot
    fn indices(&mut self, direction: Direction) -> Result<(u32, u32, u32)> {
        let target = *self.layout.ring(direction);
        let encoding = self.config.encoding();
        let head = read_word(&mut self.memory, target.head, encoding)?;
        let tail = read_word(&mut self.memory, target.tail, encoding)?;
        let capacity = target.capacity();
        if !ring::in_bounds(head, tail, capacity) {
            return Err(ProbeError::IndexOutOfRange {
                ring: direction,
                head,
                tail,
                capacity,
            });
        }
        Ok((head, tail, capacity))
    }
}

fn read_layout<M: TargetMemory>(memory: &mut M, base: u64, config: &ProbeConfig) -> Result<Layout> {
    let encoding = config.encoding();

    let mut probe = [0u8; PROBE_LEN];
    memory.read(base, &mut probe).map_err(ProbeError::memory)?;
    let signature = encoding.word(&probe, 0).unwrap_or(0);
    let revision = Revision::resolve(signature, config.inline_variant)
        .ok_or(LayoutError::UnknownSignature(signature))?;

    let mut header = vec![0u8; revision.header_len(encoding.pointer_width)];
    memory.read(base, &mut header).map_err(ProbeError::memory)?;
    Ok(Layout::decode_with(
        base,
        &header,
        encoding,
        config.max_capacity_exponent,
        config.inline_variant,
    )?)
}

fn read_word<M: TargetMemory>(memory: &mut M, address: u64, encoding: Encoding) -> Result<u32> {
    let mut raw = [0u8; 4];
    memory.read(address, &mut raw).map_err(ProbeError::memory)?;
    Ok(encoding.endianness.u32_from(raw))
}

fn write_word<M: TargetMemory>(
    memory: &mut M,
    address: u64,
    value: u32,
    encoding: Encoding,
) -> Result<()> {
    memory
        .write(address, &encoding.endianness.u32_to(value))
        .map_err(ProbeError::memory)
}

/// One ring seen through target memory
struct RemotePort<'m, M> {
    memory: &'m mut M,
    direction: Direction,
    ring: RingLayout,
    encoding: Encoding,
}

impl<M: TargetMemory> RingPort for RemotePort<'_, M> {
    type Error = ProbeError;

    fn capacity_exponent(&self) -> u32 {
        self.ring.exponent
    }

    fn load_head(&mut self) -> Result<u32> {
        read_word(self.memory, self.ring.head, self.encoding)
    }

    fn load_tail(&mut self) -> Result<u32> {
        read_word(self.memory, self.ring.tail, self.encoding)
    }

    fn store_head(&mut self, head: u32) -> Result<()> {
        write_word(self.memory, self.ring.head, head, self.encoding)
    }

    fn store_tail(&mut self, tail: u32) -> Result<()> {
        write_word(self.memory, self.ring.tail, tail, self.encoding)
    }

    fn copy_in(&mut self, offset: u32, src: &[u8]) -> Result<()> {
        trace!(ring = %self.direction, offset, len = src.len(), "copy in");
        self.memory
            .write(self.ring.data + u64::from(offset), src)
            .map_err(ProbeError::memory)
    }

    fn copy_out(&mut self, offset: u32, dst: &mut [u8]) -> Result<()> {
        trace!(ring = %self.direction, offset, len = dst.len(), "copy out");
        self.memory
            .read(self.ring.data + u64::from(offset), dst)
            .map_err(ProbeError::memory)
    }

    fn fence(&mut self) {
        fence(Ordering::SeqCst);
    }

    fn on_full(&mut self) -> Result<()> {
        warn!(ring = %self.direction, "Ring full, write truncated");
        Ok(())
    }

    fn on_corruption(&mut self, head: u32, tail: u32) -> Result<()> {
        Err(ProbeError::IndexOutOfRange {
            ring: self.direction,
            head,
            tail,
            capacity: self.ring.capacity(),
        })
    }
}
