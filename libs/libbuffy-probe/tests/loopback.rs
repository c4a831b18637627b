//! Observer against live descriptors in the same address space
//!
//! The firmware side runs through libbuffy handles; the observer reaches the
//! same memory through `LocalMemory`, exactly as it would through a probe.

use std::mem::MaybeUninit;

use libbuffy::layout::referenced;
use libbuffy::{
    Channel, CountedInlineChannel, Direction, InlineChannel, InlineVariant, LayoutError, Revision,
    RingStorage,
};
use libbuffy_probe::{LocalMemory, Observer, ProbeConfig, ProbeError, TargetMemory};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn observe<T>(descriptor: &T) -> Observer<LocalMemory> {
    observe_with(descriptor, ProbeConfig::native())
}

fn observe_with<T>(descriptor: &T, config: ProbeConfig) -> Observer<LocalMemory> {
    let base = descriptor as *const T as u64;
    // SAFETY: the descriptor and its storage outlive every observer in these
    // tests, and the observer only writes probe-owned words and buffers
    let memory = unsafe { LocalMemory::new() };
    Observer::attach(memory, base, config).unwrap()
}

#[test]
fn test_referenced_round_trip() {
    init_tracing();
    let out = RingStorage::<64>::new();
    let inb = RingStorage::<16>::new();
    let channel = Channel::new(&out, &inb);
    let (mut tx, mut rx) = channel.split().unwrap();
    let mut observer = observe(&channel);

    assert_eq!(observer.revision(), Revision::Referenced);
    assert_eq!(observer.layout().outbound.data, out.as_mut_ptr() as u64);

    assert_eq!(tx.write(b"hello, probe\n"), 13);
    assert_eq!(observer.outbound_pending().unwrap(), 13);
    let mut buf = [0u8; 64];
    assert_eq!(observer.read_outbound(&mut buf).unwrap(), 13);
    assert_eq!(&buf[..13], b"hello, probe\n");
    assert_eq!(tx.pending(), 0);

    assert_eq!(observer.write_inbound(b"led on").unwrap(), 6);
    assert_eq!(rx.available(), 6);
    let mut cmd = [0u8; 16];
    assert_eq!(rx.read(&mut cmd), 6);
    assert_eq!(&cmd[..6], b"led on");
    assert_eq!(observer.inbound_free().unwrap(), 15);
}

#[test]
fn test_inline_round_trip_wraps() {
    init_tracing();
    let channel = InlineChannel::<16, 8>::new();
    let (mut tx, mut rx) = channel.split().unwrap();
    let mut observer = observe(&channel);
    assert_eq!(observer.revision(), Revision::Inline);

    let mut buf = [0u8; 16];
    let mut received = Vec::new();
    for round in 0..10u8 {
        let line = [b'a' + round; 11];
        assert_eq!(tx.write(&line), 11);
        let n = observer.read_outbound(&mut buf).unwrap();
        received.extend_from_slice(&buf[..n]);
    }
    let expected: Vec<u8> = (0..10u8).flat_map(|r| [b'a' + r; 11]).collect();
    assert_eq!(received, expected);

    let mut got = Vec::new();
    for chunk in [&b"abc"[..], b"defgh", b"ijklmno"] {
        assert_eq!(observer.write_inbound(chunk).unwrap(), chunk.len());
        let mut cmd = [0u8; 8];
        let n = rx.read(&mut cmd);
        got.extend_from_slice(&cmd[..n]);
    }
    assert_eq!(got, b"abcdefghijklmno");
}

#[test]
fn test_counted_inline_round_trip() {
    init_tracing();
    let channel = CountedInlineChannel::<16, 8>::new();
    let (mut tx, mut rx) = channel.split().unwrap();
    let config = ProbeConfig { inline_variant: InlineVariant::Counted, ..ProbeConfig::native() };
    let mut observer = observe_with(&channel, config);

    assert_eq!(observer.revision(), Revision::InlineCounted);
    assert_eq!(observer.overflow_count().unwrap(), Some(0));

    assert_eq!(tx.write(b"hi"), 2);
    let mut buf = [0u8; 16];
    assert_eq!(observer.read_outbound(&mut buf).unwrap(), 2);
    assert_eq!(&buf[..2], b"hi");

    assert_eq!(tx.write(&[b'z'; 20]), 15);
    assert_eq!(observer.poll_overflow().unwrap(), 1);
    assert_eq!(observer.read_outbound(&mut buf).unwrap(), 15);
    assert_eq!(&buf[..15], &[b'z'; 15]);
    assert_eq!(channel.overflow_count(), 1);

    assert_eq!(observer.write_inbound(b"go").unwrap(), 2);
    let mut cmd = [0u8; 4];
    assert_eq!(rx.read(&mut cmd), 2);
    assert_eq!(&cmd[..2], b"go");
}

#[test]
fn test_overflow_seen_by_observer() {
    init_tracing();
    let out = RingStorage::<16>::new();
    let inb = RingStorage::<8>::new();
    let channel = Channel::new(&out, &inb);
    let (mut tx, _rx) = channel.split().unwrap();
    let mut observer = observe(&channel);

    assert_eq!(tx.write(&[0u8; 20]), 15);
    assert_eq!(tx.write(b"more"), 0);
    assert_eq!(observer.overflow_count().unwrap(), Some(2));
    assert_eq!(observer.poll_overflow().unwrap(), 2);
    assert_eq!(observer.poll_overflow().unwrap(), 0);

    let mut buf = [0u8; 4];
    assert_eq!(observer.read_outbound(&mut buf).unwrap(), 4);
    assert_eq!(tx.write(b"more"), 4);
    assert_eq!(observer.poll_overflow().unwrap(), 0);
}

#[test]
fn test_corrupted_index_firmware_resets_observer_reports() {
    init_tracing();
    let out = RingStorage::<16>::new();
    let inb = RingStorage::<8>::new();
    let channel = Channel::new(&out, &inb);
    let (mut tx, _rx) = channel.split().unwrap();
    let mut observer = observe(&channel);
    let base = observer.layout().base;

    tx.write(b"abc");
    observer
        .memory_mut()
        .write(base + referenced::OUTBOUND_TAIL as u64, &99u32.to_ne_bytes())
        .unwrap();

    let mut buf = [0u8; 8];
    let err = observer.read_outbound(&mut buf).unwrap_err();
    assert!(matches!(
        err,
        ProbeError::IndexOutOfRange { ring: Direction::Outbound, tail: 99, .. }
    ));
    assert!(err.is_recoverable());

    // Firmware guard drops the call and empties the ring
    assert_eq!(tx.write(b"lost"), 0);
    assert_eq!(observer.outbound_pending().unwrap(), 0);

    assert_eq!(tx.write(b"back"), 4);
    assert_eq!(observer.read_outbound(&mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], b"back");
}

#[test]
fn test_attach_waits_for_init_flag() {
    init_tracing();
    let out = RingStorage::<32>::new();
    let inb = RingStorage::<8>::new();
    let mut slot = MaybeUninit::uninit();
    let channel = Channel::init(&mut slot, &out, &inb);
    let base = channel as *const Channel<'_> as u64;

    // SAFETY: the descriptor outlives the memory handle
    let mut memory = unsafe { LocalMemory::new() };
    memory
        .write(base + referenced::INBOUND_LEN as u64, &0u32.to_ne_bytes())
        .unwrap();
    let err = Observer::attach(memory, base, ProbeConfig::native()).unwrap_err();
    assert!(matches!(err, ProbeError::Layout(LayoutError::Uninitialized(Direction::Inbound))));
    assert!(!channel.is_initialized());

    // SAFETY: as above
    let mut memory = unsafe { LocalMemory::new() };
    memory
        .write(base + referenced::INBOUND_LEN as u64, &8u32.to_ne_bytes())
        .unwrap();
    let observer = Observer::attach(memory, base, ProbeConfig::native()).unwrap();
    assert_eq!(observer.layout().outbound.usable_capacity(), 31);
}
