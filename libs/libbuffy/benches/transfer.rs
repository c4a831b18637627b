//! Ring transfer benchmarks
//!
//! Run with: cargo bench -p libbuffy

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use libbuffy::{Channel, InlineChannel, RingStorage};

/// Write then drain through the referenced layout at various chunk sizes
fn bench_write_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_drain");
    let out = RingStorage::<4096>::new();
    let inb = RingStorage::<64>::new();
    let channel = Channel::new(&out, &inb);
    let (mut tx, _rx) = channel.split().unwrap();
    let mut sink = vec![0u8; 4096];

    for size in [16, 64, 256, 1024, 4095].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let data = vec![0xa5u8; size];
            b.iter(|| {
                let written = tx.write(black_box(&data));
                tx.drain(&mut sink[..written])
            });
        });
    }

    group.finish();
}

/// Writes into a full ring: guard, run computation and overflow accounting only
fn bench_full_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_ring");
    let out = RingStorage::<64>::new();
    let inb = RingStorage::<64>::new();
    let channel = Channel::new(&out, &inb);
    let (mut tx, _rx) = channel.split().unwrap();
    tx.write(&[0u8; 63]);

    group.bench_function("write_rejected", |b| {
        b.iter(|| tx.write(black_box(b"x")));
    });

    group.finish();
}

/// Reads that wrap around the end of the inline inbound ring
fn bench_wrapping_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("wrapping_read");
    let channel = InlineChannel::<1024, 1024>::new();
    let (mut tx, _rx) = channel.split().unwrap();
    let data = vec![0x5au8; 700];
    let mut sink = vec![0u8; 700];

    group.throughput(Throughput::Bytes(700));
    group.bench_function("drain_700", |b| {
        b.iter(|| {
            tx.write(&data);
            tx.drain(black_box(&mut sink))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_write_drain, bench_full_ring, bench_wrapping_read);
criterion_main!(benches);
