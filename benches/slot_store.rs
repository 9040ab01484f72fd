use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use slotnvm::{crc8_ccitt_update, MemNvm, SlotConfig, SlotStore};

fn populated_medium(cluster_size: usize, nvm_bytes: usize) -> MemNvm {
    let config = SlotConfig::builder(cluster_size)
        .crc(crc8_ccitt_update)
        .build();
    let mut store = SlotStore::new(MemNvm::new(nvm_bytes), config).unwrap();
    store.begin().unwrap();
    for slot in 1..=8u8 {
        let data = vec![slot; 24];
        store.write_slot(slot, &data).unwrap();
    }
    store.into_inner()
}

/// Benchmark slot writes across cluster sizes
fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_slot");

    for cluster_size in [16usize, 32, 64] {
        group.bench_with_input(
            BenchmarkId::from_parameter(cluster_size),
            &cluster_size,
            |b, &cs| {
                let config = SlotConfig::builder(cs).crc(crc8_ccitt_update).build();
                let mut store = SlotStore::new(MemNvm::new(4096), config).unwrap();
                store.begin().unwrap();
                let data = [0x5Au8; 24];

                b.iter(|| {
                    // alternating slots so every write is a rewrite
                    store.write_slot(1, black_box(&data)).unwrap();
                    store.write_slot(2, black_box(&data)).unwrap();
                });
            },
        );
    }

    group.finish();
}

/// Benchmark reads of a chained slot
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_slot");

    let config = SlotConfig::builder(16).crc(crc8_ccitt_update).build();
    let mut store = SlotStore::new(populated_medium(16, 4096), config).unwrap();
    store.begin().unwrap();
    let mut buf = [0u8; 256];

    group.bench_function("24_bytes_3_clusters", |b| {
        b.iter(|| {
            let len = store.read_slot(black_box(4), &mut buf).unwrap();
            black_box(&buf[..len]);
        });
    });

    group.finish();
}

/// Benchmark the startup scan against a populated medium
fn bench_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("begin");

    for (label, nvm_bytes) in [("1KiB", 1024usize), ("4KiB", 4096)] {
        let image = populated_medium(16, nvm_bytes);
        let config = SlotConfig::builder(16).crc(crc8_ccitt_update).build();

        group.bench_function(label, |b| {
            b.iter(|| {
                let mut store = SlotStore::new(image.clone(), config).unwrap();
                store.begin().unwrap();
                black_box(store.free());
            });
        });
    }

    group.finish();
}

/// Benchmark write/erase cycles (allocation ring churn)
fn bench_write_erase_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_erase_cycle");

    group.bench_function("16_byte_clusters", |b| {
        let config = SlotConfig::builder(16).crc(crc8_ccitt_update).build();
        let mut store = SlotStore::new(MemNvm::new(2048), config).unwrap();
        store.begin().unwrap();
        let data = [0xA5u8; 15];

        b.iter(|| {
            for slot in 1..=6u8 {
                store.write_slot(slot, black_box(&data)).unwrap();
            }
            for slot in 1..=6u8 {
                store.erase_slot(slot).unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_write,
    bench_read,
    bench_recovery,
    bench_write_erase_cycle
);
criterion_main!(benches);
