//! Allocator benchmarks: bitset ledger scans and device suballocation.

use basalt::gpu::mock::MockBackend;
use basalt::ledger::Ledger;
use basalt::memory::{AllocRequest, DeviceAllocator};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_ledger_take_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_take_release");

    for units in [64usize, 1024, 16384] {
        let mut ledger = Ledger::new_committed(units);
        // Half-full ledger so the scan has occupied words to skip.
        for _ in 0..units / 2 {
            ledger.take();
        }

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(units), &units, |b, _| {
            b.iter(|| {
                let unit = ledger.take();
                ledger.release(unit);
            });
        });
    }

    group.finish();
}

fn bench_ledger_run_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_run_scan");

    let mut ledger = Ledger::new_committed(16384);
    // Fragment the space: every other 8-unit run occupied.
    let mut occupied = Vec::new();
    while let Some(run) = ledger.take_run(8, 1) {
        occupied.push(run);
    }
    for run in occupied.iter().step_by(2) {
        ledger.release_run(*run, 8);
    }

    group.throughput(Throughput::Elements(1));
    group.bench_function("aligned_8_unit_run", |b| {
        b.iter(|| {
            let run = ledger.take_run(8, 4).expect("fragmented space still has runs");
            ledger.release_run(run, 8);
        });
    });

    group.finish();
}

fn bench_device_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("device_allocation");

    for size in [256u64, 4096, 65536] {
        let mut backend = MockBackend::new();
        let mut allocator = DeviceAllocator::new(8 << 20);
        // A resident allocation keeps the chunk alive so the loop measures
        // suballocation, not native chunk churn.
        let _resident = allocator
            .allocate(
                &mut backend,
                &AllocRequest {
                    size: 256,
                    alignment: 256,
                    type_bits: 0b01,
                    host_visible: false,
                },
            )
            .expect("resident allocation");

        group.throughput(Throughput::Bytes(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let allocation = allocator
                    .allocate(
                        &mut backend,
                        &AllocRequest {
                            size,
                            alignment: 256,
                            type_bits: 0b01,
                            host_visible: false,
                        },
                    )
                    .expect("allocation");
                allocator.deallocate(&mut backend, allocation);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ledger_take_release,
    bench_ledger_run_scan,
    bench_device_allocation
);
criterion_main!(benches);
