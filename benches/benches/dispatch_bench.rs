//! # Dispatch Benchmarks
//!
//! Measures the interpreter loop: arithmetic loops, calls and spawned cores.
//!
//! Run: `cargo bench --bench dispatch_bench`

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use regvm_core::prelude::*;

/// counter R1 from 0 to `n`, accumulating into R3
fn counting_loop(n: i64) -> ProgramImage {
    let mut b = CodeBuilder::new();
    b.loadl(0, 1).loadl(n, 2).loadl(0, 3);
    b.label("loop")
        .op(Opcode::Addi, 3, 1, 3)
        .inclsijmpi(1, 2, "loop")
        .intr0(255, 3, 0, 0);
    b.build().unwrap()
}

/// `n` subroutine calls through the return stack
fn call_loop(n: i64) -> ProgramImage {
    let mut b = CodeBuilder::new();
    b.loadl(0, 1).loadl(n, 2).loadl(1, 4);
    b.label("loop")
        .jsr("inc")
        .inclsijmpi(1, 2, "loop")
        .intr0(255, 3, 0, 0);
    b.label("inc").op(Opcode::Addi, 3, 4, 3).rts();
    b.build().unwrap()
}

fn bench_dispatch_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_loop");
    let config = VmConfig::default().with_max_cores(1);

    for n in [1_000i64, 10_000, 100_000] {
        group.throughput(Throughput::Elements(n as u64));

        let image = counting_loop(n);
        group.bench_with_input(BenchmarkId::new("addi_inclsijmpi", n), &image, |b, image| {
            b.iter_batched(
                || Machine::new(image.clone(), config.clone()).unwrap(),
                |mut machine| black_box(machine.run().return_code),
                BatchSize::SmallInput,
            )
        });

        let image = call_loop(n);
        group.bench_with_input(BenchmarkId::new("jsr_rts", n), &image, |b, image| {
            b.iter_batched(
                || Machine::new(image.clone(), config.clone()).unwrap(),
                |mut machine| black_box(machine.run().return_code),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

/// Spawn + join of `workers` cores that each run a short loop
fn bench_spawn_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_join");

    for workers in [1usize, 3, 7] {
        let mut b = CodeBuilder::new();
        b.loadl_label("worker", 10);
        for _ in 0..workers {
            b.intr1(0, 10, 0, 0);
        }
        b.intr1(1, 0, 0, 0).loadl(0, 0).intr0(255, 0, 0, 0);
        b.label("worker").loadl(0, 1).loadl(1_000, 2);
        b.label("spin")
            .inclsijmpi(1, 2, "spin")
            .intr1(255, 0, 0, 0);
        let image = b.build().unwrap();
        let config = VmConfig::default()
            .with_max_cores(workers + 1)
            .with_stack_size(1024);

        group.bench_with_input(BenchmarkId::from_parameter(workers), &image, |b, image| {
            b.iter_batched(
                || Machine::new(image.clone(), config.clone()).unwrap(),
                |mut machine| black_box(machine.run().return_code),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch_loop, bench_spawn_join);
criterion_main!(benches);
