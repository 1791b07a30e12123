//! # Jump Table Benchmarks
//!
//! Measures the pre-dispatch pass over the instruction stream.
//!
//! Run: `cargo bench --bench jumptable_bench`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use regvm_core::vm::{CodeBuilder, JumpTable, Opcode};

/// Mixed stream: arithmetic, loads, stack ops and branches
fn mixed_stream(blocks: usize) -> Vec<u8> {
    let mut b = CodeBuilder::new();
    for i in 0..blocks {
        let label = format!("block{}", i);
        b.label(&label)
            .loadl(i as i64, 1)
            .op(Opcode::Addi, 1, 2, 3)
            .stack(Opcode::Stpushi, 3)
            .stack(Opcode::Stpopi, 4)
            .load_abs(Opcode::Load, 0, 0, 5)
            .jmpi(4, &label)
            .jsr(&label);
    }
    b.rts();
    b.build().unwrap().code
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("jumptable_compile");

    for blocks in [16usize, 256, 4096] {
        let code = mixed_stream(blocks);
        group.throughput(Throughput::Bytes(code.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(blocks), &code, |b, code| {
            b.iter(|| black_box(JumpTable::compile(black_box(code), 16).unwrap()))
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let code = mixed_stream(256);
    let table = JumpTable::compile(&code, 16).unwrap();

    c.bench_function("jumptable_target", |b| {
        b.iter(|| {
            let mut hits = 0i64;
            for ep in 16..code.len() {
                hits = hits.wrapping_add(table.target(black_box(ep)));
            }
            black_box(hits)
        })
    });
}

criterion_group!(benches, bench_compile, bench_lookup);
criterion_main!(benches);
