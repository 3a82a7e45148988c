//! Benchmarks for core MedLedger operations.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use medledger_core::{
    block::BlockLog,
    model::{MedicineDetails, RegisterMedicine},
    util, AuthenticityLedger as _, Engine,
};

fn req(batch_id: String) -> RegisterMedicine {
    RegisterMedicine {
        batch_id,
        name: "Paracetamol".into(),
        manufacturer_id: "MFG-B".into(),
        manufacturer_name: "Bench Pharma".into(),
        manufacturing_date: "2025-01-01".into(),
        expiry_date: "2099-01-01".into(),
        details: MedicineDetails::default(),
    }
}

fn bench_sha256(c: &mut Criterion) {
    let data = vec![0u8; 1024];
    c.bench_function("sha256_1kb", |b| b.iter(|| util::sha256(black_box(&data))));
}

fn bench_mining(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_append");
    for difficulty in [0usize, 1, 2, 3] {
        group.bench_function(format!("difficulty_{difficulty}"), |b| {
            b.iter_batched(
                || BlockLog::new(difficulty).unwrap(),
                |mut log| {
                    log.append(black_box(serde_json::json!({ "event": "bench", "n": 1 })))
                        .hash
                        .clone()
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_integrity_walk(c: &mut Criterion) {
    let mut log = BlockLog::new(1).unwrap();
    for i in 0..200 {
        log.append(serde_json::json!({ "event": "bench", "n": i }));
    }
    c.bench_function("verify_integrity_200", |b| b.iter(|| log.verify_integrity()));
}

fn bench_verify_operation(c: &mut Criterion) {
    let mut engine = Engine::new(0).unwrap();
    for i in 0..100 {
        engine.register(req(format!("BENCH-{i}"))).unwrap();
    }
    c.bench_function("engine_verify", |b| {
        b.iter(|| engine.verify(black_box("BENCH-42")).is_authentic)
    });
}

criterion_group!(
    benches,
    bench_sha256,
    bench_mining,
    bench_integrity_walk,
    bench_verify_operation,
);
criterion_main!(benches);
