use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use spead_rx::{CellRing, CellRingConfig};

fn bench_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("cell_ring_push");
    for nof_cells in [256usize, 4096, 65536] {
        let ring = CellRing::new(CellRingConfig::new(2048, nof_cells)).unwrap();
        let payload = vec![0xAAu8; 256];
        group.bench_with_input(BenchmarkId::from_parameter(nof_cells), &nof_cells, |b, _| {
            b.iter(|| {
                if !ring.push(&payload) {
                    while ring.pull_ready_now().is_some() {
                        ring.pull_ready();
                    }
                }
            });
        });
    }
    group.finish();
}

fn bench_push_pull_pair(c: &mut Criterion) {
    let ring = CellRing::new(CellRingConfig::JUMBO).unwrap();
    let payload = vec![0x5Au8; 1024];
    c.bench_function("cell_ring_push_pull_pair", |b| {
        b.iter(|| {
            ring.push(&payload);
            if ring.pull_ready_now().is_some() {
                ring.pull_ready();
            }
        });
    });
}

criterion_group!(benches, bench_push, bench_push_pull_pair);
criterion_main!(benches);
