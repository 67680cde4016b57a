//! Throughput of `spawn`+`join` on trivial lthreads, the cost the C source's
//! `test_thrash.c` exercises 10,000 x 20 times without ever measuring it.

use std::sync::Once;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

static INIT: Once = Once::new();

fn ensure_init() {
    INIT.call_once(|| {
        lthreads::init().expect("lthreads::init should succeed exactly once per bench process");
    });
}

fn benchmark_spawn_join(c: &mut Criterion) {
    ensure_init();

    let batch_sizes: [usize; 3] = [1, 20, 100];
    let mut group = c.benchmark_group("spawn_join");

    for batch in batch_sizes {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("trivial_entry", batch), &batch, |b, &batch| {
            b.iter(|| {
                let handles: Vec<_> = (0..batch)
                    .map(|n| lthreads::spawn(move || black_box(n)))
                    .map(|r| r.expect("spawn should succeed"))
                    .collect();
                for handle in handles {
                    black_box(lthreads::join(handle).expect("join should succeed"));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_spawn_join);
criterion_main!(benches);
