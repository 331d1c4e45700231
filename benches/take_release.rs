//! Pool allocation benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use segbuf::pool::{Pool, PoolConfig};

fn pool(block_count: usize) -> Pool {
    Pool::configured(PoolConfig::new(4096, block_count).with_name("bench-take")).unwrap()
}

fn bench_take_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("take_release");
    let pool = pool(256);

    for size in [64, 4096, 3 * 4096 + 100, 8 * 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let buffer = pool.take(size, false).expect("pool not exhausted");
                std::hint::black_box(buffer.segment_count());
            });
        });
    }

    group.finish();
}

fn bench_duplicate(c: &mut Criterion) {
    let mut group = c.benchmark_group("duplicate");
    let pool = pool(256);
    let source = pool.take(6 * 4096, false).unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("whole_record", |b| {
        b.iter(|| {
            let copy = source.duplicate().unwrap();
            std::hint::black_box(copy.total_size());
        });
    });
    group.bench_function("copy_deep", |b| {
        b.iter(|| {
            let copy = pool.copy_deep(&source).unwrap();
            std::hint::black_box(copy.total_size());
        });
    });

    group.finish();
}

fn bench_cross_thread_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("cross_thread_release");
    let pool = pool(1024);

    group.throughput(Throughput::Elements(256));
    group.bench_function("256_buffers", |b| {
        b.iter(|| {
            let buffers: Vec<_> = (0..256)
                .map(|_| pool.take(4096, false).unwrap().try_into_send().unwrap())
                .collect();
            std::thread::spawn(move || drop(buffers)).join().unwrap();
            pool.poll_events();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_take_release, bench_duplicate, bench_cross_thread_release);
criterion_main!(benches);
