use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use drain_pipeline::RingBuffer;
use std::thread;

fn benchmark_push_overflow(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_overflow");
    for capacity in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            let buffer = RingBuffer::new(capacity);
            for i in 0..capacity as i64 {
                buffer.push(i);
            }
            let mut next = 0i64;
            b.iter(|| {
                next += 1;
                black_box(buffer.push(black_box(next)));
            });
        });
    }
    group.finish();
}

fn benchmark_fill_and_drain(c: &mut Criterion) {
    c.bench_function("fill_and_drain_100", |b| {
        let buffer = RingBuffer::new(100);
        b.iter(|| {
            for i in 0..100 {
                buffer.push(i);
            }
            black_box(buffer.drain())
        });
    });
}

fn benchmark_contended_push(c: &mut Criterion) {
    c.bench_function("contended_push_drain_10000", |b| {
        b.iter(|| {
            let buffer = RingBuffer::new(10);
            let writer = buffer.clone();
            let producer = thread::spawn(move || {
                for i in 0..10_000 {
                    writer.push(i);
                }
            });
            let mut drained = 0usize;
            while !producer.is_finished() {
                drained += buffer.drain().map_or(0, |batch| batch.len());
            }
            producer.join().expect("Producer panicked");
            drained + buffer.drain().map_or(0, |batch| batch.len())
        });
    });
}

criterion_group!(
    benches,
    benchmark_push_overflow,
    benchmark_fill_and_drain,
    benchmark_contended_push
);
criterion_main!(benches);
