//! Throughput of the two messaging paths
//!
//! Mailbox actors are measured with a burst of sends followed by one wait
//! on the last future; named workers with synchronous round trips, which
//! is the latency-bound case.

use actor_runtime::{Actor, ActorGroup, GroupConfig, WorkerSystem};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(30));

fn bench_actor_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("actor_burst");

    for &burst in &[1_u64, 64, 1_024] {
        let pool = ActorGroup::new(
            "bench",
            GroupConfig {
                min_threads: 1,
                max_threads: 4,
                idle_timeout_ms: 5_000,
            },
        )
        .unwrap();
        let actor = Actor::new(&pool, |_cx, n: u64| Ok(n.wrapping_mul(31)));

        group.throughput(Throughput::Elements(burst));
        group.bench_with_input(BenchmarkId::from_parameter(burst), &burst, |b, &burst| {
            b.iter(|| {
                let mut last = None;
                for n in 0..burst {
                    last = Some(actor.send(black_box(n)).unwrap());
                }
                if let Some(future) = last {
                    black_box(future.get(WAIT).unwrap());
                }
            });
        });

        pool.stop();
        pool.join(WAIT).unwrap();
    }

    group.finish();
}

/// Many actors sharing a small pool
fn bench_actor_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("actor_fan_out");
    let pool = ActorGroup::with_defaults("fan-out");
    let actors: Vec<Actor<u64, u64>> = (0..32)
        .map(|_| Actor::new(&pool, |_cx, n: u64| Ok(n + 1)))
        .collect();

    group.throughput(Throughput::Elements(actors.len() as u64 * 16));
    group.bench_function("32_actors_x16", |b| {
        b.iter(|| {
            let futures: Vec<_> = actors
                .iter()
                .flat_map(|actor| (0..16).map(move |n| actor.send(n).unwrap()))
                .collect();
            for future in futures {
                black_box(future.get(WAIT).unwrap());
            }
        });
    });

    group.finish();
    pool.stop();
    pool.join(WAIT).unwrap();
}

fn bench_worker_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_round_trip");
    let system = WorkerSystem::with_defaults();
    let worker = system
        .worker::<u64, u64>()
        .name("bench-echo")
        .receive(|_w, n| Ok(n))
        .spawn()
        .unwrap();

    group.bench_function("send_sync", |b| {
        b.iter(|| black_box(worker.send_sync(black_box(7)).unwrap()));
    });
    group.bench_function("send_async_then_sync", |b| {
        b.iter(|| {
            for n in 0..15 {
                worker.send_async(n).unwrap();
            }
            black_box(worker.send_sync(15).unwrap())
        });
    });

    group.finish();
    worker.stop();
    worker.join(WAIT).unwrap();
}

criterion_group!(
    benches,
    bench_actor_burst,
    bench_actor_fan_out,
    bench_worker_round_trip
);
criterion_main!(benches);
