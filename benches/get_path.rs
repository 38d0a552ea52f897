use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use frame_cache_core::{CacheAgent, CacheConfig, SimulatedLoader};

fn config() -> CacheConfig {
    CacheConfig {
        max_entries: 500,
        byte_limit: 64 * 1024 * 1024,
        preload_radius_base: 5,
        preload_workers: 2,
        preload_queue_capacity: 128,
        monitor_interval_ms: 50,
        optimizer_interval_ms: 10_000,
        get_deadline_ms: 50,
        warn_latency_ms: 45,
        access_log_capacity: 500,
        trend_window: 20,
        preload_eta_factor_secs: 0.1,
        pattern_verdict_ttl_ms: 50,
        pattern_window: 20,
    }
}

/// The hot path: `get` on a frame already resident in the store. This is
/// the only path under direct latency budget and the one that matters for
/// the 50ms deadline in practice — everything else is a cold path that
/// either blocks on a loader thread or is amortized background work.
fn bench_hit_path(c: &mut Criterion) {
    let loader = Arc::new(SimulatedLoader::new(Duration::from_micros(50), 4096));
    let agent = CacheAgent::new(config(), loader).expect("valid benchmark config");
    agent.get("000001");

    let mut group = c.benchmark_group("get_path");
    group.measurement_time(Duration::from_secs(3));
    group.warm_up_time(Duration::from_secs(1));

    group.bench_function(BenchmarkId::new("hit", "resident"), |b| {
        b.iter(|| black_box(agent.get(black_box("000001"))));
    });

    group.finish();
}

/// Cold misses under a loader whose latency is a small fraction of the
/// deadline, which is the common case for a well-provisioned loader. This
/// exercises the worker-thread spawn plus `crossbeam::channel` round trip
/// the hot path pays on every miss.
fn bench_cold_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_path");
    group.measurement_time(Duration::from_secs(3));
    group.warm_up_time(Duration::from_secs(1));
    group.sample_size(30);

    group.bench_function(BenchmarkId::new("miss", "cold"), |b| {
        let mut counter = 0u32;
        b.iter_batched(
            || {
                let loader = Arc::new(SimulatedLoader::new(Duration::from_micros(200), 4096));
                let agent = CacheAgent::new(config(), loader).expect("valid benchmark config");
                counter = counter.wrapping_add(1);
                (agent, format!("{counter:06}"))
            },
            |(agent, frame_id)| {
                black_box(agent.get(black_box(&frame_id)));
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_hit_path, bench_cold_miss);
criterion_main!(benches);
