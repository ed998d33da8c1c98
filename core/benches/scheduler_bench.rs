//! Throughput benchmarks for the scheduler's synchronous dispatch path
//! and the evaluation cache's exact-lookup path.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use parasweep_core::cache::EvaluationCache;
use parasweep_core::model::{ActiveSet, ParamResponsePair, Response, Variables};
use parasweep_core::recovery::FailureMode;
use parasweep_core::scheduler::{Scheduler, SchedulerConfig};
use parasweep_core::transport::{Driver, Filing, FilingPolicy, Transport, WorkDirectoryPolicy};
use std::sync::Arc;

fn echo_driver() -> Driver {
    let transport = Transport::InProcess(Arc::new(|vars: &Variables, set: &ActiveSet| {
        let mut response = Response::new_shaped(vec!["f".into()], 0, set.clone());
        response.function_values[0] = vars.continuous.values.iter().sum();
        Ok(response)
    }));
    Driver::new(
        "bench",
        vec![transport],
        FilingPolicy { mode: Filing::InMemory, ..FilingPolicy::default() },
        WorkDirectoryPolicy::default(),
    )
}

fn synchronous_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_synchronize");
    for size in [10usize, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut scheduler = Scheduler::new(echo_driver(), FailureMode::Abort, SchedulerConfig::default());
                let mut cache = EvaluationCache::new();
                for i in 0..size {
                    scheduler.map(
                        i as i64 + 1,
                        "bench".into(),
                        Variables::from_continuous(vec![i as f64]),
                        ActiveSet::values_only(1),
                        &cache,
                    );
                }
                let results = scheduler.synchronize::<std::io::Sink>(&mut cache, None, None).unwrap();
                black_box(results);
            });
        });
    }
    group.finish();
}

fn cache_exact_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_lookup_exact");
    for size in [100usize, 1_000, 10_000] {
        let mut cache = EvaluationCache::new();
        for i in 0..size {
            let mut pair = ParamResponsePair::new_request(
                i as i64 + 1,
                "bench",
                Variables::from_continuous(vec![i as f64]),
                ActiveSet::values_only(1),
            );
            pair.response.function_values[0] = i as f64;
            cache.insert(pair);
        }
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let query = Variables::from_continuous(vec![(size / 2) as f64]);
            b.iter(|| {
                black_box(cache.lookup_exact("bench", &query, &ActiveSet::values_only(1)));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, synchronous_dispatch, cache_exact_lookup);
criterion_main!(benches);
