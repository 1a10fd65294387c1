//! Benchmarks for the tier scheduler.
//!
//! Benchmarks cover:
//! - Queue operations (put/pop, tombstone removal, promotion)
//! - Resource manager allocate/release
//! - Scheduler ticks under a mixed workload
//! - Executor-backed scheduling through the tokio driver hook

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Runtime;

use prometheus_tier_scheduler::builders::SchedulerBuilder;
use prometheus_tier_scheduler::core::{
    ExecutionHandle, ExecutionOutcome, ResourceManager, WorkExecutor, WorkItem,
};
use prometheus_tier_scheduler::infra::TieredQueue;
use prometheus_tier_scheduler::runtime::TokioExecutionHook;
use prometheus_tier_scheduler::util::serde::{Priority, ResourceAllocation};

// ============================================================================
// Helper Functions
// ============================================================================

fn tier_for(i: u64) -> Priority {
    match i % 10 {
        0 => Priority::Critical,
        1..=2 => Priority::High,
        3..=5 => Priority::Normal,
        6..=7 => Priority::Low,
        _ => Priority::Background,
    }
}

fn build_item(i: u64) -> WorkItem {
    WorkItem::new(format!("task-{i}"), tier_for(i)).created_at(u128::from(i))
}

#[derive(Clone)]
struct BenchExecutor;

#[async_trait]
impl WorkExecutor for BenchExecutor {
    async fn execute(
        &self,
        _item: WorkItem,
        _allocated: ResourceAllocation,
        _handle: ExecutionHandle,
    ) -> ExecutionOutcome {
        ExecutionOutcome::Completed
    }
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_queue_put_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_put_pop");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let queue = TieredQueue::new();
                for i in 0..size {
                    queue.put(build_item(i));
                }
                while let Some(item) = queue.pop() {
                    black_box(item);
                }
            });
        });
    }
    group.finish();
}

fn bench_queue_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_remove");

    for size in [100, 1_000, 5_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let queue = TieredQueue::new();
                for i in 0..size {
                    queue.put(build_item(i));
                }
                // Tombstone every other item, then drain.
                for i in (0..size).step_by(2) {
                    black_box(queue.remove(&format!("task-{i}")));
                }
                let mut count = 0;
                while queue.pop().is_some() {
                    count += 1;
                }
                black_box(count);
            });
        });
    }
    group.finish();
}

fn bench_queue_promote(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_promote");

    for size in [100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let queue = TieredQueue::new();
                for i in 0..size {
                    queue.put(build_item(i));
                }
                for i in 0..size / 10 {
                    black_box(queue.update_priority(&format!("task-{i}"), Priority::High));
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Resource Manager Benchmarks
// ============================================================================

fn bench_allocate_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_release");
    let one = ResourceAllocation::from_fn(|_| 1);

    for count in [10u64, 100] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let manager = ResourceManager::default();
                let ids: Vec<String> = (0..count).map(|i| format!("task-{i}")).collect();
                for id in &ids {
                    let _ = black_box(manager.allocate(id, Priority::Critical, one));
                }
                for id in &ids {
                    black_box(manager.release(id, Priority::Critical, None));
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Scheduler Benchmarks
// ============================================================================

fn bench_scheduler_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_ticks");

    for backlog in [50u64, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(backlog), &backlog, |b, &backlog| {
            b.iter(|| {
                let scheduler = SchedulerBuilder::new().build().unwrap();
                for i in 0..backlog {
                    scheduler.add_task(build_item(i));
                }
                for _ in 0..backlog {
                    black_box(scheduler.tick().unwrap());
                }
                for handle in scheduler.running_handles() {
                    handle.complete();
                }
                black_box(scheduler.tick().unwrap());
            });
        });
    }
    group.finish();
}

fn bench_executor_backed_scheduling(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor_backed_scheduling");

    group.bench_function("realistic_workload", |b| {
        b.to_async(Runtime::new().unwrap()).iter(|| async {
            let hook = TokioExecutionHook::current(BenchExecutor).unwrap();
            let scheduler = Arc::new(SchedulerBuilder::new().hook(Arc::new(hook)).build().unwrap());

            for i in 0..100u64 {
                scheduler.add_task(build_item(i));
            }
            for _ in 0..100 {
                black_box(scheduler.tick().unwrap());
                tokio::task::yield_now().await;
            }

            // Let spawned executions report back, then reclaim them.
            tokio::time::sleep(Duration::from_millis(1)).await;
            black_box(scheduler.tick().unwrap());
        });
    });
    group.finish();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(
    queue_benches,
    bench_queue_put_pop,
    bench_queue_remove,
    bench_queue_promote
);

criterion_group!(resource_benches, bench_allocate_release);

criterion_group!(
    scheduler_benches,
    bench_scheduler_ticks,
    bench_executor_backed_scheduling
);

criterion_main!(queue_benches, resource_benches, scheduler_benches);
