//! Benchmarks for the two hottest paths in the execution core: journal id
//! allocation and query admission.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use futures::stream::BoxStream;

use loomcore_runtime::journal::entry::IdAllocator;
use loomcore_runtime::supervisor::{
    QueryBackend, QueryHandle, QueryOptions, QuerySupervisor, SupervisorConfig,
};
use loomcore_runtime::types::BackendError;

struct EchoHandle;

#[async_trait]
impl QueryHandle for EchoHandle {
    fn messages(&self) -> BoxStream<'static, serde_json::Value> {
        Box::pin(futures::stream::empty())
    }
    async fn close_input(&self) {}
    async fn interrupt(&self) {}
}

struct ImmediateBackend;

#[async_trait]
impl QueryBackend for ImmediateBackend {
    async fn start(
        &self,
        _prompt: String,
        _options: QueryOptions,
    ) -> Result<Arc<dyn QueryHandle>, BackendError> {
        Ok(Arc::new(EchoHandle))
    }
}

fn bench_id_allocation_single_thread(c: &mut Criterion) {
    c.bench_function("admission: id_allocate_single", |b| {
        b.iter_batched(
            IdAllocator::new,
            |alloc| {
                let id = alloc.allocate();
                criterion::black_box(id);
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_id_allocation_10k(c: &mut Criterion) {
    // Measures throughput of the counter-bump path: ids allocated back to
    // back within the same millisecond dominate this workload.
    c.bench_function("admission: id_allocate_10k", |b| {
        b.iter_batched(
            IdAllocator::new,
            |alloc| {
                for _ in 0..10_000u32 {
                    criterion::black_box(alloc.allocate());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn bench_supervisor_admit_uncontended(c: &mut Criterion) {
    c.bench_function("admission: submit_uncontended", |b| {
        b.to_async(
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap(),
        )
        .iter_batched(
            || {
                QuerySupervisor::new(
                    Arc::new(ImmediateBackend),
                    SupervisorConfig {
                        concurrency_limit: 1,
                        ..Default::default()
                    },
                )
            },
            |supervisor| async move {
                let handle = supervisor
                    .submit("bench prompt".to_string(), QueryOptions::default())
                    .await
                    .unwrap();
                drop(handle);
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_supervisor_submit_1k_under_limit(c: &mut Criterion) {
    // Exercises the semaphore acquire/release cycle 1,000 times against a
    // concurrency limit well above the batch size, so the cost measured is
    // admission overhead rather than queueing.
    c.bench_function("admission: submit_1k_under_limit", |b| {
        b.to_async(
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap(),
        )
        .iter_batched(
            || {
                QuerySupervisor::new(
                    Arc::new(ImmediateBackend),
                    SupervisorConfig {
                        concurrency_limit: 1_000,
                        ..Default::default()
                    },
                )
            },
            |supervisor| async move {
                for _ in 0..1_000u32 {
                    let handle = supervisor
                        .submit("bench prompt".to_string(), QueryOptions::default())
                        .await
                        .unwrap();
                    drop(handle);
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group! {
    name = journal_ids;
    config = Criterion::default()
        .sample_size(100)
        .measurement_time(Duration::from_secs(5));
    targets =
        bench_id_allocation_single_thread,
        bench_id_allocation_10k,
}

criterion_group! {
    name = supervisor_admission;
    config = Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(8));
    targets =
        bench_supervisor_admit_uncontended,
        bench_supervisor_submit_1k_under_limit,
}

criterion_main!(journal_ids, supervisor_admission);
