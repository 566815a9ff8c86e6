use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use jobrelay_core::OwnerId;
use jobrelay_infra::tasks::{InMemoryTaskStore, NewTask, TaskStore};
use jobrelay_tasks::TaskType;
use serde_json::json;
use tokio::runtime::Runtime;

fn seed(rt: &Runtime, store: &InMemoryTaskStore, owner: OwnerId, n: usize) {
    rt.block_on(async {
        for i in 0..n {
            let new = NewTask::new(
                owner,
                TaskType::Scrape,
                json!({"portal": "linkedin", "keywords": format!("rust {i}")}),
            )
            .with_priority((i % 5) as i32);
            store.create(new).await.unwrap();
        }
    });
}

/// Single agent draining a queue of the given depth.
fn bench_claim_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("claim_next_latency");

    for depth in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*depth as u64));
        group.bench_with_input(BenchmarkId::new("drain_queue", depth), depth, |b, &depth| {
            b.iter_batched(
                || {
                    let store = InMemoryTaskStore::new();
                    let owner = OwnerId::new();
                    seed(&rt, &store, owner, depth);
                    (store, owner)
                },
                |(store, owner)| {
                    rt.block_on(async {
                        while let Some(task) = store.claim_next(owner, "bench-agent").await.unwrap() {
                            black_box(task);
                        }
                    })
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Several agents of the same owner racing for one queue.
fn bench_claim_contention(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("claim_next_contention");
    group.sample_size(50);

    for agents in [1usize, 4, 16].iter() {
        group.bench_with_input(BenchmarkId::new("agents", agents), agents, |b, &agents| {
            b.iter_batched(
                || {
                    let store = InMemoryTaskStore::arc();
                    let owner = OwnerId::new();
                    seed(&rt, &store, owner, 500);
                    (store, owner)
                },
                |(store, owner): (Arc<InMemoryTaskStore>, OwnerId)| {
                    rt.block_on(async {
                        let mut handles = Vec::with_capacity(agents);
                        for a in 0..agents {
                            let store = store.clone();
                            handles.push(tokio::spawn(async move {
                                let agent = format!("agent-{a}");
                                let mut claimed = 0usize;
                                while store.claim_next(owner, &agent).await.unwrap().is_some() {
                                    claimed += 1;
                                }
                                claimed
                            }));
                        }
                        let mut total = 0;
                        for h in handles {
                            total += h.await.unwrap();
                        }
                        assert_eq!(total, 500);
                    })
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_claim_latency, bench_claim_contention);
criterion_main!(benches);
