//! Checkout and scoped-work benchmarks against the mock driver.

use std::hint::black_box;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use dbpool::{Pool, PoolError};
use dbpool_testing::{MockDriver, test_target};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

fn pool(max: u32) -> Pool<MockDriver> {
    Pool::builder(MockDriver::new(), test_target())
        .max_connections(max)
        .ttl(Duration::from_secs(3600))
        .build()
        .unwrap()
}

fn bench_uncontended_checkout(c: &mut Criterion) {
    let rt = runtime();
    let pool = rt.block_on(async { pool(4) });

    c.bench_function("acquire_release_uncontended", |b| {
        b.to_async(&rt).iter(|| async {
            let conn = pool.acquire().await.unwrap();
            black_box(conn.id());
            conn.release(true).await
        });
    });
}

fn bench_with_session(c: &mut Criterion) {
    let rt = runtime();
    let pool = rt.block_on(async { pool(4) });

    c.bench_function("with_session", |b| {
        b.to_async(&rt).iter(|| async {
            pool.with_session(|mut session| {
                Box::pin(async move {
                    session.execute("SELECT 1").await.map_err(PoolError::operation)
                })
            })
            .await
            .unwrap()
        });
    });
}

fn bench_contended_checkout(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("acquire_release_contended");

    for max in [1u32, 2, 4] {
        let pool = rt.block_on(async { pool(max) });
        group.bench_with_input(BenchmarkId::new("tasks_8", max), &pool, |b, pool| {
            b.to_async(&rt).iter(|| async {
                let tasks: Vec<_> = (0..8)
                    .map(|_| {
                        let pool = pool.clone();
                        tokio::spawn(async move {
                            let conn = pool.acquire().await.unwrap();
                            conn.release(true).await
                        })
                    })
                    .collect();
                for task in tasks {
                    black_box(task.await.unwrap());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_uncontended_checkout,
    bench_with_session,
    bench_contended_checkout
);
criterion_main!(benches);
