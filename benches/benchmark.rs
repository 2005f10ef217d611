use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use botty::brain::{Brain, Cancellation};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

#[derive(Clone)]
struct Tick;

trait Counted: Send + Sync {}
impl Counted for Tick {}

async fn dispatch(events: usize, with_capability: bool) -> usize {
    let brain = Arc::new(Brain::new());
    let counter = Arc::new(AtomicUsize::new(0));

    let c = counter.clone();
    brain.register_async(move |_: Tick| {
        c.fetch_add(1, Ordering::Relaxed);
        async {}
    });
    if with_capability {
        brain.declare_capability::<Tick, dyn Counted, _>(|t| t);
        let c = counter.clone();
        brain.register_async(move |_: Arc<dyn Counted>| {
            c.fetch_add(1, Ordering::Relaxed);
            async {}
        });
    }

    for _ in 0..events {
        brain.emit(Tick).ok();
    }
    let runner = brain.clone();
    let handle = tokio::spawn(async move { runner.handle_events().await });
    brain.shutdown(Cancellation::new()).await.ok();
    handle.await.ok();

    counter.load(Ordering::Relaxed)
}

fn bench_dispatch(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("dispatch");
    for events in [100usize, 1_000] {
        group.throughput(Throughput::Elements(events as u64));
        group.bench_with_input(BenchmarkId::new("exact", events), &events, |b, &events| {
            b.to_async(&runtime).iter(|| dispatch(events, false))
        });
        group.bench_with_input(
            BenchmarkId::new("exact+capability", events),
            &events,
            |b, &events| b.to_async(&runtime).iter(|| dispatch(events, true)),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
