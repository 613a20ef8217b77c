use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use stategraph_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointSaver, InMemoryCheckpointSaver, PendingInterrupt,
};

fn sample_state() -> serde_json::Value {
    json!({
        "messages": (0..20).map(|i| json!({ "id": i, "content": "hello" })).collect::<Vec<_>>(),
        "count": 20,
    })
}

fn checkpoint_append_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = CheckpointConfig::new("bench-thread");
    let state = sample_state();

    c.bench_function("checkpoint append", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let saver = InMemoryCheckpointSaver::new();
                for step in 1..=10 {
                    let checkpoint = Checkpoint::new(&config, step, state.clone());
                    saver.append(&config, black_box(checkpoint)).await.unwrap();
                }
            })
        });
    });
}

fn checkpoint_latest_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = CheckpointConfig::new("bench-thread");
    let saver = InMemoryCheckpointSaver::new();
    runtime.block_on(async {
        for step in 1..=100 {
            let checkpoint = Checkpoint::new(&config, step, sample_state())
                .with_pending(vec![PendingInterrupt::new("ask", 0, json!("question"))]);
            saver.append(&config, checkpoint).await.unwrap();
        }
    });

    c.bench_function("checkpoint get_latest", |b| {
        b.iter(|| runtime.block_on(saver.get_latest(black_box(&config))).unwrap());
    });
}

criterion_group!(benches, checkpoint_append_benchmark, checkpoint_latest_benchmark);
criterion_main!(benches);
