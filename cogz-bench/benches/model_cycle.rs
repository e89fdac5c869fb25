//! COGZ Benchmark Suite
//!
//! Targets:
//!   event_queue_1000 ................ < 100μs
//!   retrieval_from_500_chunks ....... < 200μs
//!   conflict_resolution_50_rules .... < 50μs per cycle
//!   choice_task_batch_10 ............ < 20ms

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;

use cogz_core::chunk::{Chunk, ChunkTypes};
use cogz_core::config::DeclarativeConfig;
use cogz_core::declarative::{ActivationContext, DeclarativeMemory};
use cogz_core::event::{Event, EventAction, EventQueue, ModuleKind};
use cogz_core::trace::NullSink;
use cogz_core::{Interner, ModelBuilder, ProductionDraft};
use cogz_task::{ModelFile, run_batch};

/// Benchmark: schedule then drain 1000 events with many ties.
fn bench_event_queue(c: &mut Criterion) {
    c.bench_function("event_queue_1000", |b| {
        b.iter(|| {
            let mut queue = EventQueue::new();
            for i in 0..1000u32 {
                let module = if i % 7 == 0 { ModuleKind::Task } else { ModuleKind::Declarative };
                queue.schedule(Event::new(f64::from(i % 50) * 0.05, module, "", EventAction::Marker));
            }
            while let Some(event) = queue.pop_earliest() {
                black_box(event);
            }
        });
    });
}

/// Benchmark: one retrieval against 500 chunks with base-level learning and noise.
fn bench_retrieval(c: &mut Criterion) {
    let mut symbols = Interner::new();
    let mut memory = DeclarativeMemory::new();
    let kind = symbols.intern("kind");
    let value = symbols.intern("value");
    let fact = symbols.intern("fact");
    for i in 0..500u32 {
        let name = symbols.intern(&format!("fact-{i}"));
        let v = symbols.intern_number(f64::from(i % 25));
        let chunk = Chunk::new(name).with_slot(kind, fact).with_slot(value, v);
        memory.add(chunk, false, f64::from(i) * 0.01, true, &mut symbols);
    }
    let config = DeclarativeConfig {
        base_level_decay: Some(0.5),
        activation_noise: Some(0.25),
        retrieval_threshold: -5.0,
        ..DeclarativeConfig::default()
    };
    let types = ChunkTypes::new();
    let target = symbols.intern_number(7.0);
    let request = Chunk::new(symbols.intern("request")).with_slot(kind, fact).with_slot(value, target);
    let mut rng = StdRng::seed_from_u64(42);

    c.bench_function("retrieval_from_500_chunks", |b| {
        b.iter(|| {
            let ctx = ActivationContext {
                now: 10.0,
                config: &config,
                sources: &[],
            };
            let retrieval = memory.find_retrieval(black_box(&request), &ctx, &types, &mut symbols, &mut rng);
            black_box(retrieval);
        });
    });
}

/// Benchmark: conflict resolution over 50 productions, 49 of which fail late.
fn bench_conflict_resolution(c: &mut Criterion) {
    let mut builder = ModelBuilder::new()
        .parameter(":seed", "1")
        .parameter(":egs", "0.2")
        .chunk("g", "state loop step 1 mode fast")
        .goal("g")
        .trace_sink(NullSink);
    for i in 0..49 {
        builder = builder.add_production(
            ProductionDraft::new(format!("miss-{i}"))
                .when("=goal>", format!("state loop step 1 mode slow-{i}"))
                .then("=goal>", "state loop"),
        );
    }
    builder = builder.add_production(
        ProductionDraft::new("hit")
            .when("=goal>", "state loop step 1 mode fast")
            .then("=goal>", "state loop"),
    );
    let mut model = builder.build().expect("model builds");

    c.bench_function("conflict_resolution_50_rules", |b| {
        b.iter(|| {
            model.step();
            black_box(model.time());
        });
    });
}

const CHOICE: &str = r#"
goal = "g"

[[chunk]]
name = "g"
slots = "state attend"

[[production]]
name = "respond"
when = [["=goal>", "state attend"], ["=visual>", "value =v"], ["?manual>", "state free"]]
then = [["+manual>", "cmd press-key key =v"], ["=goal>", "state responded"]]

[[production]]
name = "reset"
when = [["=goal>", "state responded"], ["?manual>", "state free"]]
then = [["=goal>", "state attend"]]

[task]
trials = [{ stimulus = "value a", key = "a" }, { stimulus = "value b", key = "b" }]
"#;

/// Benchmark: ten complete choice-task runs including analysis.
fn bench_choice_batch(c: &mut Criterion) {
    let file = ModelFile::from_toml(CHOICE).expect("model file");
    c.bench_function("choice_task_batch_10", |b| {
        b.iter(|| {
            let report = run_batch(10, 0, None, |seed| {
                file.builder(Some(seed)).trace_sink(NullSink).build()
            })
            .expect("batch");
            black_box(report);
        });
    });
}

criterion_group!(
    benches,
    bench_event_queue,
    bench_retrieval,
    bench_conflict_resolution,
    bench_choice_batch,
);
criterion_main!(benches);
