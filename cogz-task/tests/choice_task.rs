//! End-to-end choice-reaction runs: model file → builder → motor module →
//! task scoring → batch analysis.

use std::io::Write;

use cogz_core::RunOutcome;
use cogz_core::task::Task;
use cogz_core::trace::MemorySink;
use cogz_task::{ModelFile, ScriptedTask, run_batch};

const CHOICE_MODEL: &str = r#"
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
inter_trial = 1.0
trials = [{ stimulus = "value a", key = "a" }, { stimulus = "value b", key = "b" }]
"#;

#[test]
fn model_file_runs_the_choice_task() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(CHOICE_MODEL.as_bytes()).expect("write");
    let model_file = ModelFile::from_file(file.path()).expect("parse");

    let sink = MemorySink::new();
    let mut model = model_file
        .builder(Some(1))
        .trace_sink(sink.clone())
        .build()
        .expect("build");

    assert_eq!(model.run_until_idle(), RunOutcome::Idle);
    assert!(sink.contains("output-key a"));
    assert!(sink.contains("output-key b"));

    let results = model.task().expect("task").results();
    assert_eq!(results["trials"], 2.0);
    assert!((results["accuracy"] - 1.0).abs() < 1e-12);
    // 0.05 s to fire, 0.25 s to prepare the key press
    assert!((results["rt"] - 0.30).abs() < 1e-9, "rt = {}", results["rt"]);
}

#[test]
fn responses_are_recorded_per_trial() {
    let model_file = ModelFile::from_toml(CHOICE_MODEL).expect("parse");
    let mut model = model_file.builder(Some(5)).build().expect("build");
    model.run_until_idle();

    let mut task = model.take_task().expect("task");
    let results = task.results();
    assert_eq!(results["trials"], 2.0);
    // the scripted task only reacts to key presses; other callbacks are no-ops
    task.speak("ignored");
    assert_eq!(task.results(), results);

    let direct = ScriptedTask::new(Vec::new());
    assert!(direct.responses().is_empty());
}

#[test]
fn batch_analysis_averages_the_runs() {
    let model_file = ModelFile::from_toml(CHOICE_MODEL).expect("parse");
    let report = run_batch(3, 40, None, |seed| model_file.builder(Some(seed)).build()).expect("batch");

    assert_eq!(report.runs.len(), 3);
    assert!((report.analysis["accuracy"] - 1.0).abs() < 1e-12);
    assert!((report.analysis["rt"] - 0.30).abs() < 1e-9);
    assert!(report.runs.iter().all(|r| r.stats.fired == 4));
}
