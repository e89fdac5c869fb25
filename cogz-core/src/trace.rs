//! Simulation trace output.
//!
//! The engine writes its trace through an abstract [`TraceSink`]: either
//! `(time, module, description)` records or plain lines. The core never
//! assumes a graphical consumer.
//!
//! Sinks provided here:
//! - [`TracingSink`]: forwards records to `tracing` at `info` level.
//! - [`MemorySink`]: collects lines in a shared buffer (tests, tooling).
//! - [`JsonLinesSink`]: one JSON object per record, for recorded traces.
//! - [`NullSink`]: discards everything.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::event::{ModuleKind, Time};

/// One trace record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Simulated time.
    pub time: Time,
    /// Module that produced the record.
    pub module: ModuleKind,
    /// What happened.
    pub description: String,
}

impl TraceRecord {
    /// Fixed-width text rendering: `   1.250   procedural   fire start`.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "{:>8.3}   {:<12} {}",
            self.time,
            self.module.as_str(),
            self.description
        )
    }
}

/// Destination for trace output.
pub trait TraceSink {
    /// Record an event-level entry.
    fn record(&mut self, record: TraceRecord);

    /// Write a free-form line (model output, warnings, statistics).
    fn line(&mut self, text: &str);
}

/// Forwards the trace to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&mut self, record: TraceRecord) {
        info!(
            time = record.time,
            module = record.module.as_str(),
            "{}",
            record.description
        );
    }

    fn line(&mut self, text: &str) {
        info!("{text}");
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn record(&mut self, _record: TraceRecord) {}
    fn line(&mut self, _text: &str) {}
}

/// Collects rendered lines in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
    records: Arc<Mutex<Vec<TraceRecord>>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every line written so far (records rendered).
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Snapshot of the structured records written so far.
    #[must_use]
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().clone()
    }

    /// Whether any line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|line| line.contains(needle))
    }
}

impl TraceSink for MemorySink {
    fn record(&mut self, record: TraceRecord) {
        self.lines.lock().push(record.render());
        self.records.lock().push(record);
    }

    fn line(&mut self, text: &str) {
        self.lines.lock().push(text.to_owned());
    }
}

/// Writes each record as one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_value<T: Serialize>(&mut self, value: &T) {
        let result = serde_json::to_writer(&mut self.writer, value)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"));
        if let Err(e) = result {
            warn!(error = %e, "Failed to write trace record");
        }
    }
}

#[derive(Serialize)]
struct TextLine<'a> {
    line: &'a str,
}

impl<W: Write> TraceSink for JsonLinesSink<W> {
    fn record(&mut self, record: TraceRecord) {
        self.write_value(&record);
    }

    fn line(&mut self, text: &str) {
        self.write_value(&TextLine { line: text });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_clones_share_storage() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.record(TraceRecord {
            time: 0.05,
            module: ModuleKind::Procedural,
            description: "fire start".into(),
        });
        writer.line("done");
        assert_eq!(sink.lines().len(), 2);
        assert!(sink.contains("fire start"));
        assert_eq!(sink.records()[0].module, ModuleKind::Procedural);
    }

    #[test]
    fn json_lines_sink_round_trips_records() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.record(TraceRecord {
            time: 1.5,
            module: ModuleKind::Task,
            description: "stimulus".into(),
        });
        let bytes = sink.into_inner();
        let text = String::from_utf8(bytes).expect("utf8");
        let parsed: TraceRecord =
            serde_json::from_str(text.trim_end()).expect("valid json record");
        assert_eq!(parsed.module, ModuleKind::Task);
        assert!((parsed.time - 1.5).abs() < f64::EPSILON);
    }
}
