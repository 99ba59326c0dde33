//! Ambient logging stack: console output via `tracing_subscriber::fmt`,
//! plus a dual-sink file layer (human-readable `.log` and structured
//! `.jsonl`) with size-based rotation, since the time-based rollers in
//! the ecosystem don't fit a long single-process run.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::json;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// The learning channel's tracing target; modeled as a target string
/// rather than a sixth `Level` (tracing only defines five).
pub const LEARNING_TARGET: &str = "driftloop::learning";

struct RotatingFile {
    path: PathBuf,
    file: File,
    max_bytes: u64,
    written: u64,
}

impl RotatingFile {
    fn open(path: PathBuf, max_bytes: u64) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self { path, file, max_bytes, written })
    }

    fn write_line(&mut self, line: &str) {
        if self.written >= self.max_bytes {
            self.rotate();
        }
        if writeln!(self.file, "{line}").is_ok() {
            self.written += line.len() as u64 + 1;
        }
    }

    fn rotate(&mut self) {
        let rotated = self.path.with_extension(format!(
            "{}.1",
            self.path.extension().and_then(|e| e.to_str()).unwrap_or("log")
        ));
        let _ = std::fs::rename(&self.path, &rotated);
        if let Ok(file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            self.file = file;
            self.written = 0;
        }
    }
}

/// A `tracing_subscriber::Layer` writing every event to both a
/// human-readable text log and a structured JSON-lines log, rotating
/// each at `max_bytes`.
pub struct OrchestrationLayer {
    text: Mutex<RotatingFile>,
    jsonl: Mutex<RotatingFile>,
}

impl OrchestrationLayer {
    pub fn new(dir: &Path, max_bytes: u64) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            text: Mutex::new(RotatingFile::open(dir.join("orchestrate.log"), max_bytes)?),
            jsonl: Mutex::new(RotatingFile::open(dir.join("orchestrate.jsonl"), max_bytes)?),
        })
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(rendered);
        } else {
            self.fields.insert(field.name().to_string(), json!(rendered));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), json!(value));
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }
}

fn level_tag(level: &Level, target: &str) -> &'static str {
    if target == LEARNING_TARGET {
        return "learning";
    }
    match *level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        Level::DEBUG => "debug",
        Level::TRACE => "trace",
    }
}

impl<S: Subscriber> Layer<S> for OrchestrationLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        let metadata = event.metadata();
        let tag = level_tag(metadata.level(), metadata.target());
        let message = collector.message.clone().unwrap_or_default();
        let timestamp = chrono::Utc::now().to_rfc3339();

        let mut text_line = format!("{timestamp} [{tag}] {}: {message}", metadata.target());
        for (k, v) in &collector.fields {
            text_line.push_str(&format!(" {k}={v}"));
        }
        if let Ok(mut text) = self.text.lock() {
            text.write_line(&text_line);
        }

        let mut record = collector.fields.clone();
        record.insert("timestamp".to_string(), json!(timestamp));
        record.insert("level".to_string(), json!(tag));
        record.insert("target".to_string(), json!(metadata.target()));
        record.insert("message".to_string(), json!(message));
        if let Ok(mut jsonl) = self.jsonl.lock() {
            jsonl.write_line(&serde_json::Value::Object(record).to_string());
        }
    }
}

/// Install the console + file logging stack. `RUST_LOG` (or `verbose`
/// forcing `debug`) drives the `EnvFilter`; the file layer always runs
/// at `trace` so nothing is lost to rotation pressure.
pub fn init(state_dir: &Path, max_bytes: u64, verbose: bool) -> std::io::Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let default_directive = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let file_layer = OrchestrationLayer::new(state_dir, max_bytes)?;
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rotating_file_renames_on_overflow() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.log");
        let mut rf = RotatingFile::open(path.clone(), 10).unwrap();
        rf.write_line("0123456789"); // exactly at the limit, next write rotates
        rf.write_line("more");
        assert!(path.with_extension("log.1").exists());
    }

    #[test]
    fn level_tag_maps_learning_target_regardless_of_level() {
        assert_eq!(level_tag(&Level::INFO, LEARNING_TARGET), "learning");
        assert_eq!(level_tag(&Level::WARN, "driftloop::cycle"), "warn");
    }
}
