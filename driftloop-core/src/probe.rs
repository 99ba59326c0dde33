//! Adapter over the external change-detection "probe" binary.
//!
//! The probe is invoked as a subprocess; every call enforces a timeout and
//! degrades to an `ok=false`/`error`-bearing result rather than hanging or
//! propagating a panic.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{instrument, warn};

use crate::types::Observation;

/// Environment variable used to isolate the probe's database file per run.
pub const PROBE_DB_ENV: &str = "PROBE_DB";

/// Result of a probe management call (`create_watch`, `delete_watch`).
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub ok: bool,
    pub name: String,
    pub error: Option<String>,
}

/// Engine selection for a watch, mapped to the probe's CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Http,
    Playwright,
    Rss,
    Shell,
}

impl Engine {
    fn parse(s: &str) -> Self {
        match s {
            "playwright" => Engine::Playwright,
            "rss" => Engine::Rss,
            "shell" => Engine::Shell,
            _ => Engine::Http,
        }
    }
}

/// Extraction strategy for a watch, mapped to the probe's CLI flags.
#[derive(Debug, Clone)]
pub enum Extraction {
    Auto,
    Selector(String),
    Full,
    JsonLd,
    Meta,
}

impl Extraction {
    fn parse(extraction: &str, selector: Option<&str>) -> Self {
        match extraction {
            "selector" => Extraction::Selector(selector.unwrap_or_default().to_string()),
            "full" => Extraction::Full,
            "json_ld" => Extraction::JsonLd,
            "meta" => Extraction::Meta,
            _ => match selector {
                Some(sel) if !sel.is_empty() => Extraction::Selector(sel.to_string()),
                _ => Extraction::Auto,
            },
        }
    }
}

/// Parameters for creating a watch, mirroring §6's probe CLI surface.
#[derive(Debug, Clone)]
pub struct CreateWatchRequest<'a> {
    pub name: &'a str,
    pub url: &'a str,
    pub engine: &'a str,
    pub extraction: &'a str,
    pub selector: Option<&'a str>,
    pub interval_secs: u64,
    pub agent_instructions: Option<&'a str>,
    pub tags: &'a [String],
}

/// The probe's external interface, abstracted so tests can substitute a
/// fake implementation instead of spawning a real subprocess.
#[async_trait]
pub trait ProbeAdapter: Send + Sync {
    async fn create_watch(&self, req: CreateWatchRequest<'_>, db_path: &str) -> ProbeOutcome;
    async fn run_check(&self, watch_name: &str, cycle: u64, db_path: &str) -> Observation;
    async fn list_watches(&self, db_path: &str) -> Vec<Value>;
    async fn delete_watch(&self, watch_name: &str, db_path: &str) -> ProbeOutcome;
}

/// `ProbeAdapter` backed by invoking the configured probe binary as a
/// subprocess.
pub struct ProcessProbeAdapter {
    binary: String,
    timeout: Duration,
}

impl ProcessProbeAdapter {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self { binary: binary.into(), timeout }
    }

    async fn run(&self, args: &[String], db_path: &str) -> std::result::Result<std::process::Output, String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .env(PROBE_DB_ENV, db_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let fut = cmd.output();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(format!("spawn failed: {e}")),
            Err(_) => Err("timeout".to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawCheckResult {
    #[serde(default)]
    changed: bool,
    #[serde(default)]
    content_hash: Option<String>,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    diff_snippet: Option<String>,
    #[serde(default)]
    diff: Option<String>,
    #[serde(default)]
    agent: Option<AgentBlock>,
    #[serde(default)]
    agent_notified: Option<bool>,
    #[serde(default)]
    agent_title: Option<String>,
    #[serde(default)]
    agent_summary: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AgentBlock {
    #[serde(default)]
    notified: Option<bool>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

const DIFF_TRUNCATE_LEN: usize = 2000;

#[async_trait]
impl ProbeAdapter for ProcessProbeAdapter {
    #[instrument(skip(self, req))]
    async fn create_watch(&self, req: CreateWatchRequest<'_>, db_path: &str) -> ProbeOutcome {
        let mut args = vec![
            "new".to_string(),
            req.url.to_string(),
            "--name".to_string(),
            req.name.to_string(),
            "--yes".to_string(),
            "--interval".to_string(),
            req.interval_secs.to_string(),
        ];

        match Engine::parse(req.engine) {
            Engine::Http => {}
            Engine::Playwright => args.push("--js".to_string()),
            Engine::Rss => args.push("--rss".to_string()),
            Engine::Shell => args.push("--shell".to_string()),
        }

        match Extraction::parse(req.extraction, req.selector) {
            Extraction::Auto => {}
            Extraction::Selector(sel) => {
                args.push("--selector".to_string());
                args.push(sel);
            }
            Extraction::Full => args.push("--full".to_string()),
            Extraction::JsonLd => args.push("--json-ld".to_string()),
            Extraction::Meta => args.push("--meta".to_string()),
        }

        if let Some(instructions) = req.agent_instructions {
            args.push("--agent".to_string());
            args.push("--agent-instructions".to_string());
            args.push(instructions.to_string());
        }

        for tag in req.tags {
            args.push("--tag".to_string());
            args.push(tag.clone());
        }

        match self.run(&args, db_path).await {
            Ok(output) if output.status.success() => ProbeOutcome {
                ok: true,
                name: req.name.to_string(),
                error: None,
            },
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let truncated: String = stderr.chars().take(500).collect();
                warn!(name = req.name, %truncated, "probe create_watch exited non-zero");
                ProbeOutcome { ok: false, name: req.name.to_string(), error: Some(truncated) }
            }
            Err(e) => {
                warn!(name = req.name, error = %e, "probe create_watch failed");
                ProbeOutcome { ok: false, name: req.name.to_string(), error: Some(e) }
            }
        }
    }

    #[instrument(skip(self))]
    async fn run_check(&self, watch_name: &str, cycle: u64, db_path: &str) -> Observation {
        let timestamp = Utc::now();
        let args = vec!["test".to_string(), watch_name.to_string(), "--json".to_string()];

        let output = match self.run(&args, db_path).await {
            Ok(output) => output,
            Err(e) => {
                return Observation::Error { cycle, timestamp, error: e };
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let truncated: String = stderr.chars().take(500).collect();
            return Observation::Error { cycle, timestamp, error: truncated };
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: RawCheckResult = match serde_json::from_str(&stdout) {
            Ok(v) => v,
            Err(e) => {
                return Observation::Error {
                    cycle,
                    timestamp,
                    error: format!("json_parse_error: {e}"),
                };
            }
        };

        let mut diff_snippet = parsed.diff_snippet.or(parsed.diff);
        if let Some(ref mut snippet) = diff_snippet {
            if snippet.len() > DIFF_TRUNCATE_LEN {
                let mut truncated: String = snippet.chars().take(DIFF_TRUNCATE_LEN).collect();
                truncated.push_str("\n... (truncated)");
                *snippet = truncated;
            }
        }

        let agent_notified = parsed.agent.as_ref().and_then(|a| a.notified).or(parsed.agent_notified);
        let agent_title = parsed
            .agent
            .as_ref()
            .and_then(|a| a.title.clone())
            .or(parsed.agent_title);
        let agent_summary = parsed
            .agent
            .as_ref()
            .and_then(|a| a.summary.clone())
            .or(parsed.agent_summary);

        Observation::Ok {
            cycle,
            timestamp,
            changed: parsed.changed,
            content_hash: parsed.content_hash.or(parsed.hash),
            diff_snippet,
            agent_notified,
            agent_title,
            agent_summary,
        }
    }

    #[instrument(skip(self))]
    async fn list_watches(&self, db_path: &str) -> Vec<Value> {
        let args = vec!["list".to_string(), "--json".to_string()];
        let output = match self.run(&args, db_path).await {
            Ok(output) if output.status.success() => output,
            _ => return Vec::new(),
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        match serde_json::from_str::<Value>(&stdout) {
            Ok(Value::Array(items)) => items,
            Ok(Value::Object(map)) => map
                .get("watches")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    #[instrument(skip(self))]
    async fn delete_watch(&self, watch_name: &str, db_path: &str) -> ProbeOutcome {
        let args = vec!["delete".to_string(), watch_name.to_string(), "--yes".to_string()];
        match self.run(&args, db_path).await {
            Ok(output) if output.status.success() => {
                ProbeOutcome { ok: true, name: watch_name.to_string(), error: None }
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                ProbeOutcome { ok: false, name: watch_name.to_string(), error: Some(stderr) }
            }
            Err(e) => ProbeOutcome { ok: false, name: watch_name.to_string(), error: Some(e) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prefers_explicit_selector_over_auto() {
        match Extraction::parse("auto", Some("h1.price")) {
            Extraction::Selector(sel) => assert_eq!(sel, "h1.price"),
            other => panic!("expected selector extraction, got {other:?}"),
        }
    }

    #[test]
    fn engine_unknown_falls_back_to_http() {
        assert_eq!(Engine::parse("carrier-pigeon"), Engine::Http);
    }
}
