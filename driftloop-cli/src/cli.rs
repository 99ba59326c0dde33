//! Command-line flag surface.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use driftloop_core::config::OrchestratorConfig;

#[derive(Debug, Parser)]
#[command(name = "driftloop", about = "Closed-loop learning orchestrator for web-change-detection monitors")]
pub struct Cli {
    /// Path to the TOML intent file.
    #[arg(long)]
    pub intents: PathBuf,

    /// Run duration in hours.
    #[arg(long, default_value_t = 12.0)]
    pub duration: f64,

    /// Directory for persisted state, knowledge, reports, and logs.
    #[arg(long, env = "DRIFTLOOP_STATE_DIR", default_value = "/tmp/driftloop-orchestrate")]
    pub state_dir: PathBuf,

    /// Resume a prior run's state instead of starting fresh.
    #[arg(long)]
    pub resume: bool,

    /// Validate intents and print the plan without running any cycles.
    #[arg(long)]
    pub dry_run: bool,

    /// Enable debug-level console logging.
    #[arg(long)]
    pub verbose: bool,

    /// Mutation-server base URL, used by e2e-mode intents.
    #[arg(long, env = "DRIFTLOOP_E2E_SERVER", default_value = "http://127.0.0.1:8787")]
    pub e2e_server: String,

    /// Require the mutation server to be reachable even when no intent is e2e.
    #[arg(long)]
    pub live_validate: bool,

    /// Path to the probe binary.
    #[arg(long, env = "DRIFTLOOP_PROBE_BINARY", default_value = "kto")]
    pub probe_binary: String,
}

impl Cli {
    pub fn into_config(self) -> OrchestratorConfig {
        OrchestratorConfig {
            intents_path: self.intents,
            duration: Duration::from_secs_f64(self.duration * 3600.0),
            state_dir: self.state_dir,
            resume: self.resume,
            dry_run: self.dry_run,
            verbose: self.verbose,
            e2e_server: self.e2e_server,
            live_validate: self.live_validate,
            probe_binary: self.probe_binary,
            ..OrchestratorConfig::default()
        }
    }
}
