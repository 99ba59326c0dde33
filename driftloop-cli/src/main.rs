mod cli;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use driftloop_core::config::OrchestratorConfig;
use driftloop_core::cycle::{maybe_bridge, CycleRunner};
use driftloop_core::intents::{load_intents, validate_intents_or_err};
use driftloop_core::knowledge::KnowledgeBase;
use driftloop_core::probe::{CreateWatchRequest, ProbeAdapter, ProcessProbeAdapter};
use driftloop_core::report::{generate_report, render_json, render_text};
use driftloop_core::state::{load_state, min_interval_secs, save_state_atomic};
use driftloop_core::types::{Mode, MonitorState, RunState};
use driftloop_core::{logging, Error};

use cli::Cli;

const STATE_SAVE_INTERVAL: Duration = Duration::from_secs(60);
const IDLE_SLICE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.into_config();

    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("creating state dir {}", config.state_dir.display()))?;

    logging::init(&config.state_dir, config.log_max_bytes, config.verbose)
        .context("installing logging")?;

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "orchestration failed");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: OrchestratorConfig) -> anyhow::Result<()> {
    let intents = load_intents(&config.intents_path)
        .with_context(|| format!("loading intents from {}", config.intents_path.display()))?;
    validate_intents_or_err(&intents).context("intent validation failed")?;

    if intents.is_empty() {
        bail!("intent file declares no intents");
    }

    if config.dry_run {
        info!(count = intents.len(), "dry run: intents validated, no cycles will run");
        for intent in &intents {
            println!("{}: {} ({:?}, {:?})", intent.name, intent.url, intent.intent_type, intent.mode);
        }
        return Ok(());
    }

    let state_path = config.state_dir.join("state.json");
    let knowledge_path = config.state_dir.join("knowledge.json");
    let db_path = config.state_dir.join("test.db");

    let default_mode = intents.first().map(|i| i.mode).unwrap_or(Mode::E2e);
    let mut state = if config.resume {
        load_state(&state_path).unwrap_or_else(|| RunState::new(default_mode))
    } else {
        RunState::new(default_mode)
    };

    let mut knowledge = KnowledgeBase::load(&knowledge_path).unwrap_or_default();
    let decayed = knowledge.apply_decay();
    if decayed > 0 {
        info!(removed = decayed, "decayed knowledge-base rules below confidence floor");
    }
    let promoted = knowledge.promote_eligible_rules();
    if promoted > 0 {
        info!(promoted, "promoted domain-scoped rules to intent scope");
    }

    let any_e2e = intents.iter().any(|i| matches!(i.mode, Mode::E2e));
    let bridge = maybe_bridge(&config, any_e2e || config.live_validate).await;
    if any_e2e && bridge.is_none() {
        bail!("mutation server required by one or more e2e intents is unreachable at {}", config.e2e_server);
    }

    let probe = Arc::new(ProcessProbeAdapter::new(config.probe_binary.clone(), config.probe_timeout));

    if !config.resume {
        let mut created = 0usize;
        for intent in &intents {
            let watch_name = format!("run_{}", intent.name);
            let req = CreateWatchRequest {
                name: &watch_name,
                url: &intent.url,
                engine: &intent.engine,
                extraction: &intent.extraction,
                selector: intent.selector.as_deref(),
                interval_secs: intent.interval_secs,
                agent_instructions: intent.agent_instructions.as_deref(),
                tags: &intent.tags,
            };
            let outcome = probe.create_watch(req, db_path.to_str().unwrap_or_default()).await;
            if outcome.ok {
                created += 1;
                state.monitors.insert(intent.name.clone(), MonitorState::new(intent, watch_name));
            } else {
                warn!(intent = intent.name, error = ?outcome.error, "failed to create watch");
            }
        }
        if created == 0 {
            bail!("probe failed to create any watches");
        }
    }

    let runner = CycleRunner::new(probe.clone(), bridge, db_path.to_str().unwrap_or_default().to_string());

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(shutdown.clone());

    let deadline = Instant::now() + config.duration;
    let mut last_save = Instant::now();

    while Instant::now() < deadline && !shutdown.load(Ordering::SeqCst) {
        runner.run_all_due(&mut state, &mut knowledge).await;

        if last_save.elapsed() >= STATE_SAVE_INTERVAL {
            if let Err(e) = save_state_atomic(&state, &state_path) {
                warn!(error = %e, "periodic state save failed, will retry next interval");
            }
            last_save = Instant::now();
        }

        let sleep_for = Duration::from_secs(min_interval_secs(&state)).max(IDLE_SLICE);
        let mut remaining = sleep_for;
        while remaining > Duration::ZERO && !shutdown.load(Ordering::SeqCst) {
            let slice = remaining.min(IDLE_SLICE);
            tokio::time::sleep(slice).await;
            remaining -= slice;
        }
    }

    finalize(&config, &mut state, &mut knowledge, &probe, &db_path, &state_path, &knowledge_path).await?;
    Ok(())
}

fn spawn_signal_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        shutdown.store(true, Ordering::SeqCst);
    });
}

async fn finalize(
    config: &OrchestratorConfig,
    state: &mut RunState,
    knowledge: &mut KnowledgeBase,
    probe: &Arc<ProcessProbeAdapter>,
    db_path: &std::path::Path,
    state_path: &std::path::Path,
    knowledge_path: &std::path::Path,
) -> anyhow::Result<()> {
    if let Err(e) = save_state_atomic(state, state_path) {
        warn!(error = %e, "final state save failed");
    }
    if let Err(e) = knowledge.save(knowledge_path) {
        warn!(error = %e, "final knowledge save failed");
    }

    let report = generate_report(state, knowledge);
    let report_json_path = config.state_dir.join("report.json");
    let report_txt_path = config.state_dir.join("report.txt");
    std::fs::write(&report_json_path, serde_json::to_string_pretty(&render_json(&report))?)
        .map_err(Error::from)?;
    std::fs::write(&report_txt_path, render_text(&report)).map_err(Error::from)?;

    if !config.resume {
        for monitor in state.monitors.values() {
            let outcome = probe.delete_watch(&monitor.watch_name, db_path.to_str().unwrap_or_default()).await;
            if !outcome.ok {
                warn!(watch = monitor.watch_name, error = ?outcome.error, "failed to delete watch during cleanup");
            }
        }
    }

    println!(
        "run {} complete: {} total cycles across {} monitors, {} learned rules",
        state.run_id,
        state.total_cycles,
        state.monitors.len(),
        knowledge.rules.len()
    );
    Ok(())
}
