//! In-memory run state and its atomic persistence to `state.json`.

use std::path::Path;

use tracing::{instrument, warn};

use crate::error::Result;
use crate::types::{Mode, RunState};

/// Load a previously persisted `RunState`, or `None` if the file does not
/// exist or fails to parse (the caller falls back to a fresh state).
#[instrument(skip(path))]
pub fn load_state(path: &Path) -> Option<RunState> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "no prior run state to resume");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "run state failed to parse, starting fresh");
            None
        }
    }
}

/// Persist `RunState` atomically: write to a sibling `.tmp` file, then
/// rename over the target. The temporary file is removed on failure.
#[instrument(skip(state, path))]
pub fn save_state_atomic(state: &RunState, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = tmp_path_for(path);
    let json = serde_json::to_string_pretty(state)?;

    let write_result = std::fs::write(&tmp_path, json);
    if let Err(e) = write_result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    Ok(())
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::path::PathBuf::from(tmp)
}

/// Minimum monitor interval across a run state, used to size the top-level
/// scheduling sleep. Defaults to 60 seconds when there are no monitors
/// with a positive interval.
pub fn min_interval_secs(state: &RunState) -> u64 {
    state
        .monitors
        .values()
        .map(|m| m.interval_secs)
        .filter(|&secs| secs > 0)
        .min()
        .unwrap_or(60)
}

/// Default run mode when the intent file is empty (should not happen in
/// practice; validation requires at least one intent).
pub fn default_mode() -> Mode {
    Mode::E2e
}
