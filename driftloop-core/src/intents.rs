//! Intent-file loading and validation.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::types::{IntentDefinition, Mode};

#[derive(Debug, Deserialize)]
struct IntentFile {
    #[serde(default)]
    meta: Meta,
    intents: Vec<RawIntent>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    mode: Option<Mode>,
}

/// Mirrors `IntentDefinition` but leaves `mode` optional so `[meta].mode`
/// can supply a default.
#[derive(Debug, Deserialize)]
struct RawIntent {
    name: String,
    url: String,
    intent_type: crate::types::IntentType,
    #[serde(default)]
    domain_class: Option<String>,
    #[serde(default)]
    mode: Option<Mode>,
    engine: String,
    extraction: String,
    #[serde(default)]
    selector: Option<String>,
    interval_secs: u64,
    #[serde(default)]
    agent_instructions: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    mutations: Vec<crate::types::MutationStep>,
    #[serde(default)]
    expected_detections: u64,
}

/// Parse a TOML intent file into intent definitions. `[meta].mode` supplies
/// the default mode for any intent that omits an explicit `mode`.
#[instrument(skip(path))]
pub fn load_intents(path: &Path) -> Result<Vec<IntentDefinition>> {
    let content = std::fs::read_to_string(path)?;
    let parsed: IntentFile = toml::from_str(&content)?;
    let default_mode = parsed.meta.mode.unwrap_or(Mode::E2e);

    let intents = parsed
        .intents
        .into_iter()
        .map(|raw| IntentDefinition {
            name: raw.name,
            url: raw.url,
            intent_type: raw.intent_type,
            domain_class: raw.domain_class,
            mode: raw.mode.unwrap_or(default_mode),
            engine: raw.engine,
            extraction: raw.extraction,
            selector: raw.selector,
            interval_secs: raw.interval_secs,
            agent_instructions: raw.agent_instructions,
            tags: raw.tags,
            mutations: raw.mutations,
            expected_detections: raw.expected_detections,
        })
        .collect();

    Ok(intents)
}

/// Validate a set of intents, returning every violation found (empty means
/// valid). See §6 "Intent file" for the exact rules.
pub fn validate_intents(intents: &[IntentDefinition]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen_names: HashSet<&str> = HashSet::new();

    for intent in intents {
        if intent.name.trim().is_empty() {
            errors.push("intent has empty name".to_string());
        } else if !seen_names.insert(intent.name.as_str()) {
            errors.push(format!("duplicate intent name: {}", intent.name));
        }

        if intent.url.trim().is_empty() {
            errors.push(format!("intent {} has empty url", intent.name));
        }

        if matches!(intent.mode, Mode::E2e) && intent.mutations.is_empty() {
            errors.push(format!(
                "intent {} is mode=e2e but declares no mutations",
                intent.name
            ));
        }

        for mutation in &intent.mutations {
            if mutation.cycle == 0 {
                errors.push(format!(
                    "intent {} has a mutation with non-positive cycle",
                    intent.name
                ));
            }
            if mutation.field.trim().is_empty() {
                errors.push(format!(
                    "intent {} has a mutation with empty field",
                    intent.name
                ));
            }
        }
    }

    errors
}

/// Convenience wrapper returning an `Err` summarizing all validation
/// failures, for callers that just want a pass/fail.
pub fn validate_intents_or_err(intents: &[IntentDefinition]) -> Result<()> {
    let errors = validate_intents(intents);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Intent(errors.join("; ")))
    }
}
