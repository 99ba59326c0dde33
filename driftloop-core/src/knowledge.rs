//! Persistent store of learned creation rules: load/save, merge-on-add,
//! confidence decay, domain-to-intent promotion, and the recommendation
//! lookup that intent creation consults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::config::{
    KNOWLEDGE_SCHEMA_VERSION, MIN_DOMAINS_FOR_PROMOTION, MIN_POSITIVE_EVENTS_FOR_PROMOTION,
    MIN_RULE_CONFIDENCE, PROMOTION_CONFIDENCE_DISCOUNT, decay_rate,
};
use crate::error::Result;
use crate::types::{CreationRecommendation, CreationRule, IntentType, RuleScope};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub schema_version: u32,
    pub rules: Vec<CreationRule>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self { schema_version: KNOWLEDGE_SCHEMA_VERSION, rules: Vec::new() }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

impl KnowledgeBase {
    /// Load the knowledge base from `path`, starting fresh if it doesn't
    /// exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Persist atomically: write to a sibling `.tmp` file, then rename
    /// over the target. The `.tmp` file is removed on any failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = tmp_path_for(path);
        let body = serde_json::to_string_pretty(self)?;
        if let Err(e) = std::fs::write(&tmp, body) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Insert a newly learned rule, replacing any existing rule that keys
    /// to the same `(intent_type, domain_class, rule)` only if the new
    /// one carries strictly higher confidence; the replacement keeps the
    /// original id and creation timestamp. An equal-or-lower-confidence
    /// match is discarded outright, with no side effect on the existing
    /// rule.
    pub fn add_rule(&mut self, mut rule: CreationRule) {
        let existing = self.rules.iter_mut().find(|r| {
            r.intent_type == rule.intent_type && r.domain_class == rule.domain_class && r.rule == rule.rule
        });

        match existing {
            Some(current) if rule.confidence > current.confidence => {
                rule.id = current.id;
                rule.created_at = current.created_at;
                *current = rule;
            }
            Some(_) => {}
            None => self.rules.push(rule),
        }
    }

    /// Rules applicable to `(intent_type, domain_class)`, domain-scoped
    /// matches first, then confidence descending within each group.
    pub fn get_rules(&self, intent_type: IntentType, domain_class: Option<&str>) -> Vec<&CreationRule> {
        let mut matches: Vec<&CreationRule> = self
            .rules
            .iter()
            .filter(|r| {
                r.intent_type == intent_type
                    && match r.scope {
                        RuleScope::Intent => true,
                        RuleScope::IntentDomain => r.domain_class.as_deref() == domain_class && domain_class.is_some(),
                    }
            })
            .collect();

        matches.sort_by(|a, b| {
            let a_domain_first = matches!(a.scope, RuleScope::IntentDomain);
            let b_domain_first = matches!(b.scope, RuleScope::IntentDomain);
            b_domain_first
                .cmp(&a_domain_first)
                .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
        });

        matches
    }

    /// Merge every applicable rule's recommendation fields into one,
    /// highest-precedence rule (first in `get_rules`'s ordering) wins any
    /// field it sets; lower-precedence rules only fill in fields still
    /// unset.
    pub fn get_recommendation(&self, intent_type: IntentType, domain_class: Option<&str>) -> CreationRecommendation {
        let mut out = CreationRecommendation::default();
        for rule in self.get_rules(intent_type, domain_class) {
            let r = &rule.recommendation;
            out.engine = out.engine.or_else(|| r.engine.clone());
            out.extraction = out.extraction.or_else(|| r.extraction.clone());
            out.interval_secs = out.interval_secs.or(r.interval_secs);
            out.instruction_template = out.instruction_template.or_else(|| r.instruction_template.clone());
            out.selector = out.selector.or_else(|| r.selector.clone());
        }
        out
    }

    /// Apply time-based confidence decay to every rule, evicting those
    /// that fall below the minimum confidence floor. Returns the number
    /// of rules removed.
    pub fn apply_decay(&mut self) -> usize {
        let now = Utc::now();
        for rule in self.rules.iter_mut() {
            let elapsed_days = (now - rule.last_validated).num_seconds().max(0) as f64 / 86_400.0;
            let decayed = rule.confidence - decay_rate(rule.rule_type) * elapsed_days;
            rule.confidence = decayed.max(0.0);
        }

        let before = self.rules.len();
        self.rules.retain(|r| r.confidence >= MIN_RULE_CONFIDENCE);
        before - self.rules.len()
    }

    /// Promote a domain-scoped rule to intent scope once it has been
    /// independently validated across enough distinct domains, applying a
    /// confidence discount to reflect the broader claim being made.
    pub fn try_promote_rule(&self, rule: &CreationRule) -> Option<CreationRule> {
        if !matches!(rule.scope, RuleScope::IntentDomain) {
            return None;
        }
        let distinct_domains: std::collections::HashSet<&str> =
            rule.source_domains.iter().map(String::as_str).collect();
        if distinct_domains.len() < MIN_DOMAINS_FOR_PROMOTION {
            return None;
        }
        if rule.positive_events_observed < MIN_POSITIVE_EVENTS_FOR_PROMOTION {
            return None;
        }

        let now = Utc::now();
        Some(CreationRule {
            id: Uuid::new_v4(),
            intent_type: rule.intent_type,
            domain_class: None,
            scope: RuleScope::Intent,
            rule: rule.rule.clone(),
            evidence: format!("promoted from {} domains: {}", distinct_domains.len(), rule.evidence),
            confidence: rule.confidence * PROMOTION_CONFIDENCE_DISCOUNT,
            positive_events_observed: rule.positive_events_observed,
            recommendation: rule.recommendation.clone(),
            source_domains: rule.source_domains.clone(),
            created_at: now,
            last_validated: now,
            rule_type: rule.rule_type,
        })
    }

    /// Apply promotion across every eligible domain-scoped rule, folding
    /// the result into the base rule set via `add_rule`.
    pub fn promote_eligible_rules(&mut self) -> usize {
        let candidates: Vec<CreationRule> = self
            .rules
            .iter()
            .filter_map(|r| self.try_promote_rule(r))
            .collect();
        let count = candidates.len();
        for rule in candidates {
            self.add_rule(rule);
        }
        count
    }

    /// A summary view suitable for embedding in a run report.
    pub fn export(&self) -> serde_json::Value {
        let mut by_intent: BTreeMap<String, usize> = BTreeMap::new();
        for rule in &self.rules {
            *by_intent.entry(rule.intent_type.to_string()).or_default() += 1;
        }
        json!({
            "schema_version": self.schema_version,
            "rule_count": self.rules.len(),
            "rules_by_intent_type": by_intent,
            "rules": self.rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn mk_rule(intent_type: IntentType, domain_class: Option<&str>, confidence: f64) -> CreationRule {
        let now = Utc::now();
        CreationRule {
            id: Uuid::new_v4(),
            intent_type,
            domain_class: domain_class.map(str::to_string),
            scope: if domain_class.is_some() { RuleScope::IntentDomain } else { RuleScope::Intent },
            rule: "extraction = selector".to_string(),
            evidence: "mean_a=0.5 mean_b=0.7".to_string(),
            confidence,
            positive_events_observed: 6,
            recommendation: CreationRecommendation { extraction: Some("selector".to_string()), ..Default::default() },
            source_domains: domain_class.map(|d| vec![d.to_string()]).unwrap_or_default(),
            created_at: now,
            last_validated: now,
            rule_type: crate::types::RuleType::Heuristic,
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("knowledge.json");
        let mut kb = KnowledgeBase::default();
        kb.add_rule(mk_rule(IntentType::Price, Some("retail"), 0.5));
        kb.save(&path).unwrap();

        let loaded = KnowledgeBase::load(&path).unwrap();
        assert_eq!(loaded.rules.len(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let kb = KnowledgeBase::load(&dir.path().join("nope.json")).unwrap();
        assert!(kb.rules.is_empty());
    }

    #[test]
    fn add_rule_replaces_only_on_strictly_higher_confidence() {
        let mut kb = KnowledgeBase::default();
        let first = mk_rule(IntentType::Price, Some("retail"), 0.5);
        let first_id = first.id;
        kb.add_rule(first);
        kb.add_rule(mk_rule(IntentType::Price, Some("retail"), 0.3));
        assert_eq!(kb.rules.len(), 1);
        assert_eq!(kb.rules[0].id, first_id);
        assert_eq!(kb.rules[0].confidence, 0.5);

        kb.add_rule(mk_rule(IntentType::Price, Some("retail"), 0.8));
        assert_eq!(kb.rules.len(), 1);
        assert_eq!(kb.rules[0].id, first_id, "replacement keeps original id");
        assert_eq!(kb.rules[0].confidence, 0.8);
    }

    #[test]
    fn get_rules_prefers_domain_scope_over_intent_scope() {
        let mut kb = KnowledgeBase::default();
        kb.add_rule(mk_rule(IntentType::Price, None, 0.9));
        kb.add_rule(mk_rule(IntentType::Price, Some("retail"), 0.2));

        let rules = kb.get_rules(IntentType::Price, Some("retail"));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].domain_class.as_deref(), Some("retail"));
    }

    #[test]
    fn decay_evicts_rules_below_floor() {
        let mut kb = KnowledgeBase::default();
        let mut rule = mk_rule(IntentType::Generic, None, 0.15);
        rule.rule_type = crate::types::RuleType::Structural;
        rule.last_validated = Utc::now() - Duration::days(10);
        kb.rules.push(rule);

        let removed = kb.apply_decay();
        assert_eq!(removed, 1);
        assert!(kb.rules.is_empty());
    }

    #[test]
    fn promotion_requires_multiple_domains_and_enough_events() {
        let mut rule = mk_rule(IntentType::Price, Some("retail"), 0.6);
        rule.source_domains = vec!["retail".to_string()];
        let kb = KnowledgeBase::default();
        assert!(kb.try_promote_rule(&rule).is_none(), "single domain should not promote");

        rule.source_domains = vec!["retail".to_string(), "travel".to_string()];
        rule.positive_events_observed = 5;
        let promoted = kb.try_promote_rule(&rule).expect("should promote");
        assert_eq!(promoted.scope, RuleScope::Intent);
        assert!(promoted.domain_class.is_none());
        assert!((promoted.confidence - 0.6 * PROMOTION_CONFIDENCE_DISCOUNT).abs() < 1e-9);
    }
}
