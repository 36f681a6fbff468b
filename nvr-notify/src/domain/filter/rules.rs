//! Filter rule types.

use serde::{Deserialize, Serialize};

/// Allow/block list pair.
///
/// The block list always wins. An empty allow list admits everything
/// that is not blocked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRule {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub block: Vec<String>,
}

impl ListRule {
    /// Create a new rule.
    pub fn new(allow: Vec<String>, block: Vec<String>) -> Self {
        Self { allow, block }
    }

    /// Whether `value` is on the block list.
    pub fn is_blocked(&self, value: &str) -> bool {
        self.block.iter().any(|b| b == value)
    }

    /// Whether `value` satisfies the allow list.
    pub fn is_allowed(&self, value: &str) -> bool {
        self.allow.is_empty() || self.allow.iter().any(|a| a == value)
    }
}

/// What to do with detections that are not inside any zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnzonedPolicy {
    #[default]
    Allow,
    Drop,
}

/// Zone rule: the allow/block lists plus the policy for unzoned detections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneRule {
    #[serde(default)]
    pub unzoned: UnzonedPolicy,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub block: Vec<String>,
}

impl ZoneRule {
    pub fn is_blocked(&self, zone: &str) -> bool {
        self.block.iter().any(|b| b == zone)
    }

    pub fn is_allowed(&self, zone: &str) -> bool {
        self.allow.is_empty() || self.allow.iter().any(|a| a == zone)
    }
}

/// The global rule set applied to every detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertRules {
    #[serde(default)]
    pub zones: ZoneRule,
    #[serde(default)]
    pub labels: ListRule,
    #[serde(default)]
    pub sub_labels: ListRule,
    /// Minimum score on a 0-100 scale; 0 disables the gate.
    #[serde(default)]
    pub min_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_empty_rule_permits_everything() {
        let rule = ListRule::default();
        for value in ["person", ""] {
            assert!(!rule.is_blocked(value));
            assert!(rule.is_allowed(value));
        }
    }

    #[test]
    fn test_block_wins_over_allow() {
        let rule = ListRule::new(strings(&["person"]), strings(&["person"]));
        assert!(rule.is_allowed("person"));
        assert!(rule.is_blocked("person"));
    }

    #[test]
    fn test_allow_list_restricts() {
        let rule = ListRule::new(strings(&["person", "car"]), vec![]);
        assert!(rule.is_allowed("car"));
        assert!(!rule.is_allowed("dog"));
        assert!(!rule.is_blocked("dog"));
    }

    #[test]
    fn test_rules_deserialize_with_defaults() {
        let rules: AlertRules = serde_json::from_str(r#"{"zones":{"unzoned":"drop"}}"#).unwrap();
        assert_eq!(rules.zones.unzoned, UnzonedPolicy::Drop);
        assert!(rules.labels.allow.is_empty());
        assert_eq!(rules.min_score, 0.0);
    }
}
