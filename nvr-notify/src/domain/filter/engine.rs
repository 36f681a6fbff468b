//! Detection filter evaluation.
//!
//! Stages run in a fixed order and the first failing stage decides:
//! zone, label, minimum score, sub-label. Evaluation never mutates the event.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::rules::{AlertRules, ListRule, UnzonedPolicy};
use crate::domain::event::DetectionEvent;

/// The stage that rejected a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FilterStage {
    Zone,
    Label,
    Score,
    SubLabel,
}

/// Reason why a detection was dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DropReason {
    /// No zones and unzoned detections are dropped.
    Unzoned,
    /// A zone is on the block list.
    BlockedZone { zone: String },
    /// None of the zones is on the allow list.
    ZoneNotAllowed { zones: Vec<String> },
    BlockedLabel { label: String },
    LabelNotAllowed { label: String },
    ScoreBelowMinimum { score: f64, min_score: f64 },
    BlockedSubLabel { sub_label: String },
    SubLabelNotAllowed { sub_label: String },
}

impl DropReason {
    /// The stage this reason belongs to.
    pub fn stage(&self) -> FilterStage {
        match self {
            Self::Unzoned | Self::BlockedZone { .. } | Self::ZoneNotAllowed { .. } => {
                FilterStage::Zone
            }
            Self::BlockedLabel { .. } | Self::LabelNotAllowed { .. } => FilterStage::Label,
            Self::ScoreBelowMinimum { .. } => FilterStage::Score,
            Self::BlockedSubLabel { .. } | Self::SubLabelNotAllowed { .. } => FilterStage::SubLabel,
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unzoned => write!(f, "detection is outside every zone"),
            Self::BlockedZone { zone } => write!(f, "zone '{}' is blocked", zone),
            Self::ZoneNotAllowed { zones } => {
                write!(f, "zones [{}] are not allowed", zones.join(", "))
            }
            Self::BlockedLabel { label } => write!(f, "label '{}' is blocked", label),
            Self::LabelNotAllowed { label } => write!(f, "label '{}' is not allowed", label),
            Self::ScoreBelowMinimum { score, min_score } => {
                write!(f, "score {:.1} is below minimum {:.1}", score, min_score)
            }
            Self::BlockedSubLabel { sub_label } => {
                write!(f, "sub-label '{}' is blocked", sub_label)
            }
            Self::SubLabelNotAllowed { sub_label } => {
                write!(f, "sub-label '{}' is not allowed", sub_label)
            }
        }
    }
}

/// Outcome of filtering one detection.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterDecision {
    Allow,
    Drop(DropReason),
}

impl FilterDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Pure filter over detections and the active rule set.
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    rules: AlertRules,
}

impl FilterEngine {
    pub fn new(rules: AlertRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &AlertRules {
        &self.rules
    }

    /// Evaluate every stage in order, stopping at the first drop.
    pub fn evaluate(&self, event: &DetectionEvent) -> FilterDecision {
        let stages: [fn(&Self, &DetectionEvent) -> Result<(), DropReason>; 4] = [
            Self::check_zones,
            Self::check_label,
            Self::check_score,
            Self::check_sub_labels,
        ];

        for stage in stages {
            if let Err(reason) = stage(self, event) {
                return FilterDecision::Drop(reason);
            }
        }

        FilterDecision::Allow
    }

    fn check_zones(&self, event: &DetectionEvent) -> Result<(), DropReason> {
        let rule = &self.rules.zones;

        if event.zones.is_empty() {
            return match rule.unzoned {
                UnzonedPolicy::Allow => Ok(()),
                UnzonedPolicy::Drop => Err(DropReason::Unzoned),
            };
        }

        if let Some(zone) = event.zones.iter().find(|z| rule.is_blocked(z)) {
            return Err(DropReason::BlockedZone { zone: zone.clone() });
        }

        if rule.allow.is_empty() || event.zones.iter().any(|z| rule.is_allowed(z)) {
            Ok(())
        } else {
            Err(DropReason::ZoneNotAllowed {
                zones: event.zones.iter().cloned().collect(),
            })
        }
    }

    fn check_label(&self, event: &DetectionEvent) -> Result<(), DropReason> {
        let rule = &self.rules.labels;
        if rule.is_blocked(&event.label) {
            return Err(DropReason::BlockedLabel {
                label: event.label.clone(),
            });
        }
        if !rule.is_allowed(&event.label) {
            return Err(DropReason::LabelNotAllowed {
                label: event.label.clone(),
            });
        }
        Ok(())
    }

    fn check_score(&self, event: &DetectionEvent) -> Result<(), DropReason> {
        if event.meets_min_score(self.rules.min_score) {
            Ok(())
        } else {
            Err(DropReason::ScoreBelowMinimum {
                score: event.normalized_score(),
                min_score: self.rules.min_score,
            })
        }
    }

    fn check_sub_labels(&self, event: &DetectionEvent) -> Result<(), DropReason> {
        let rule = &self.rules.sub_labels;

        if event.sub_labels.is_empty() {
            return check_sub_label(rule, "");
        }

        event
            .sub_labels
            .iter()
            .try_for_each(|sub_label| check_sub_label(rule, sub_label))
    }
}

fn check_sub_label(rule: &ListRule, sub_label: &str) -> Result<(), DropReason> {
    if rule.is_blocked(sub_label) {
        return Err(DropReason::BlockedSubLabel {
            sub_label: sub_label.to_string(),
        });
    }
    if !rule.is_allowed(sub_label) {
        return Err(DropReason::SubLabelNotAllowed {
            sub_label: sub_label.to_string(),
        });
    }
    Ok(())
}
