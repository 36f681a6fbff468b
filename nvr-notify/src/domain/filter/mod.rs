//! Filter domain module.

mod engine;
mod quiet_hours;
mod rules;

pub use engine::{DropReason, FilterDecision, FilterEngine, FilterStage};
pub use quiet_hours::{QuietHours, QuietHoursConfig, parse_time};
pub use rules::{AlertRules, ListRule, UnzonedPolicy, ZoneRule};
