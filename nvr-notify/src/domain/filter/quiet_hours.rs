//! Time-of-day quiet windows.
//! Supports overnight ranges (e.g., 22:00 - 06:00).

use chrono::{DateTime, Local, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Quiet hours as configured, in HH:MM format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHoursConfig {
    pub start: String,
    pub end: String,
}

impl QuietHoursConfig {
    /// Parse into a usable window.
    pub fn parse(&self) -> Result<QuietHours> {
        let start = parse_time(&self.start)
            .ok_or_else(|| Error::config(format!("invalid quiet hours start '{}'", self.start)))?;
        let end = parse_time(&self.end)
            .ok_or_else(|| Error::config(format!("invalid quiet hours end '{}'", self.end)))?;
        Ok(QuietHours::new(start, end))
    }
}

/// A parsed quiet window. The start is inclusive, the end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    start: NaiveTime,
    end: NaiveTime,
}

impl QuietHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Whether the given time of day falls inside the window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start > self.end {
            // Overnight range (e.g., 22:00 - 06:00)
            time >= self.start || time < self.end
        } else {
            // Normal range; start == end is an empty window
            time >= self.start && time < self.end
        }
    }

    /// Whether `now` is quiet, evaluated in `timezone` or the server's local time.
    pub fn is_quiet_at(&self, now: DateTime<Utc>, timezone: Option<Tz>) -> bool {
        let time = match timezone {
            Some(tz) => now.with_timezone(&tz).time(),
            None => now.with_timezone(&Local).time(),
        };
        self.contains(time)
    }
}

/// Parse a time in HH:MM or HH:MM:SS format.
pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}
