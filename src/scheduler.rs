//! Run scheduling
//!
//! Interval-based repetition, optionally restricted to a daily local-time
//! window and a set of weekdays. Overnight windows (e.g. 22:00-06:00) are
//! supported; the after-midnight part counts as the day the window opened.

use chrono::{Datelike, Duration, Local, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Minimum effective interval between runs
pub const MIN_INTERVAL_SECS: u64 = 60;
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// Allowed days. Empty means every day.
    #[serde(default)]
    pub days: Vec<Weekday>,
}

impl RunWindow {
    fn overnight(&self) -> bool {
        self.start > self.end
    }

    fn allows_day(&self, day: Weekday) -> bool {
        self.days.is_empty() || self.days.contains(&day)
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        let time = at.time();
        let in_time = if self.overnight() {
            time >= self.start || time < self.end
        } else {
            time >= self.start && time < self.end
        };
        if !in_time {
            return false;
        }
        let day = if self.overnight() && time < self.end {
            at.weekday().pred()
        } else {
            at.weekday()
        };
        self.allows_day(day)
    }

    /// Earliest moment at or after `from` that lies inside the window.
    pub fn next_open(&self, from: NaiveDateTime) -> Option<NaiveDateTime> {
        if self.contains(from) {
            return Some(from);
        }
        (0..=7)
            .map(|offset| (from.date() + Duration::days(offset)).and_time(self.start))
            .find(|candidate| *candidate > from && self.allows_day(candidate.weekday()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Seconds between the starts of two runs
    pub interval_secs: u64,
    #[serde(default)]
    pub window: Option<RunWindow>,
}

impl Schedule {
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs < MIN_INTERVAL_SECS {
            return Err(format!(
                "schedule interval {}s is below the {}s minimum",
                self.interval_secs, MIN_INTERVAL_SECS
            ));
        }
        if self.interval_secs > MAX_INTERVAL_SECS {
            return Err(format!(
                "schedule interval {}s exceeds the {}s maximum",
                self.interval_secs, MAX_INTERVAL_SECS
            ));
        }
        if let Some(window) = &self.window {
            if window.start == window.end {
                return Err("schedule window start and end are equal".to_string());
            }
        }
        Ok(())
    }

    /// When the first run may start, given the current local time.
    pub fn first_run(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.fit(now)
    }

    /// When the run after one that started at `last_start` may begin.
    pub fn next_run(&self, last_start: NaiveDateTime) -> NaiveDateTime {
        let interval = Duration::seconds(self.interval_secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS) as i64);
        self.fit(last_start + interval)
    }

    fn fit(&self, due: NaiveDateTime) -> NaiveDateTime {
        match &self.window {
            Some(window) => window.next_open(due).unwrap_or(due),
            None => due,
        }
    }
}

/// How long to sleep from now until `at` (zero if it has passed).
pub fn wait_until(at: NaiveDateTime) -> std::time::Duration {
    (at - Local::now().naive_local()).to_std().unwrap_or_default()
}
