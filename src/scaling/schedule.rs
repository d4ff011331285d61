//! Known load schedules
//!
//! A schedule pins a floor on the instance count during recurring UTC hours,
//! e.g. month-end salary runs or the evening mobile-money peak.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recurring period with a minimum instance count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Schedule id (generated when empty)
    #[serde(default)]
    pub id: String,
    /// Human-readable label
    pub name: String,
    /// Days the schedule applies; empty means every day
    #[serde(default)]
    pub days: Vec<Weekday>,
    /// First hour (UTC, inclusive)
    pub start_hour: u32,
    /// Last hour (UTC, exclusive); wraps past midnight when below `start_hour`
    pub end_hour: u32,
    /// Instance floor while active
    pub min_instances: u32,
}

impl ScheduleEntry {
    /// A schedule that applies every day
    #[must_use]
    pub fn daily(name: impl Into<String>, start_hour: u32, end_hour: u32, min_instances: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            days: Vec::new(),
            start_hour,
            end_hour,
            min_instances,
        }
    }

    /// Restrict to the given weekdays
    #[must_use]
    pub fn on(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.days = days.into_iter().collect();
        self
    }

    /// Whether the schedule covers `now`
    ///
    /// For a window wrapping midnight the day check applies to the day the
    /// window started on.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        let hour = now.hour();
        let (in_window, started) = if self.start_hour == self.end_hour {
            (false, now.weekday())
        } else if self.start_hour < self.end_hour {
            (hour >= self.start_hour && hour < self.end_hour, now.weekday())
        } else if hour >= self.start_hour {
            (true, now.weekday())
        } else {
            (hour < self.end_hour, now.weekday().pred())
        };
        in_window && (self.days.is_empty() || self.days.contains(&started))
    }

    pub(super) fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        // 2024-07-01 is a Monday
        Utc.with_ymd_and_hms(2024, 7, day, hour, 30, 0).unwrap()
    }

    #[test]
    fn plain_window_is_half_open() {
        let s = ScheduleEntry::daily("lunch", 12, 14, 4);
        assert!(!s.is_active(at(1, 11)));
        assert!(s.is_active(at(1, 12)));
        assert!(s.is_active(at(1, 13)));
        assert!(!s.is_active(at(1, 14)));
    }

    #[test]
    fn window_wraps_midnight() {
        // GIVEN: a Friday-night window from 22:00 to 02:00
        let s = ScheduleEntry::daily("night batch", 22, 2, 3).on([Weekday::Fri]);

        // THEN: Friday 23:30 and Saturday 01:30 are covered
        assert!(s.is_active(at(5, 23)));
        assert!(s.is_active(at(6, 1)));

        // AND: Saturday 23:30 and Friday 01:30 are not
        assert!(!s.is_active(at(6, 23)));
        assert!(!s.is_active(at(5, 1)));
    }

    #[test]
    fn days_restrict_the_window() {
        let s = ScheduleEntry::daily("weekday peak", 8, 18, 5).on([Weekday::Mon, Weekday::Tue]);
        assert!(s.is_active(at(1, 9)));
        assert!(s.is_active(at(2, 9)));
        assert!(!s.is_active(at(3, 9)));
    }

    #[test]
    fn empty_window_is_never_active() {
        let s = ScheduleEntry::daily("noop", 5, 5, 9);
        assert!(!s.is_active(at(1, 5)));
    }
}
