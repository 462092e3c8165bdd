//! Time-of-day lookup of the number of predispatch periods the market operator
//! publishes.
//!
//! The table is a read-only resource: it is loaded (or generated) once at process
//! start and shared behind an `Arc` by every scheduler that needs it.

use chrono::{NaiveTime, Timelike};

use crate::error::PlanningError;

const MINUTES_PER_DAY: usize = 24 * 60;

/// Predispatch period count keyed by minute of day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalCountTable {
    counts: Vec<Option<u32>>,
}

impl Default for IntervalCountTable {
    fn default() -> Self {
        Self {
            counts: vec![None; MINUTES_PER_DAY],
        }
    }
}

impl IntervalCountTable {
    /// Build a table from explicit `(time of day, count)` entries. Seconds are ignored.
    pub fn from_entries(entries: impl IntoIterator<Item = (NaiveTime, u32)>) -> Self {
        let mut table = Self::default();
        for (time, count) in entries {
            table.counts[minute_of_day(time)] = Some(count);
        }
        table
    }

    /// Table of a trading day starting at `trading_day_start`: the number of 30-minute
    /// periods left until the next trading-day boundary, decreasing through the day and
    /// resetting at the boundary.
    pub fn standard(trading_day_start: NaiveTime) -> Self {
        let start = minute_of_day(trading_day_start);
        let counts = (0..MINUTES_PER_DAY)
            .map(|minute| {
                let remaining = match (start + MINUTES_PER_DAY - minute) % MINUTES_PER_DAY {
                    0 => MINUTES_PER_DAY,
                    r => r,
                };
                Some(remaining.div_ceil(30) as u32)
            })
            .collect();
        Self { counts }
    }

    /// Fail unless every minute of the day has an entry.
    pub fn require_complete(self) -> Result<Self, PlanningError> {
        let covered = self.covered_minutes();
        if covered == MINUTES_PER_DAY {
            Ok(self)
        } else {
            Err(PlanningError::IncompleteTable { covered })
        }
    }

    pub fn covered_minutes(&self) -> usize {
        self.counts.iter().filter(|c| c.is_some()).count()
    }

    pub fn lookup(&self, time: NaiveTime) -> Result<u32, PlanningError> {
        let truncated = truncate_to_minute(time);
        match self.counts[minute_of_day(time)] {
            Some(0) => Err(PlanningError::EmptyIntervalCount(truncated)),
            Some(count) => Ok(count),
            None => Err(PlanningError::MissingIntervalCount(truncated)),
        }
    }

    /// Entries in time-of-day order.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveTime, u32)> + '_ {
        self.counts.iter().enumerate().filter_map(|(minute, count)| {
            count.map(|c| (time_of_minute(minute), c))
        })
    }
}

fn minute_of_day(time: NaiveTime) -> usize {
    (time.hour() * 60 + time.minute()) as usize
}

fn time_of_minute(minute: usize) -> NaiveTime {
    NaiveTime::from_num_seconds_from_midnight_opt((minute * 60) as u32, 0).unwrap_or(NaiveTime::MIN)
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    time_of_minute(minute_of_day(time))
}
