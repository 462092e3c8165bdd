//! Interval planning for the three market processes.
//!
//! A plan is the ordered list of interval end times one cascade solves. Every plan
//! for a process covers the same wall-clock window relative to its anchor:
//!
//! | Process | Anchor | Points | Horizon (anchor to last point) |
//! |---------|--------|--------|--------------------------------|
//! | dispatch | start | 1 | 0 |
//! | p5min | start | 12 × 5 min | 55 min |
//! | predispatch | trading-day start | from the interval-count table | 24 h − 5 min |
//!
//! Predispatch plans start at the next 30-minute boundary and are then extended with
//! whole steps or truncated so that the last point lands exactly on the horizon end.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use nemsim_core::{IntervalCountTable, PlanningError, ProcessKind};
use serde::Serialize;

/// Number of intervals in a P5MIN run.
pub const P5MIN_INTERVALS: usize = 12;

/// Default start of the trading day.
pub fn default_trading_day_start() -> NaiveTime {
    NaiveTime::from_hms_opt(4, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Ordered time points of one process run, with a cursor on the current interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntervalPlan {
    process: ProcessKind,
    anchor: NaiveDateTime,
    target_end: NaiveDateTime,
    times: Vec<NaiveDateTime>,
    current: usize,
}

impl IntervalPlan {
    pub fn process(&self) -> ProcessKind {
        self.process
    }

    /// Start of the window the horizon is measured from.
    pub fn anchor(&self) -> NaiveDateTime {
        self.anchor
    }

    pub fn target_end(&self) -> NaiveDateTime {
        self.target_end
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn first(&self) -> Option<NaiveDateTime> {
        self.times.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDateTime> {
        self.times.last().copied()
    }

    /// Wall-clock span from the anchor to the last point.
    pub fn span(&self) -> Duration {
        self.last().map_or(Duration::zero(), |last| last - self.anchor)
    }

    /// The fixed duration every plan for this process covers.
    pub fn horizon(&self) -> Duration {
        self.target_end - self.anchor
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn current_time(&self) -> Option<NaiveDateTime> {
        self.times.get(self.current).copied()
    }

    /// Move the cursor forward, returning the new current time if any remain.
    pub fn advance(&mut self) -> Option<NaiveDateTime> {
        if self.current < self.times.len() {
            self.current += 1;
        }
        self.current_time()
    }

    /// Length of interval `index` in minutes.
    ///
    /// The lead interval has the process' nominal length; later intervals span the gap
    /// to their predecessor, so a clipped or stretched final step is priced correctly.
    pub fn interval_minutes(&self, index: usize) -> f64 {
        if index == 0 {
            return self.process.step_minutes() as f64;
        }
        match (self.times.get(index - 1), self.times.get(index)) {
            (Some(prev), Some(curr)) => (*curr - *prev).num_seconds() as f64 / 60.0,
            _ => self.process.step_minutes() as f64,
        }
    }
}

/// Builds [`IntervalPlan`]s from a shared, read-only interval-count table.
#[derive(Debug, Clone)]
pub struct IntervalScheduler {
    counts: Arc<IntervalCountTable>,
    trading_day_start: NaiveTime,
}

impl IntervalScheduler {
    pub fn new(counts: Arc<IntervalCountTable>) -> Self {
        Self {
            counts,
            trading_day_start: default_trading_day_start(),
        }
    }

    /// Scheduler over the generated table of a 04:00 trading day.
    pub fn standard() -> Self {
        let start = default_trading_day_start();
        Self::new(Arc::new(IntervalCountTable::standard(start)))
    }

    pub fn with_trading_day_start(mut self, start: NaiveTime) -> Self {
        self.trading_day_start = start;
        self
    }

    pub fn counts(&self) -> &IntervalCountTable {
        &self.counts
    }

    /// Start of the trading day containing `time`.
    pub fn trading_day_anchor(&self, time: NaiveDateTime) -> NaiveDateTime {
        let same_day = time.date().and_time(self.trading_day_start);
        if time >= same_day {
            same_day
        } else {
            same_day - Duration::days(1)
        }
    }

    pub fn plan(
        &self,
        process: ProcessKind,
        start: NaiveDateTime,
    ) -> Result<IntervalPlan, PlanningError> {
        let step = Duration::minutes(process.step_minutes());
        let (anchor, target_end, times) = match process {
            ProcessKind::Dispatch => (start, start, vec![start]),
            ProcessKind::P5Min => {
                let times: Vec<_> = (0..P5MIN_INTERVALS as i32)
                    .map(|i| start + step * i)
                    .collect();
                (start, start + step * (P5MIN_INTERVALS as i32 - 1), times)
            }
            ProcessKind::Predispatch => {
                let first = next_boundary(start, process.step_minutes());
                let count = self.counts.lookup(first.time())?;
                let anchor = self.trading_day_anchor(first);
                let target_end = anchor + Duration::days(1)
                    - Duration::minutes(ProcessKind::Dispatch.step_minutes());
                let times = (0..count as i32).map(|i| first + step * i).collect();
                (anchor, target_end, times)
            }
        };

        let times = reconcile(process, times, target_end, step)?;
        Ok(IntervalPlan {
            process,
            anchor,
            target_end,
            times,
            current: 0,
        })
    }
}

/// First `step_minutes` boundary at or after `time`.
fn next_boundary(time: NaiveDateTime, step_minutes: i64) -> NaiveDateTime {
    let step = step_minutes * 60;
    let seconds = time.time().num_seconds_from_midnight() as i64;
    let has_fraction = time.nanosecond() > 0;
    let truncated = time.with_nanosecond(0).unwrap_or(time);
    let remainder = seconds % step;
    if remainder == 0 && !has_fraction {
        truncated
    } else {
        truncated + Duration::seconds(step - remainder)
    }
}

/// Extend or truncate `times` so the last point equals `target_end`.
fn reconcile(
    process: ProcessKind,
    mut times: Vec<NaiveDateTime>,
    target_end: NaiveDateTime,
    step: Duration,
) -> Result<Vec<NaiveDateTime>, PlanningError> {
    let (Some(&first), Some(&end)) = (times.first(), times.last()) else {
        return Err(PlanningError::HorizonUnreachable {
            process,
            first: target_end,
            target_end,
            step_minutes: step.num_minutes(),
        });
    };
    let mut last = end;
    if first > target_end || step <= Duration::zero() {
        return Err(PlanningError::HorizonUnreachable {
            process,
            first,
            target_end,
            step_minutes: step.num_minutes(),
        });
    }

    if last < target_end {
        while last + step <= target_end {
            last += step;
            times.push(last);
        }
        if last < target_end {
            if times.len() == 1 {
                times.push(target_end);
            } else if let Some(end) = times.last_mut() {
                *end = target_end;
            }
        }
    } else if last > target_end {
        while times.len() > 1 && last - target_end >= step {
            times.pop();
            last = times[times.len() - 1];
        }
        if let Some(end) = times.last_mut() {
            if *end > target_end {
                *end = target_end;
            }
        }
    }
    Ok(times)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn dispatch_is_a_single_point() {
        let plan = IntervalScheduler::standard()
            .plan(ProcessKind::Dispatch, at("2024-01-01 10:05"))
            .unwrap();
        assert_eq!(plan.times(), &[at("2024-01-01 10:05")]);
        assert_eq!(plan.span(), Duration::zero());
        assert_eq!(plan.interval_minutes(0), 5.0);
    }

    #[test]
    fn p5min_has_twelve_five_minute_points() {
        let plan = IntervalScheduler::standard()
            .plan(ProcessKind::P5Min, at("2024-01-01 10:05"))
            .unwrap();
        assert_eq!(plan.len(), 12);
        assert_eq!(plan.last(), Some(at("2024-01-01 11:00")));
        assert_eq!(plan.span(), Duration::minutes(55));
        assert_eq!(plan.interval_minutes(11), 5.0);
    }

    #[test]
    fn predispatch_from_0410_ends_at_0355_next_day() {
        let plan = IntervalScheduler::standard()
            .plan(ProcessKind::Predispatch, at("2024-01-01 04:10"))
            .unwrap();
        assert_eq!(plan.first(), Some(at("2024-01-01 04:30")));
        assert_eq!(plan.anchor(), at("2024-01-01 04:00"));
        assert_eq!(plan.last(), Some(at("2024-01-02 03:55")));
        assert_eq!(plan.len(), 47);
        assert_eq!(plan.span(), Duration::hours(24) - Duration::minutes(5));
        // 03:00 to the clipped 03:55 point
        assert_eq!(plan.interval_minutes(46), 55.0);
    }

    #[test]
    fn short_lookup_is_extended_with_whole_steps() {
        let table = IntervalCountTable::from_entries([(t(4, 30), 10)]);
        let plan = IntervalScheduler::new(Arc::new(table))
            .plan(ProcessKind::Predispatch, at("2024-01-01 04:30"))
            .unwrap();
        assert_eq!(plan.len(), 47);
        assert_eq!(plan.last(), Some(at("2024-01-02 03:55")));
        assert_eq!(plan.times()[45], at("2024-01-02 03:00"));
    }

    #[test]
    fn long_lookup_is_truncated_and_clipped() {
        let table = IntervalCountTable::from_entries([(t(4, 30), 60)]);
        let plan = IntervalScheduler::new(Arc::new(table))
            .plan(ProcessKind::Predispatch, at("2024-01-01 04:30"))
            .unwrap();
        assert_eq!(plan.len(), 47);
        assert_eq!(plan.last(), Some(at("2024-01-02 03:55")));
    }

    #[test]
    fn exact_span_is_left_untouched() {
        let table = IntervalCountTable::from_entries([(t(4, 30), 48)]);
        let plan = IntervalScheduler::new(Arc::new(table))
            .with_trading_day_start(t(4, 5))
            .plan(ProcessKind::Predispatch, at("2024-01-01 04:30"))
            .unwrap();
        assert_eq!(plan.anchor(), at("2024-01-01 04:05"));
        assert_eq!(plan.len(), 48);
        assert_eq!(plan.last(), Some(at("2024-01-02 04:00")));
        assert_eq!(plan.interval_minutes(47), 30.0);
    }

    #[test]
    fn last_period_of_the_day_keeps_its_point() {
        let plan = IntervalScheduler::standard()
            .plan(ProcessKind::Predispatch, at("2024-01-02 03:20"))
            .unwrap();
        assert_eq!(
            plan.times(),
            &[at("2024-01-02 03:30"), at("2024-01-02 03:55")]
        );
        assert_eq!(plan.anchor(), at("2024-01-01 04:00"));
    }

    #[test]
    fn missing_count_is_a_planning_error() {
        let table = IntervalCountTable::from_entries([(t(4, 30), 47)]);
        let err = IntervalScheduler::new(Arc::new(table))
            .plan(ProcessKind::Predispatch, at("2024-01-01 05:10"))
            .unwrap_err();
        assert_eq!(err, PlanningError::MissingIntervalCount(t(5, 30)));
    }

    #[test]
    fn advance_walks_the_plan() {
        let mut plan = IntervalScheduler::standard()
            .plan(ProcessKind::P5Min, at("2024-01-01 10:05"))
            .unwrap();
        assert_eq!(plan.current_time(), Some(at("2024-01-01 10:05")));
        assert_eq!(plan.advance(), Some(at("2024-01-01 10:10")));
        for _ in 0..11 {
            plan.advance();
        }
        assert_eq!(plan.current_time(), None);
        assert_eq!(plan.current(), 12);
    }
}
