//! Per-status duration statistics.
//!
//! Merges the persisted [`DurationTable`] of a device with the tracker's
//! unflushed working list, including the open session as of its last tick.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::{DurationTable, Status, StatusSession};

/// Read-only merged view over historical totals and unflushed sessions.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator<'a> {
    table: &'a DurationTable,
    sessions: &'a [StatusSession],
}

impl<'a> Aggregator<'a> {
    /// Builds a view over `table` and the working list `sessions`.
    #[must_use]
    pub const fn new(table: &'a DurationTable, sessions: &'a [StatusSession]) -> Self {
        Self { table, sessions }
    }

    /// Historical total plus every unflushed session with this status.
    #[must_use]
    pub fn status_duration(&self, status: Status) -> u64 {
        self.sessions
            .iter()
            .filter(|s| s.status() == status)
            .fold(self.table.get(status), |acc, s| {
                acc.saturating_add(s.duration_ms())
            })
    }

    /// Sum of [`Self::status_duration`] over the four tracked statuses.
    #[must_use]
    pub fn total_duration(&self) -> u64 {
        Status::TRACKED
            .into_iter()
            .fold(0u64, |acc, s| acc.saturating_add(self.status_duration(s)))
    }

    /// `floor(duration * 100 / total)`, or 0 when nothing was recorded yet.
    #[must_use]
    pub fn status_percent(&self, status: Status) -> u8 {
        percent(self.status_duration(status), self.total_duration())
    }

    /// Share of time the machine was not idle, or 0 with no history.
    #[must_use]
    pub fn utilization_percent(&self) -> u8 {
        if self.total_duration() == 0 {
            return 0;
        }
        100 - self.status_percent(Status::Idle)
    }

    /// Everything the UI needs in one value.
    #[must_use]
    pub fn snapshot(&self, current: Status) -> StatusSnapshot {
        let total_ms = self.total_duration();
        let statuses = Status::TRACKED
            .into_iter()
            .map(|status| {
                let duration_ms = self.status_duration(status);
                StatusStat {
                    status,
                    duration_ms,
                    percent: percent(duration_ms, total_ms),
                }
            })
            .collect();

        StatusSnapshot {
            current,
            total_ms,
            utilization_percent: self.utilization_percent(),
            statuses,
        }
    }
}

fn percent(part: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let value = u128::from(part) * 100 / u128::from(total);
    u8::try_from(value.min(100)).unwrap_or(100)
}

/// Duration and share of a single status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusStat {
    /// The status.
    pub status: Status,

    /// Accumulated milliseconds.
    #[schema(example = 3_600_000)]
    pub duration_ms: u64,

    /// Floor of the share of total time, 0..=100.
    #[schema(example = 42)]
    pub percent: u8,
}

/// Aggregated statistics for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusSnapshot {
    /// Status of the open session.
    pub current: Status,

    /// Sum over all tracked statuses in milliseconds.
    #[schema(example = 8_571_000)]
    pub total_ms: u64,

    /// `100 - idle percent`, or 0 with no history.
    #[schema(example = 58)]
    pub utilization_percent: u8,

    /// Per-status breakdown in Idle, Normal Cutting, Warning, Danger order.
    pub statuses: Vec<StatusStat>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::SessionTracker;
    use crate::types::DeviceIdentity;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn tracker() -> SessionTracker {
        SessionTracker::new(DeviceIdentity::new("IDP-Monitor", "AA:BB:CC:DD:EE:FF"))
    }

    #[test]
    fn test_empty_history_reports_zero() {
        let table = DurationTable::default();
        let agg = Aggregator::new(&table, &[]);

        assert_eq!(agg.total_duration(), 0);
        for status in Status::TRACKED {
            assert_eq!(agg.status_percent(status), 0);
        }
        assert_eq!(agg.utilization_percent(), 0);
    }

    #[test]
    fn test_idle_then_danger_scenario() {
        let mut t = tracker();
        t.on_status(Status::Idle, at(0));
        t.tick(at(1000));
        t.on_status(Status::Danger, at(1000));
        t.tick(at(2000));

        let table = DurationTable::default();
        let agg = Aggregator::new(&table, t.sessions());

        assert_eq!(agg.status_duration(Status::Idle), 1000);
        assert_eq!(agg.status_duration(Status::Danger), 1000);
        assert_eq!(agg.total_duration(), 2000);
        assert_eq!(agg.status_percent(Status::Idle), 50);
        assert_eq!(agg.status_percent(Status::Danger), 50);
        assert_eq!(agg.utilization_percent(), 50);
    }

    #[test]
    fn test_table_and_working_list_are_combined() {
        let mut table = DurationTable::default();
        table.add(Status::NormalCutting, 5000);
        table.add(Status::Idle, 1000);

        let mut t = tracker();
        t.on_status(Status::NormalCutting, at(0));
        t.tick(at(2000));

        let agg = Aggregator::new(&table, t.sessions());
        assert_eq!(agg.status_duration(Status::NormalCutting), 7000);
        assert_eq!(agg.total_duration(), 8000);
    }

    #[test]
    fn test_total_is_sum_of_statuses() {
        let mut table = DurationTable::default();
        table.add(Status::Idle, 123);
        table.add(Status::NormalCutting, 4567);
        table.add(Status::Warning, 89);
        table.add(Status::Danger, 1);

        let agg = Aggregator::new(&table, &[]);
        let sum: u64 = Status::TRACKED
            .into_iter()
            .map(|s| agg.status_duration(s))
            .sum();
        assert_eq!(agg.total_duration(), sum);
    }

    #[test]
    fn test_percentages_floor_and_sum_at_most_100() {
        let mut table = DurationTable::default();
        table.add(Status::Idle, 1);
        table.add(Status::NormalCutting, 1);
        table.add(Status::Warning, 1);

        let agg = Aggregator::new(&table, &[]);
        let percents: Vec<u8> = Status::TRACKED
            .into_iter()
            .map(|s| agg.status_percent(s))
            .collect();
        assert_eq!(percents, vec![33, 33, 33, 0]);
        assert!(percents.iter().map(|p| u32::from(*p)).sum::<u32>() <= 100);
    }

    #[test]
    fn test_snapshot_matches_individual_queries() {
        let mut table = DurationTable::default();
        table.add(Status::Idle, 3000);
        table.add(Status::Warning, 1000);

        let agg = Aggregator::new(&table, &[]);
        let snapshot = agg.snapshot(Status::Warning);

        assert_eq!(snapshot.current, Status::Warning);
        assert_eq!(snapshot.total_ms, 4000);
        assert_eq!(snapshot.utilization_percent, 25);
        assert_eq!(snapshot.statuses.len(), 4);
        assert_eq!(snapshot.statuses[0].percent, 75);
        assert_eq!(snapshot.statuses[2].duration_ms, 1000);
    }
}
