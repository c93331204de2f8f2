use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Units are addressed by ULID, like every other entity.
pub type UnitId = Ulid;

/// What occupies a day: the unit's default, a booking, or a tentative booking (< 0).
pub type StateCode = i64;

/// Canonical bucket every negative (tentative) state collapses into.
pub const TENTATIVE_STATE: StateCode = -1;

/// Slots per month record, one per possible day-of-month.
pub const MONTH_SLOTS: usize = 31;

/// `(year, month)`; ordering matches the calendar.
pub type MonthKey = (i32, u32);

/// Number of days in `month` of `year` (28–31).
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month >= 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(31, |d| d.day())
}

/// First and last date of a month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let last = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))?;
    Some((first, last))
}

/// Every `(year, month)` touched by the closed date range, in order.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> Vec<MonthKey> {
    let mut keys = Vec::new();
    let (mut y, mut m) = (start.year(), start.month());
    while (y, m) <= (end.year(), end.month()) {
        keys.push((y, m));
        if m == 12 {
            y += 1;
            m = 1;
        } else {
            m += 1;
        }
    }
    keys
}

/// One stored month: a state per calendar day, addressed by day number.
///
/// Slots past the month's length are unused and hold the fill state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthRecord {
    pub unit_id: UnitId,
    pub year: i32,
    pub month: u32,
    days: [StateCode; MONTH_SLOTS],
}

impl MonthRecord {
    /// A month with every day set to `state`.
    pub fn filled(unit_id: UnitId, year: i32, month: u32, state: StateCode) -> Self {
        Self {
            unit_id,
            year,
            month,
            days: [state; MONTH_SLOTS],
        }
    }

    pub fn key(&self) -> MonthKey {
        (self.year, self.month)
    }

    /// Number of real days in this month.
    pub fn len(&self) -> u32 {
        days_in_month(self.year, self.month)
    }

    /// State on day `day` (1-based).
    pub fn day(&self, day: u32) -> StateCode {
        debug_assert!(day >= 1 && day <= self.len(), "day out of month");
        self.days[(day - 1) as usize]
    }

    /// The real days of the month, day 1 first.
    pub fn days(&self) -> &[StateCode] {
        &self.days[..self.len() as usize]
    }

    /// True if `days` is a non-empty range inside this month.
    pub fn contains_days(&self, days: &RangeInclusive<u32>) -> bool {
        *days.start() >= 1 && days.start() <= days.end() && *days.end() <= self.len()
    }

    /// Overwrite a validated closed day range.
    pub fn fill(&mut self, days: RangeInclusive<u32>, state: StateCode) {
        debug_assert!(self.contains_days(&days), "fill outside month");
        let (first, last) = (*days.start() as usize, *days.end() as usize);
        for slot in &mut self.days[first - 1..last] {
            *slot = state;
        }
    }
}

/// A maximal run of one state within a single month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedRun {
    pub state: StateCode,
    pub start_day: u32,
    pub end_day: u32,
}

/// Run-length form of one (possibly trimmed) month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthRuns {
    pub year: i32,
    pub month: u32,
    pub runs: Vec<DecodedRun>,
}

/// Calendar state of one unit: its directory entry plus stored months and locks.
#[derive(Debug, Clone)]
pub struct UnitState {
    pub id: UnitId,
    pub name: Option<String>,
    /// State of every day nobody has written.
    pub default_state: StateCode,
    pub months: BTreeMap<MonthKey, MonthRecord>,
    /// One row per state; `false` once unlocked.
    pub locks: HashMap<StateCode, bool>,
}

impl UnitState {
    pub fn new(id: UnitId, name: Option<String>, default_state: StateCode) -> Self {
        Self {
            id,
            name,
            default_state,
            months: BTreeMap::new(),
            locks: HashMap::new(),
        }
    }

    pub fn locked_states(&self) -> impl Iterator<Item = StateCode> + '_ {
        self.locks
            .iter()
            .filter_map(|(state, locked)| locked.then_some(*state))
    }
}

/// WAL record: one entry per storage mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntry {
    UnitCreated {
        id: UnitId,
        name: Option<String>,
        default_state: StateCode,
    },
    UnitUpdated {
        id: UnitId,
        name: Option<String>,
        default_state: StateCode,
    },
    UnitDeleted {
        id: UnitId,
    },
    MonthInserted {
        record: MonthRecord,
    },
    MonthUpdated {
        unit_id: UnitId,
        year: i32,
        month: u32,
        first_day: u32,
        last_day: u32,
        state: StateCode,
    },
    LockSet {
        unit_id: UnitId,
        state: StateCode,
        locked: bool,
    },
}

impl LogEntry {
    pub fn unit_id(&self) -> UnitId {
        match self {
            LogEntry::UnitCreated { id, .. }
            | LogEntry::UnitUpdated { id, .. }
            | LogEntry::UnitDeleted { id } => *id,
            LogEntry::MonthInserted { record } => record.unit_id,
            LogEntry::MonthUpdated { unit_id, .. } | LogEntry::LockSet { unit_id, .. } => *unit_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub id: UnitId,
    pub name: Option<String>,
    pub default_state: StateCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn month_lengths() {
        assert_eq!(days_in_month(2023, 2), 28);
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(1900, 2), 28);
        assert_eq!(days_in_month(2000, 2), 29);
        assert_eq!(days_in_month(2024, 4), 30);
        assert_eq!(days_in_month(2024, 12), 31);
        assert_eq!(days_in_month(2024, 1), 31);
    }

    #[test]
    fn months_between_crosses_year() {
        let keys = months_between(date(2023, 11, 15), date(2024, 2, 10));
        assert_eq!(keys, vec![(2023, 11), (2023, 12), (2024, 1), (2024, 2)]);
    }

    #[test]
    fn months_between_single_month() {
        let keys = months_between(date(2024, 3, 10), date(2024, 3, 15));
        assert_eq!(keys, vec![(2024, 3)]);
    }

    #[test]
    fn record_len_follows_month() {
        let rec = MonthRecord::filled(Ulid::new(), 2024, 2, 0);
        assert_eq!(rec.len(), 29);
        assert_eq!(rec.days().len(), 29);
        assert!(rec.days().iter().all(|&s| s == 0));
    }

    #[test]
    fn record_fill_touches_only_range() {
        let mut rec = MonthRecord::filled(Ulid::new(), 2024, 4, 0);
        rec.fill(28..=30, 7);
        assert_eq!(rec.day(27), 0);
        assert_eq!(rec.day(28), 7);
        assert_eq!(rec.day(30), 7);
        assert_eq!(rec.days().len(), 30);
    }

    #[test]
    fn record_day_range_validation() {
        let rec = MonthRecord::filled(Ulid::new(), 2023, 2, 0);
        assert!(rec.contains_days(&(1..=28)));
        assert!(!rec.contains_days(&(1..=29)));
        assert!(!rec.contains_days(&(0..=3)));
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = 5..=3;
        assert!(!rec.contains_days(&reversed));
    }

    #[test]
    fn locked_states_skips_cleared_rows() {
        let mut unit = UnitState::new(Ulid::new(), None, 0);
        unit.locks.insert(42, true);
        unit.locks.insert(43, false);
        let locked: Vec<_> = unit.locked_states().collect();
        assert_eq!(locked, vec![42]);
    }

    #[test]
    fn log_entry_serialization_roundtrip() {
        let entry = LogEntry::MonthInserted {
            record: MonthRecord::filled(Ulid::new(), 2024, 3, 5),
        };
        let bytes = bincode::serialize(&entry).unwrap();
        let decoded: LogEntry = bincode::deserialize(&bytes).unwrap();
        assert_eq!(entry, decoded);
    }
}
