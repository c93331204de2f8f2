use std::ops::RangeInclusive;

use crate::model::*;

use super::CalendarError;

/// One record per (unit, year, month), one state per day.
pub trait MonthlyStateStore {
    fn month_exists(&self, unit_id: UnitId, year: i32, month: u32) -> Result<bool, CalendarError>;

    /// All stored months of `unit_id` with `year ∈ years` and `month ∈ months`,
    /// in calendar order. A single call cannot express "from March of the
    /// first year to May of the last", so callers issue one read per year.
    fn read_months(
        &self,
        unit_id: UnitId,
        years: RangeInclusive<i32>,
        months: RangeInclusive<u32>,
    ) -> Result<Vec<MonthRecord>, CalendarError>;

    /// Fails with `DuplicateMonth` if the key is taken.
    fn insert_month(&mut self, record: MonthRecord) -> Result<(), CalendarError>;

    /// Overwrite a closed day range of an existing month.
    fn update_partial(
        &mut self,
        unit_id: UnitId,
        year: i32,
        month: u32,
        days: RangeInclusive<u32>,
        state: StateCode,
    ) -> Result<(), CalendarError>;
}

/// Per (unit, state) lock flags.
pub trait LockRegistry {
    fn is_locked(&self, unit_id: UnitId, state: StateCode) -> Result<bool, CalendarError>;

    fn set_locked(&mut self, unit_id: UnitId, state: StateCode, locked: bool) -> Result<(), CalendarError>;
}

/// Where a calendar learns its unit's default state.
pub trait UnitDirectory {
    fn default_state(&self, unit_id: UnitId) -> Option<StateCode>;
}

// ── UnitState backend ────────────────────────────────────────────
//
// A unit's own state is a complete store for that unit; every other
// unit id reads as empty and rejects writes.

impl MonthlyStateStore for UnitState {
    fn month_exists(&self, unit_id: UnitId, year: i32, month: u32) -> Result<bool, CalendarError> {
        Ok(unit_id == self.id && self.months.contains_key(&(year, month)))
    }

    fn read_months(
        &self,
        unit_id: UnitId,
        years: RangeInclusive<i32>,
        months: RangeInclusive<u32>,
    ) -> Result<Vec<MonthRecord>, CalendarError> {
        if unit_id != self.id || years.is_empty() {
            return Ok(Vec::new());
        }
        let lo = (*years.start(), 1);
        let hi = (*years.end(), 12);
        Ok(self
            .months
            .range(lo..=hi)
            .filter(|((_, month), _)| months.contains(month))
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn insert_month(&mut self, record: MonthRecord) -> Result<(), CalendarError> {
        if record.unit_id != self.id {
            return Err(CalendarError::UnitNotFound(record.unit_id));
        }
        if self.months.contains_key(&record.key()) {
            return Err(CalendarError::DuplicateMonth {
                unit_id: record.unit_id,
                year: record.year,
                month: record.month,
            });
        }
        self.months.insert(record.key(), record);
        Ok(())
    }

    fn update_partial(
        &mut self,
        unit_id: UnitId,
        year: i32,
        month: u32,
        days: RangeInclusive<u32>,
        state: StateCode,
    ) -> Result<(), CalendarError> {
        let missing = CalendarError::MonthNotFound { unit_id, year, month };
        if unit_id != self.id {
            return Err(missing);
        }
        let record = self.months.get_mut(&(year, month)).ok_or(missing)?;
        if !record.contains_days(&days) {
            return Err(CalendarError::InvalidDayRange {
                year,
                month,
                first_day: *days.start(),
                last_day: *days.end(),
            });
        }
        record.fill(days, state);
        Ok(())
    }
}

impl LockRegistry for UnitState {
    fn is_locked(&self, unit_id: UnitId, state: StateCode) -> Result<bool, CalendarError> {
        Ok(unit_id == self.id && self.locks.get(&state).copied().unwrap_or(false))
    }

    fn set_locked(&mut self, unit_id: UnitId, state: StateCode, locked: bool) -> Result<(), CalendarError> {
        if unit_id != self.id {
            return Err(CalendarError::UnitNotFound(unit_id));
        }
        self.locks.insert(state, locked);
        Ok(())
    }
}

impl UnitDirectory for UnitState {
    fn default_state(&self, unit_id: UnitId) -> Option<StateCode> {
        (unit_id == self.id).then_some(self.default_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn unit() -> UnitState {
        UnitState::new(Ulid::new(), None, 0)
    }

    #[test]
    fn insert_then_exists() {
        let mut u = unit();
        assert!(!u.month_exists(u.id, 2024, 3).unwrap());
        u.insert_month(MonthRecord::filled(u.id, 2024, 3, 0)).unwrap();
        assert!(u.month_exists(u.id, 2024, 3).unwrap());
    }

    #[test]
    fn duplicate_insert_rejected() {
        let mut u = unit();
        u.insert_month(MonthRecord::filled(u.id, 2024, 3, 0)).unwrap();
        let result = u.insert_month(MonthRecord::filled(u.id, 2024, 3, 9));
        assert!(matches!(result, Err(CalendarError::DuplicateMonth { year: 2024, month: 3, .. })));
        assert_eq!(u.months[&(2024, 3)].day(1), 0);
    }

    #[test]
    fn partial_update_on_missing_month_fails() {
        let mut u = unit();
        let result = u.update_partial(u.id, 2024, 3, 1..=2, 5);
        assert!(matches!(result, Err(CalendarError::MonthNotFound { .. })));
    }

    #[test]
    fn partial_update_rejects_days_past_month_end() {
        let mut u = unit();
        u.insert_month(MonthRecord::filled(u.id, 2023, 2, 0)).unwrap();
        let result = u.update_partial(u.id, 2023, 2, 27..=29, 5);
        assert!(matches!(result, Err(CalendarError::InvalidDayRange { .. })));
    }

    #[test]
    fn partial_update_overwrites_range_only() {
        let mut u = unit();
        u.insert_month(MonthRecord::filled(u.id, 2024, 3, 0)).unwrap();
        u.update_partial(u.id, 2024, 3, 10..=15, 42).unwrap();
        let rec = &u.months[&(2024, 3)];
        assert_eq!(rec.day(9), 0);
        assert_eq!(rec.day(10), 42);
        assert_eq!(rec.day(15), 42);
        assert_eq!(rec.day(16), 0);
    }

    #[test]
    fn read_months_filters_by_year_and_month() {
        let mut u = unit();
        for (y, m) in [(2023, 11), (2023, 12), (2024, 1), (2024, 2), (2024, 5)] {
            u.insert_month(MonthRecord::filled(u.id, y, m, 0)).unwrap();
        }
        let keys = |recs: Vec<MonthRecord>| recs.iter().map(MonthRecord::key).collect::<Vec<_>>();
        assert_eq!(keys(u.read_months(u.id, 2023..=2023, 12..=12).unwrap()), vec![(2023, 12)]);
        assert_eq!(keys(u.read_months(u.id, 2024..=2024, 1..=4).unwrap()), vec![(2024, 1), (2024, 2)]);
        assert_eq!(keys(u.read_months(u.id, 2023..=2024, 1..=12).unwrap()).len(), 5);
    }

    #[test]
    fn other_units_read_empty_and_reject_writes() {
        let mut u = unit();
        u.insert_month(MonthRecord::filled(u.id, 2024, 3, 0)).unwrap();
        let other = Ulid::new();
        assert!(!u.month_exists(other, 2024, 3).unwrap());
        assert!(u.read_months(other, 2024..=2024, 1..=12).unwrap().is_empty());
        assert!(u.insert_month(MonthRecord::filled(other, 2024, 4, 0)).is_err());
        assert!(u.update_partial(other, 2024, 3, 1..=1, 1).is_err());
        assert!(u.set_locked(other, 1, true).is_err());
        assert_eq!(u.default_state(other), None);
    }

    #[test]
    fn lock_rows_toggle() {
        let mut u = unit();
        assert!(!u.is_locked(u.id, 42).unwrap());
        u.set_locked(u.id, 42, true).unwrap();
        assert!(u.is_locked(u.id, 42).unwrap());
        u.set_locked(u.id, 42, false).unwrap();
        assert!(!u.is_locked(u.id, 42).unwrap());
        assert_eq!(u.locks.len(), 1);
    }
}
