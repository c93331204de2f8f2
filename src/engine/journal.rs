use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use crate::calendar::{CalendarError, LockRegistry, MonthlyStateStore, UnitDirectory};
use crate::model::*;

/// A copy-on-write view of one unit that stages the calendar's writes.
///
/// Reads see the unit with the staged writes on top. Nothing reaches the unit
/// itself until the engine has logged the entries and calls `Staged::apply_to`.
pub(super) struct Journal<'a> {
    base: &'a UnitState,
    /// Same identity as `base`, holding only the months and locks written so far.
    draft: UnitState,
    entries: Vec<LogEntry>,
}

/// Writes of a finished operation, not yet visible on the unit.
pub(super) struct Staged {
    draft: UnitState,
    entries: Vec<LogEntry>,
}

impl<'a> Journal<'a> {
    pub(super) fn new(base: &'a UnitState) -> Self {
        Self {
            base,
            draft: UnitState::new(base.id, None, base.default_state),
            entries: Vec::new(),
        }
    }

    pub(super) fn into_staged(self) -> Staged {
        Staged {
            draft: self.draft,
            entries: self.entries,
        }
    }
}

impl Staged {
    pub(super) fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Overlay the staged months and locks on `unit`; returns the entries
    /// for publishing.
    pub(super) fn apply_to(self, unit: &mut UnitState) -> Vec<LogEntry> {
        unit.months.extend(self.draft.months);
        unit.locks.extend(self.draft.locks);
        self.entries
    }
}

impl MonthlyStateStore for Journal<'_> {
    fn month_exists(&self, unit_id: UnitId, year: i32, month: u32) -> Result<bool, CalendarError> {
        Ok(self.draft.month_exists(unit_id, year, month)? || self.base.month_exists(unit_id, year, month)?)
    }

    fn read_months(
        &self,
        unit_id: UnitId,
        years: RangeInclusive<i32>,
        months: RangeInclusive<u32>,
    ) -> Result<Vec<MonthRecord>, CalendarError> {
        let staged = self.draft.read_months(unit_id, years.clone(), months.clone())?;
        if staged.is_empty() {
            return self.base.read_months(unit_id, years, months);
        }
        let mut merged: BTreeMap<MonthKey, MonthRecord> = self
            .base
            .read_months(unit_id, years, months)?
            .into_iter()
            .map(|record| (record.key(), record))
            .collect();
        merged.extend(staged.into_iter().map(|record| (record.key(), record)));
        Ok(merged.into_values().collect())
    }

    fn insert_month(&mut self, record: MonthRecord) -> Result<(), CalendarError> {
        if self.base.month_exists(record.unit_id, record.year, record.month)? {
            return Err(CalendarError::DuplicateMonth {
                unit_id: record.unit_id,
                year: record.year,
                month: record.month,
            });
        }
        self.draft.insert_month(record.clone())?;
        self.entries.push(LogEntry::MonthInserted { record });
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
        if unit_id == self.draft.id
            && !self.draft.months.contains_key(&(year, month))
            && let Some(record) = self.base.months.get(&(year, month))
        {
            self.draft.months.insert((year, month), record.clone());
        }
        let (first_day, last_day) = (*days.start(), *days.end());
        self.draft.update_partial(unit_id, year, month, days, state)?;
        self.entries.push(LogEntry::MonthUpdated {
            unit_id,
            year,
            month,
            first_day,
            last_day,
            state,
        });
        Ok(())
    }
}

impl LockRegistry for Journal<'_> {
    fn is_locked(&self, unit_id: UnitId, state: StateCode) -> Result<bool, CalendarError> {
        if unit_id == self.draft.id
            && let Some(locked) = self.draft.locks.get(&state)
        {
            return Ok(*locked);
        }
        self.base.is_locked(unit_id, state)
    }

    fn set_locked(&mut self, unit_id: UnitId, state: StateCode, locked: bool) -> Result<(), CalendarError> {
        self.draft.set_locked(unit_id, state, locked)?;
        self.entries.push(LogEntry::LockSet {
            unit_id,
            state,
            locked,
        });
        Ok(())
    }
}

impl UnitDirectory for Journal<'_> {
    fn default_state(&self, unit_id: UnitId) -> Option<StateCode> {
        self.base.default_state(unit_id)
    }
}
