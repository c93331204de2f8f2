use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::model::{month_bounds, months_between, StateCode, UnitId};

use super::error::CalendarError;
use super::store::LockRegistry;

/// "Unit X is in state S from A to B", both ends inclusive.
///
/// Dates are private so `start <= end` always holds. Pieces produced by the
/// `transform_to_*` methods keep the parent's id, unit and state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: Ulid,
    pub unit_id: UnitId,
    pub state: StateCode,
    start: NaiveDate,
    end: NaiveDate,
    locked: bool,
}

impl CalendarEvent {
    pub fn new(
        unit_id: UnitId,
        state: StateCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self, CalendarError> {
        Self::with_id(Ulid::new(), unit_id, state, start, end)
    }

    pub fn with_id(
        id: Ulid,
        unit_id: UnitId,
        state: StateCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self, CalendarError> {
        if end < start {
            return Err(CalendarError::InvalidRange { start, end });
        }
        Ok(Self {
            id,
            unit_id,
            state,
            start,
            end,
            locked: false,
        })
    }

    /// Same event narrowed to `[start, end]`; callers keep the bounds inside self.
    fn clipped(&self, start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(self.start <= start && start <= end && end <= self.end);
        Self {
            start,
            end,
            ..self.clone()
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days covered, both ends included.
    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn same_year(&self) -> bool {
        self.start.year() == self.end.year()
    }

    pub fn same_month(&self) -> bool {
        self.same_year() && self.start.month() == self.end.month()
    }

    pub fn start_year(&self) -> i32 {
        self.start.year()
    }

    pub fn end_year(&self) -> i32 {
        self.end.year()
    }

    pub fn start_month(&self) -> u32 {
        self.start.month()
    }

    pub fn end_month(&self) -> u32 {
        self.end.month()
    }

    pub fn start_day(&self) -> u32 {
        self.start.day()
    }

    pub fn end_day(&self) -> u32 {
        self.end.day()
    }

    /// One event per calendar year touched, each clipped to that year.
    pub fn transform_to_yearly_events(&self) -> Vec<CalendarEvent> {
        if self.same_year() {
            return vec![self.clone()];
        }
        (self.start_year()..=self.end_year())
            .filter_map(|year| {
                let first = if year == self.start_year() {
                    self.start
                } else {
                    NaiveDate::from_ymd_opt(year, 1, 1)?
                };
                let last = if year == self.end_year() {
                    self.end
                } else {
                    NaiveDate::from_ymd_opt(year, 12, 31)?
                };
                Some(self.clipped(first, last))
            })
            .collect()
    }

    /// One event per calendar month touched, each clipped to that month.
    ///
    /// Multi-year events are split by year first.
    pub fn transform_to_monthly_events(&self) -> Vec<CalendarEvent> {
        if self.same_month() {
            return vec![self.clone()];
        }
        if !self.same_year() {
            return self
                .transform_to_yearly_events()
                .iter()
                .flat_map(CalendarEvent::transform_to_monthly_events)
                .collect();
        }
        months_between(self.start, self.end)
            .into_iter()
            .filter_map(|(year, month)| {
                let (first, last) = month_bounds(year, month)?;
                Some(self.clipped(first.max(self.start), last.min(self.end)))
            })
            .collect()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Mark this event's state as locked for its unit.
    pub fn lock<R: LockRegistry + ?Sized>(&mut self, registry: &mut R) -> Result<(), CalendarError> {
        registry.set_locked(self.unit_id, self.state, true)?;
        self.locked = true;
        Ok(())
    }

    pub fn unlock<R: LockRegistry + ?Sized>(&mut self, registry: &mut R) -> Result<(), CalendarError> {
        registry.set_locked(self.unit_id, self.state, false)?;
        self.locked = false;
        Ok(())
    }
}
