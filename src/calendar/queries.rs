use std::collections::{BTreeMap, HashSet};

use chrono::{Datelike, NaiveDate};

use crate::model::*;

use super::runs::{encode_month, visible_state};
use super::{CalendarError, CalendarEvent, MonthlyStateStore, UnitCalendar};

impl UnitCalendar {
    /// Run-length encoded state of every month touched by `[start, end]`.
    ///
    /// One store read per calendar year: the first year from the start month
    /// on, the last year up to the end month, interior years whole. Months the
    /// store has never seen read as all-default. The first and last month are
    /// trimmed to the requested days.
    pub fn get_raw_range_data<S: MonthlyStateStore + ?Sized>(
        &self,
        store: &S,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MonthRuns>, CalendarError> {
        if end < start {
            return Err(CalendarError::InvalidRange { start, end });
        }
        let (start_year, end_year) = (start.year(), end.year());

        let mut stored: BTreeMap<MonthKey, MonthRecord> = BTreeMap::new();
        for year in start_year..=end_year {
            let months = match (year == start_year, year == end_year) {
                (true, true) => start.month()..=end.month(),
                (true, false) => start.month()..=12,
                (false, true) => 1..=end.month(),
                (false, false) => 1..=12,
            };
            for record in store.read_months(self.unit_id, year..=year, months)? {
                stored.insert(record.key(), record);
            }
        }

        let first_key = (start_year, start.month());
        let last_key = (end_year, end.month());
        let mut result = Vec::new();
        for key @ (year, month) in months_between(start, end) {
            let record = stored
                .remove(&key)
                .unwrap_or_else(|| MonthRecord::filled(self.unit_id, year, month, self.default_state));
            let first_day = if key == first_key { start.day() } else { 1 };
            let last_day = if key == last_key { end.day() } else { record.len() };
            result.push(encode_month(&record, first_day, last_day));
        }
        Ok(result)
    }

    /// One event per run, in chronological order. Runs never span months.
    pub fn get_events<S: MonthlyStateStore + ?Sized>(
        &self,
        store: &S,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let mut events = Vec::new();
        for month in self.get_raw_range_data(store, start, end)? {
            for run in &month.runs {
                let (Some(first), Some(last)) = (
                    NaiveDate::from_ymd_opt(month.year, month.month, run.start_day),
                    NaiveDate::from_ymd_opt(month.year, month.month, run.end_day),
                ) else {
                    continue;
                };
                events.push(CalendarEvent::new(self.unit_id, run.state, first, last)?);
            }
        }
        Ok(events)
    }

    /// Distinct states in `[start, end]`. Unless `confirmed`, every tentative
    /// state is reported as `TENTATIVE_STATE`.
    pub fn get_states<S: MonthlyStateStore + ?Sized>(
        &self,
        store: &S,
        start: NaiveDate,
        end: NaiveDate,
        confirmed: bool,
    ) -> Result<HashSet<StateCode>, CalendarError> {
        Ok(self
            .get_raw_range_data(store, start, end)?
            .iter()
            .flat_map(|month| month.runs.iter())
            .map(|run| visible_state(run.state, confirmed))
            .collect())
    }

    /// True iff `[start, end]` holds nothing but `accepted` states.
    pub fn state_availability<S: MonthlyStateStore + ?Sized>(
        &self,
        store: &S,
        start: NaiveDate,
        end: NaiveDate,
        accepted: &HashSet<StateCode>,
    ) -> Result<bool, CalendarError> {
        let states = self.get_states(store, start, end, false)?;
        Ok(states.is_subset(accepted))
    }
}
