use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

use super::{CalendarError, CalendarEvent, EventOutcome, LockRegistry, MonthlyStateStore, UnitCalendar};

impl UnitCalendar {
    /// Apply a batch of events.
    ///
    /// Every event is checked against the calendar as it stood before the
    /// batch: it must belong to this unit and must not paint over a locked
    /// state other than its own. Accepted events are split into month-sized
    /// pieces and written in input order, so on overlap the later event wins.
    /// A storage error aborts the batch; pieces already written stay written.
    pub fn update_calendar<S: MonthlyStateStore + LockRegistry + ?Sized>(
        &self,
        store: &mut S,
        events: &[CalendarEvent],
    ) -> Result<HashMap<Ulid, EventOutcome>, CalendarError> {
        let mut outcomes = HashMap::with_capacity(events.len());
        let mut accepted = Vec::with_capacity(events.len());

        for event in events {
            if event.unit_id != self.unit_id {
                outcomes.insert(event.id, EventOutcome::WrongUnit);
                continue;
            }
            if self.range_blocked(&*store, event)? {
                outcomes.insert(event.id, EventOutcome::Blocked);
                continue;
            }
            accepted.push(event);
        }

        for event in accepted {
            for piece in monthly_pieces(event) {
                self.add_month_event(store, &piece)?;
            }
            outcomes.insert(event.id, EventOutcome::Updated);
        }

        Ok(outcomes)
    }

    /// Write one month-sized event: a partial update when the month is
    /// stored, otherwise a new default-filled month carrying the event's days.
    pub fn add_month_event<S: MonthlyStateStore + ?Sized>(
        &self,
        store: &mut S,
        event: &CalendarEvent,
    ) -> Result<(), CalendarError> {
        if !event.same_month() {
            return Err(CalendarError::InvalidRange {
                start: event.start(),
                end: event.end(),
            });
        }
        let (year, month) = (event.start_year(), event.start_month());
        let days = event.start_day()..=event.end_day();

        if store.month_exists(self.unit_id, year, month)? {
            store.update_partial(self.unit_id, year, month, days, event.state)
        } else {
            let mut record = MonthRecord::filled(self.unit_id, year, month, self.default_state);
            record.fill(days, event.state);
            store.insert_month(record)
        }
    }

    /// Paint each event's range back to the default state, unlocking its
    /// state first. Nothing is deleted from storage.
    ///
    /// Only lock rows of this unit are touched; events of other units come
    /// back as `WrongUnit`.
    pub fn remove_events<S: MonthlyStateStore + LockRegistry + ?Sized>(
        &self,
        store: &mut S,
        events: &[CalendarEvent],
    ) -> Result<HashMap<Ulid, EventOutcome>, CalendarError> {
        let mut rewritten = Vec::with_capacity(events.len());
        for event in events {
            let mut event = event.clone();
            if event.unit_id == self.unit_id {
                event.unlock(&mut *store)?;
            }
            event.state = self.default_state;
            rewritten.push(event);
        }
        self.update_calendar(store, &rewritten)
    }

    fn range_blocked<S: MonthlyStateStore + LockRegistry + ?Sized>(
        &self,
        store: &S,
        event: &CalendarEvent,
    ) -> Result<bool, CalendarError> {
        for existing in self.get_states(store, event.start(), event.end(), true)? {
            if self.event_blocked(store, existing, event.state)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Month-aligned pieces of an event. Multi-year events go through the
/// yearly split first; month clipping assumes both ends share a year.
fn monthly_pieces(event: &CalendarEvent) -> Vec<CalendarEvent> {
    if event.same_month() {
        vec![event.clone()]
    } else if event.same_year() {
        event.transform_to_monthly_events()
    } else {
        event
            .transform_to_yearly_events()
            .iter()
            .flat_map(CalendarEvent::transform_to_monthly_events)
            .collect()
    }
}
