use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar::{CalendarEvent, EventOutcome, UnitCalendar};
use crate::model::*;

use super::journal::Journal;
use super::mutations::{lock_updated, record_outcomes, validate_batch};
use super::{Engine, EngineError};

/// Codes below this are reserved for unit defaults and administrative states.
pub const FIRST_BOOKING_STATE: StateCode = 11;

/// A reservation of one unit over a closed date range.
///
/// Bookings are stored elsewhere; the calendar only sees the state derived
/// from the booking's id and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: u64,
    pub unit_id: UnitId,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub confirmed: bool,
}

impl Booking {
    /// `11 + id` when confirmed, `-(11 + id)` while tentative.
    pub fn state(&self) -> Result<StateCode, EngineError> {
        let code = StateCode::try_from(self.id)
            .ok()
            .and_then(|id| id.checked_add(FIRST_BOOKING_STATE))
            .ok_or(EngineError::LimitExceeded("booking id out of range"))?;
        Ok(if self.confirmed { code } else { -code })
    }

    fn event(&self) -> Result<CalendarEvent, EngineError> {
        Ok(CalendarEvent::new(self.unit_id, self.state()?, self.start, self.end)?)
    }
}

fn outcome_of(outcomes: &HashMap<Ulid, EventOutcome>, event: &CalendarEvent) -> Result<EventOutcome, EngineError> {
    outcomes
        .get(&event.id)
        .copied()
        .ok_or(EngineError::MissingOutcome(event.id))
}

/// Release `old` and occupy `new` through one journal. The caller commits
/// only when the result is `Updated`.
fn move_event(
    calendar: &UnitCalendar,
    journal: &mut Journal<'_>,
    old: &CalendarEvent,
    new: &CalendarEvent,
) -> Result<EventOutcome, EngineError> {
    let released = calendar.remove_events(&mut *journal, std::slice::from_ref(old))?;
    let released = outcome_of(&released, old)?;
    if released != EventOutcome::Updated {
        tracing::warn!("event {} on unit {}: original dates not released ({released})", old.id, old.unit_id);
    }
    let saved = lock_updated(calendar, journal, std::slice::from_ref(new))?;
    outcome_of(&saved, new)
}

impl Engine {
    /// Occupy the booking's dates with its state and lock that state.
    pub async fn save_booking(&self, booking: &Booking) -> Result<EventOutcome, EngineError> {
        let event = booking.event()?;
        let outcomes = self.update_and_lock(booking.unit_id, std::slice::from_ref(&event)).await?;
        let outcome = outcome_of(&outcomes, &event)?;
        tracing::info!("booking {} on unit {}: {outcome}", booking.id, booking.unit_id);
        Ok(outcome)
    }

    /// Release the booking's dates back to the unit default.
    pub async fn delete_booking(&self, booking: &Booking) -> Result<EventOutcome, EngineError> {
        let event = booking.event()?;
        let outcomes = self.remove_events(booking.unit_id, std::slice::from_ref(&event)).await?;
        outcome_of(&outcomes, &event)
    }

    /// Move a booking to new dates or a new status.
    ///
    /// On one unit the old dates are released and the new ones taken under a
    /// single write lock, and nothing is written unless the new dates are
    /// free. `Blocked` therefore leaves the original booking in place, still
    /// locked.
    pub async fn update_booking(&self, original: &Booking, updated: &Booking) -> Result<EventOutcome, EngineError> {
        if original.unit_id != updated.unit_id {
            return self.transfer_booking(original, updated).await;
        }
        let unit_id = updated.unit_id;
        let (old, new) = (original.event()?, updated.event()?);
        validate_batch(&[old.clone(), new.clone()])?;

        let (calendar, mut guard) = self.calendar_write(unit_id).await?;
        let mut journal = Journal::new(&guard);
        let outcome = move_event(&calendar, &mut journal, &old, &new)?;
        let staged = journal.into_staged();
        if outcome == EventOutcome::Updated {
            self.commit(&mut guard, staged).await?;
        }
        drop(guard);

        record_outcomes(unit_id, &HashMap::from([(new.id, outcome)]));
        tracing::info!("booking {} on unit {unit_id} moved: {outcome}", updated.id);
        Ok(outcome)
    }

    /// Book the new unit first, then release the old one, so the original
    /// dates stay held when the new unit is taken.
    async fn transfer_booking(&self, original: &Booking, updated: &Booking) -> Result<EventOutcome, EngineError> {
        let outcome = self.save_booking(updated).await?;
        if outcome == EventOutcome::Updated {
            let released = self.delete_booking(original).await?;
            if released != EventOutcome::Updated {
                tracing::warn!("booking {}: dates on unit {} not released ({released})", original.id, original.unit_id);
            }
        }
        Ok(outcome)
    }
}
