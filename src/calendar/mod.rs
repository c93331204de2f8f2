//! Per-unit occupancy calendar.
//!
//! A unit's calendar is stored as one fixed-width record per month. Reads
//! synthesize missing months from the unit's default state and return
//! run-length encoded runs; writes split events into month-aligned pieces and
//! refuse to paint over states that are locked.

mod error;
mod event;
mod lock;
mod mutations;
mod queries;
mod runs;
mod store;

pub use error::CalendarError;
pub use event::CalendarEvent;
pub use runs::{encode_month, encode_runs, visible_state};
pub use store::{LockRegistry, MonthlyStateStore, UnitDirectory};

use crate::model::*;

/// Per-event result of `UnitCalendar::update_calendar`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventOutcome {
    /// Applied to the calendar.
    Updated,
    /// Event belongs to another unit; dropped.
    WrongUnit,
    /// Range holds a locked state different from the event's; dropped.
    Blocked,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Updated => "updated",
            EventOutcome::WrongUnit => "wrong_unit",
            EventOutcome::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar of one unit. Holds no storage; every operation is handed the
/// store it should read from or write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitCalendar {
    unit_id: UnitId,
    default_state: StateCode,
}

impl UnitCalendar {
    pub fn new(unit_id: UnitId, default_state: StateCode) -> Self {
        Self {
            unit_id,
            default_state,
        }
    }

    /// Look the unit's default state up in `directory`.
    pub fn load<D: UnitDirectory + ?Sized>(directory: &D, unit_id: UnitId) -> Result<Self, CalendarError> {
        let default_state = directory
            .default_state(unit_id)
            .ok_or(CalendarError::UnitNotFound(unit_id))?;
        Ok(Self::new(unit_id, default_state))
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn default_state(&self) -> StateCode {
        self.default_state
    }
}
