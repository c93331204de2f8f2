use crate::model::StateCode;

use super::{CalendarError, LockRegistry, UnitCalendar};

impl UnitCalendar {
    /// Writing `new` over days holding `existing` is refused when `existing`
    /// is locked for this unit. A state never blocks itself.
    pub fn event_blocked<R: LockRegistry + ?Sized>(
        &self,
        registry: &R,
        existing: StateCode,
        new: StateCode,
    ) -> Result<bool, CalendarError> {
        if existing == new {
            return Ok(false);
        }
        registry.is_locked(self.unit_id, existing)
    }
}
