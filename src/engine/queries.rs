use std::collections::HashSet;

use chrono::NaiveDate;

use crate::calendar::{CalendarEvent, UnitCalendar};
use crate::limits::*;
use crate::model::*;

use super::{validate_range, Engine, EngineError};

impl Engine {
    /// All units, ordered by id.
    pub async fn list_units(&self) -> Vec<UnitInfo> {
        let shared: Vec<_> = self.units.iter().map(|e| e.value().clone()).collect();
        let mut units = Vec::with_capacity(shared.len());
        for unit in shared {
            let guard = unit.read().await;
            units.push(UnitInfo {
                id: guard.id,
                name: guard.name.clone(),
                default_state: guard.default_state,
            });
        }
        units.sort_by_key(|u| u.id);
        units
    }

    pub async fn get_unit_info(&self, id: UnitId) -> Result<UnitInfo, EngineError> {
        let unit = self.get_unit(&id).ok_or(EngineError::NotFound(id))?;
        let guard = unit.read().await;
        Ok(UnitInfo {
            id: guard.id,
            name: guard.name.clone(),
            default_state: guard.default_state,
        })
    }

    pub async fn get_events(
        &self,
        unit_id: UnitId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, EngineError> {
        validate_range(start, end)?;
        let unit = self.get_unit(&unit_id).ok_or(EngineError::NotFound(unit_id))?;
        let guard = unit.read().await;
        let calendar = UnitCalendar::load(&*guard, unit_id)?;
        Ok(calendar.get_events(&*guard, start, end)?)
    }

    pub async fn get_states(
        &self,
        unit_id: UnitId,
        start: NaiveDate,
        end: NaiveDate,
        confirmed: bool,
    ) -> Result<HashSet<StateCode>, EngineError> {
        validate_range(start, end)?;
        let unit = self.get_unit(&unit_id).ok_or(EngineError::NotFound(unit_id))?;
        let guard = unit.read().await;
        let calendar = UnitCalendar::load(&*guard, unit_id)?;
        Ok(calendar.get_states(&*guard, start, end, confirmed)?)
    }

    pub async fn state_availability(
        &self,
        unit_id: UnitId,
        start: NaiveDate,
        end: NaiveDate,
        accepted: &HashSet<StateCode>,
    ) -> Result<bool, EngineError> {
        if accepted.len() > MAX_ACCEPTED_STATES {
            return Err(EngineError::LimitExceeded("too many accepted states"));
        }
        validate_range(start, end)?;
        let unit = self.get_unit(&unit_id).ok_or(EngineError::NotFound(unit_id))?;
        let guard = unit.read().await;
        let calendar = UnitCalendar::load(&*guard, unit_id)?;
        Ok(calendar.state_availability(&*guard, start, end, accepted)?)
    }
}
