use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::calendar::{CalendarError, CalendarEvent, EventOutcome, LockRegistry, UnitCalendar};
use crate::limits::*;
use crate::model::*;

use super::journal::{Journal, Staged};
use super::{validate_range, Engine, EngineError, WalCommand};

fn validate_unit_fields(name: Option<&str>, default_state: StateCode) -> Result<(), EngineError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("unit name too long"));
        }
    if default_state < 0 {
        return Err(EngineError::InvalidDefaultState(default_state));
    }
    Ok(())
}

pub(super) fn validate_batch(events: &[CalendarEvent]) -> Result<(), EngineError> {
    if events.len() > MAX_BATCH_SIZE {
        return Err(EngineError::LimitExceeded("batch too large"));
    }
    for event in events {
        validate_range(event.start(), event.end())?;
    }
    Ok(())
}

pub(super) fn record_outcomes(unit_id: UnitId, outcomes: &HashMap<Ulid, EventOutcome>) {
    for (event_id, outcome) in outcomes {
        metrics::counter!(crate::observability::CALENDAR_EVENTS_TOTAL, "outcome" => outcome.as_str())
            .increment(1);
        if *outcome == EventOutcome::Blocked {
            tracing::warn!("event {event_id} on unit {unit_id} blocked by a locked state");
        }
    }
}

impl Engine {
    pub async fn create_unit(
        &self,
        id: UnitId,
        name: Option<String>,
        default_state: StateCode,
    ) -> Result<(), EngineError> {
        if self.units.len() >= MAX_UNITS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many units"));
        }
        validate_unit_fields(name.as_deref(), default_state)?;
        let _gate = self.directory_gate.lock().await;
        if self.units.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let entry = LogEntry::UnitCreated {
            id,
            name: name.clone(),
            default_state,
        };
        self.wal_append(vec![entry.clone()]).await?;
        self.units
            .insert(id, Arc::new(RwLock::new(UnitState::new(id, name, default_state))));
        self.notify.send(&entry);
        Ok(())
    }

    /// Rename a unit or change its default state. Months already stored keep
    /// their days; only months created from now on use the new default.
    pub async fn update_unit(
        &self,
        id: UnitId,
        name: Option<String>,
        default_state: StateCode,
    ) -> Result<(), EngineError> {
        validate_unit_fields(name.as_deref(), default_state)?;
        let unit = self.get_unit(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = unit.write().await;

        let entry = LogEntry::UnitUpdated {
            id,
            name: name.clone(),
            default_state,
        };
        self.wal_append(vec![entry.clone()]).await?;
        guard.name = name;
        guard.default_state = default_state;
        self.notify.send(&entry);
        Ok(())
    }

    pub async fn delete_unit(&self, id: UnitId) -> Result<(), EngineError> {
        let _gate = self.directory_gate.lock().await;
        let unit = self.get_unit(&id).ok_or(EngineError::NotFound(id))?;
        let _guard = unit.write().await;

        let entry = LogEntry::UnitDeleted { id };
        self.wal_append(vec![entry.clone()]).await?;
        self.units.remove(&id);
        self.notify.send(&entry);
        self.notify.remove(&id);
        Ok(())
    }

    /// Apply a batch of events to one unit. See `UnitCalendar::update_calendar`.
    pub async fn update_calendar(
        &self,
        unit_id: UnitId,
        events: &[CalendarEvent],
    ) -> Result<HashMap<Ulid, EventOutcome>, EngineError> {
        validate_batch(events)?;
        let (calendar, mut guard) = self.calendar_write(unit_id).await?;
        let mut journal = Journal::new(&guard);
        let result = calendar.update_calendar(&mut journal, events);
        let staged = journal.into_staged();
        let outcomes = self.finish(unit_id, &mut guard, staged, result).await?;
        record_outcomes(unit_id, &outcomes);
        Ok(outcomes)
    }

    /// Like `update_calendar`, then lock the state of every event that was
    /// applied, before the unit is released.
    pub async fn update_and_lock(
        &self,
        unit_id: UnitId,
        events: &[CalendarEvent],
    ) -> Result<HashMap<Ulid, EventOutcome>, EngineError> {
        validate_batch(events)?;
        let (calendar, mut guard) = self.calendar_write(unit_id).await?;
        let mut journal = Journal::new(&guard);
        let result = lock_updated(&calendar, &mut journal, events);
        let staged = journal.into_staged();
        let outcomes = self.finish(unit_id, &mut guard, staged, result).await?;
        record_outcomes(unit_id, &outcomes);
        Ok(outcomes)
    }

    /// Reset each event's range to the unit's default and unlock its state.
    pub async fn remove_events(
        &self,
        unit_id: UnitId,
        events: &[CalendarEvent],
    ) -> Result<HashMap<Ulid, EventOutcome>, EngineError> {
        validate_batch(events)?;
        let (calendar, mut guard) = self.calendar_write(unit_id).await?;
        let mut journal = Journal::new(&guard);
        let result = calendar.remove_events(&mut journal, events);
        let staged = journal.into_staged();
        let outcomes = self.finish(unit_id, &mut guard, staged, result).await?;
        record_outcomes(unit_id, &outcomes);
        Ok(outcomes)
    }

    pub async fn set_lock(&self, unit_id: UnitId, state: StateCode, locked: bool) -> Result<(), EngineError> {
        let (_, mut guard) = self.calendar_write(unit_id).await?;
        let mut journal = Journal::new(&guard);
        let result = journal.set_locked(unit_id, state, locked);
        let staged = journal.into_staged();
        self.finish(unit_id, &mut guard, staged, result).await
    }

    /// Commit an operation's staged writes. An operation that stopped on an
    /// error commits nothing, so a batch lands whole or not at all.
    async fn finish<T>(
        &self,
        unit_id: UnitId,
        unit: &mut UnitState,
        staged: Staged,
        result: Result<T, CalendarError>,
    ) -> Result<T, EngineError> {
        let value = result?;
        tracing::debug!("unit {unit_id}: {} storage writes", staged.entries().len());
        self.commit(unit, staged).await?;
        Ok(value)
    }

    /// Rewrite the WAL as a snapshot of the current state.
    ///
    /// Every unit stays read-locked until the snapshot has replaced the log,
    /// so no append can land in the old file after its unit was captured.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.directory_gate.lock().await;
        let units: Vec<_> = self.units.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(units.len());
        let mut entries = Vec::new();
        for unit in units {
            let guard = unit.read_owned().await;
            entries.push(LogEntry::UnitCreated {
                id: guard.id,
                name: guard.name.clone(),
                default_state: guard.default_state,
            });
            for record in guard.months.values() {
                entries.push(LogEntry::MonthInserted { record: record.clone() });
            }
            for state in guard.locked_states() {
                entries.push(LogEntry::LockSet {
                    unit_id: guard.id,
                    state,
                    locked: true,
                });
            }
            guards.push(guard);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { entries, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

pub(super) fn lock_updated(
    calendar: &UnitCalendar,
    journal: &mut Journal<'_>,
    events: &[CalendarEvent],
) -> Result<HashMap<Ulid, EventOutcome>, CalendarError> {
    let outcomes = calendar.update_calendar(&mut *journal, events)?;
    for event in events {
        if outcomes.get(&event.id) == Some(&EventOutcome::Updated) {
            event.clone().lock(&mut *journal)?;
        }
    }
    Ok(outcomes)
}
