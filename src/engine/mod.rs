mod bookings;
mod error;
mod journal;
mod mutations;
mod queries;

pub use bookings::Booking;
pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};

use crate::calendar::{CalendarError, LockRegistry, MonthlyStateStore, UnitCalendar};
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use journal::Staged;

pub type SharedUnitState = Arc<RwLock<UnitState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// Entries of one operation; they land in the same flush.
    Append {
        entries: Vec<LogEntry>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        entries: Vec<LogEntry>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<LogEntry>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Commit the whole batch with one write and one fsync.
/// 4. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { entries, response } => {
                let mut batch = vec![(entries, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { entries, response }) => batch.push((entries, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                if let Err(ref e) = result {
                    tracing::error!("WAL flush of {} operations failed: {e}", batch.len());
                }
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    wal.commit(batch.iter().flat_map(|(entries, _)| entries))
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { entries, response } => {
            let _ = response.send(wal.compact(&entries));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are handled by the batch loop"),
    }
}

/// All units of one tenant, backed by one WAL.
pub struct Engine {
    pub units: DashMap<UnitId, SharedUnitState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Serializes unit creation/deletion with compaction. Taken before any unit lock.
    pub(super) directory_gate: Mutex<()>,
}

/// Replay one WAL entry onto the unit map.
fn apply_entry(units: &mut HashMap<UnitId, UnitState>, entry: &LogEntry) {
    let unit_id = entry.unit_id();
    match entry {
        LogEntry::UnitCreated { id, name, default_state } => {
            units.insert(*id, UnitState::new(*id, name.clone(), *default_state));
            return;
        }
        LogEntry::UnitDeleted { id } => {
            units.remove(id);
            return;
        }
        _ => {}
    }
    let Some(unit) = units.get_mut(&unit_id) else {
        tracing::warn!("WAL replay: entry for unknown unit {unit_id} skipped");
        return;
    };
    let result = match entry {
        LogEntry::UnitUpdated { name, default_state, .. } => {
            unit.name = name.clone();
            unit.default_state = *default_state;
            Ok(())
        }
        LogEntry::MonthInserted { record } => unit.insert_month(record.clone()),
        LogEntry::MonthUpdated {
            unit_id,
            year,
            month,
            first_day,
            last_day,
            state,
        } => unit.update_partial(*unit_id, *year, *month, *first_day..=*last_day, *state),
        LogEntry::LockSet { unit_id, state, locked } => unit.set_locked(*unit_id, *state, *locked),
        LogEntry::UnitCreated { .. } | LogEntry::UnitDeleted { .. } => Ok(()),
    };
    if let Err(e) = result {
        tracing::warn!("WAL replay: {e}");
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, entries) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Replay into plain maps; wrap in locks once the state is final.
        let mut replayed = HashMap::new();
        for entry in &entries {
            apply_entry(&mut replayed, entry);
        }
        tracing::debug!(
            "replayed {} WAL entries from {} into {} units",
            entries.len(),
            wal_path.display(),
            replayed.len()
        );

        let units = DashMap::with_capacity(replayed.len());
        for (id, unit) in replayed {
            units.insert(id, Arc::new(RwLock::new(unit)));
        }

        Ok(Self {
            units,
            wal_tx,
            notify,
            directory_gate: Mutex::new(()),
        })
    }

    /// Write entries to the WAL via the background group-commit writer.
    async fn wal_append(&self, entries: Vec<LogEntry>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { entries, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Log staged writes, then make them visible on `unit` and to subscribers.
    /// If the WAL append fails, `unit` is left as it was.
    pub(super) async fn commit(&self, unit: &mut UnitState, staged: Staged) -> Result<(), EngineError> {
        if staged.entries().is_empty() {
            return Ok(());
        }
        self.wal_append(staged.entries().to_vec()).await?;
        for entry in staged.apply_to(unit) {
            self.notify.send(&entry);
        }
        Ok(())
    }

    pub fn get_unit(&self, id: &UnitId) -> Option<SharedUnitState> {
        self.units.get(id).map(|e| e.value().clone())
    }

    /// Calendar + exclusive access to a unit's state.
    pub(super) async fn calendar_write(
        &self,
        unit_id: UnitId,
    ) -> Result<(UnitCalendar, OwnedRwLockWriteGuard<UnitState>), EngineError> {
        let unit = self.get_unit(&unit_id).ok_or(EngineError::NotFound(unit_id))?;
        let guard = unit.write_owned().await;
        let calendar = UnitCalendar::load(&*guard, unit_id)?;
        Ok((calendar, guard))
    }
}

/// Reject ranges outside the supported years or wider than `MAX_RANGE_DAYS`.
pub(crate) fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<(), EngineError> {
    if end < start {
        return Err(CalendarError::InvalidRange { start, end }.into());
    }
    if start.year() < MIN_YEAR || end.year() > MAX_YEAR {
        return Err(EngineError::LimitExceeded("date out of supported range"));
    }
    if (end - start).num_days() + 1 > MAX_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(())
}
