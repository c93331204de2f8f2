use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{LogEntry, UnitId};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub of committed storage mutations, one channel per unit.
pub struct NotifyHub {
    channels: DashMap<UnitId, broadcast::Sender<LogEntry>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a unit's mutations. Creates the channel if needed.
    pub fn subscribe(&self, unit_id: UnitId) -> broadcast::Receiver<LogEntry> {
        let sender = self
            .channels
            .entry(unit_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an entry to its unit's subscribers. No-op if nobody is listening.
    pub fn send(&self, entry: &LogEntry) {
        if let Some(sender) = self.channels.get(&entry.unit_id()) {
            let _ = sender.send(entry.clone());
        }
    }

    /// Drop a unit's channel; pending receivers see `Closed`.
    pub fn remove(&self, unit_id: &UnitId) {
        self.channels.remove(unit_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let uid = Ulid::new();
        let mut rx = hub.subscribe(uid);

        let entry = LogEntry::LockSet {
            unit_id: uid,
            state: 42,
            locked: true,
        };
        hub.send(&entry);

        assert_eq!(rx.recv().await.unwrap(), entry);
    }

    #[tokio::test]
    async fn other_units_are_not_delivered() {
        let hub = NotifyHub::new();
        let uid = Ulid::new();
        let mut rx = hub.subscribe(uid);

        hub.send(&LogEntry::UnitDeleted { id: Ulid::new() });
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&LogEntry::UnitDeleted { id: Ulid::new() });
    }

    #[tokio::test]
    async fn remove_closes_channel() {
        let hub = NotifyHub::new();
        let uid = Ulid::new();
        let mut rx = hub.subscribe(uid);
        hub.remove(&uid);
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
    }
}
