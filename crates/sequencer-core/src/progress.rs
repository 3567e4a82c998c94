use crate::types::{EntityId, EntityKind, EntityStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One status transition of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub entity: EntityId,
    pub name: String,
    pub discriminator: String,
    pub kind: EntityKind,
    pub from: EntityStatus,
    pub to: EntityStatus,
    pub timestamp: DateTime<Utc>,
}

/// Fan-out of status events to any number of observers.
///
/// Publishing never blocks. A subscriber that falls behind by more than the
/// channel capacity loses the oldest events and sees `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: broadcast::Sender<StatusEvent>,
}

impl ProgressSink {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        ProgressSink { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: StatusEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(to: EntityStatus) -> StatusEvent {
        StatusEvent {
            entity: EntityId::new(),
            name: "expose".into(),
            discriminator: "instruction.wait".into(),
            kind: EntityKind::Instruction,
            from: EntityStatus::Created,
            to,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let sink = ProgressSink::new(4);
        assert_eq!(sink.subscriber_count(), 0);
        sink.publish(event(EntityStatus::Running));
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let sink = ProgressSink::default();
        let mut a = sink.subscribe();
        let mut b = sink.subscribe();
        sink.publish(event(EntityStatus::Running));
        assert_eq!(a.try_recv().unwrap().to, EntityStatus::Running);
        assert_eq!(b.try_recv().unwrap().to, EntityStatus::Running);
        assert!(a.try_recv().is_err());
    }

    #[test]
    fn slow_subscriber_lags_instead_of_blocking() {
        let sink = ProgressSink::new(2);
        let mut rx = sink.subscribe();
        for _ in 0..5 {
            sink.publish(event(EntityStatus::Running));
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }
}
