//! In-process data change notifications.

use tokio::sync::broadcast;

/// Capacity of the broadcast buffer; slower subscribers skip older events.
const EVENT_BUFFER: usize = 256;

/// What happened to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
  Saved,
  Deleted,
}

/// A record in `collection` was saved or deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEvent {
  pub collection: String,
  pub id: String,
  pub kind: ChangeKind,
}

/// Pub/sub bus for [`DataEvent`]s. Clones publish to the same subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
  tx: broadcast::Sender<DataEvent>,
}

impl EventBus {
  pub fn new() -> Self {
    let (tx, _rx) = broadcast::channel(EVENT_BUFFER);
    Self { tx }
  }

  /// Subscribe to events published from now on
  pub fn subscribe(&self) -> broadcast::Receiver<DataEvent> {
    self.tx.subscribe()
  }

  /// Publish an event. Having no subscribers is fine.
  pub fn publish(&self, event: DataEvent) {
    let _ = self.tx.send(event);
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_subscribers_receive_events() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    bus.clone().publish(DataEvent {
      collection: "rooms".to_string(),
      id: "r1".to_string(),
      kind: ChangeKind::Saved,
    });
    let event = rx.recv().await.unwrap();
    assert_eq!(event.id, "r1");
    assert_eq!(event.kind, ChangeKind::Saved);
  }

  #[test]
  fn test_publish_without_subscribers() {
    EventBus::new().publish(DataEvent {
      collection: "rooms".to_string(),
      id: "r1".to_string(),
      kind: ChangeKind::Deleted,
    });
  }
}
