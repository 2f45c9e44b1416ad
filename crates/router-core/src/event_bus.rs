use chrono::Utc;
use tokio::sync::broadcast;

use router_types::{RouterEvent, TimestampedEvent};

/// The "active-context" store: a broadcast channel of lifecycle events. UI
/// channels and notification bridges subscribe; none of them co-own
/// router state, they only observe it.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TimestampedEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(2048);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: RouterEvent) {
        let _ = self.tx.send(TimestampedEvent { at: Utc::now(), event });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl router_types::ShadowEventSink for EventBus {
    fn publish(&self, event: RouterEvent) {
        EventBus::publish(self, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(RouterEvent::TaskStarted { task_id: "t1".into(), description: "hi".into() });
        let received = rx.recv().await.unwrap();
        assert!(matches!(received.event, RouterEvent::TaskStarted { .. }));
    }
}
