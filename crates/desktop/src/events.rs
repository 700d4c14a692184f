use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 256;

/// Events pushed to the presentation layer. Serialized as
/// `{"event": "scan_progress", "percent": 42.0}` and so on.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CatalogEvent {
    ScanProgress { percent: f64 },
    ScanComplete,
    ScanCancelled,
    ScanFailed { message: String },
}

impl CatalogEvent {
    /// True for the event that ends a scan run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CatalogEvent::ScanProgress { .. })
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CatalogEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: CatalogEvent) {
        if self.tx.send(event).is_err() {
            debug!("No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.tx.subscribe()
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

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let progress = serde_json::to_value(CatalogEvent::ScanProgress { percent: 12.5 }).unwrap();
        assert_eq!(
            progress,
            serde_json::json!({"event": "scan_progress", "percent": 12.5})
        );
        let complete = serde_json::to_value(CatalogEvent::ScanComplete).unwrap();
        assert_eq!(complete, serde_json::json!({"event": "scan_complete"}));
        let failed = serde_json::to_value(CatalogEvent::ScanFailed {
            message: "gone".to_string(),
        })
        .unwrap();
        assert_eq!(
            failed,
            serde_json::json!({"event": "scan_failed", "message": "gone"})
        );
    }

    #[test]
    fn subscribers_see_emitted_events() {
        let bus = EventBus::new();
        bus.emit(CatalogEvent::ScanComplete);
        let mut rx = bus.subscribe();
        bus.emit(CatalogEvent::ScanCancelled);
        assert_eq!(rx.try_recv().unwrap(), CatalogEvent::ScanCancelled);
        assert!(rx.try_recv().is_err());
        assert!(CatalogEvent::ScanCancelled.is_terminal());
        assert!(!CatalogEvent::ScanProgress { percent: 1.0 }.is_terminal());
    }
}
