use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::schema::SchemaCategory;

/// Events the core emits to registered subscribers.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    SchemaInvalidated {
        category: Option<SchemaCategory>,
        name: Option<String>,
    },
    ActionLogged {
        name: Option<String>,
        sql: String,
    },
    Progress {
        task: String,
        index: usize,
        count: Option<usize>,
        done: bool,
    },
    WorkerResult {
        kind: &'static str,
    },
    LockChanged {
        category: Option<SchemaCategory>,
        name: Option<String>,
        label: String,
        acquired: bool,
    },
}

type Subscriber = Box<dyn Fn(&CoreEvent) + Send + Sync>;

/// Subscriber registry; delivery is synchronous on the emitting thread.
#[derive(Default, Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<(Uuid, Subscriber)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: impl Fn(&CoreEvent) + Send + Sync + 'static) -> Uuid {
        let id = Uuid::new_v4();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push((id, Box::new(subscriber)));
        }
        id
    }

    pub fn unsubscribe(&self, id: Uuid) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|(sid, _)| *sid != id);
        }
    }

    pub fn emit(&self, event: CoreEvent) {
        if let Ok(subscribers) = self.subscribers.lock() {
            for (_, subscriber) in subscribers.iter() {
                subscriber(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscribe_emit_unsubscribe() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let id = bus.subscribe(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(CoreEvent::WorkerResult { kind: "search" });
        bus.unsubscribe(id);
        bus.emit(CoreEvent::WorkerResult { kind: "search" });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
