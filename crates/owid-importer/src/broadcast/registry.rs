//! Per-job subscriber registry and the broadcaster built on it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use super::events::{JobEvent, Notifier};

/// Process-wide map of live subscribers per job.
///
/// Channels are created on first subscription and dropped once the last
/// receiver is gone.
pub struct SubscriberRegistry {
    channels: RwLock<HashMap<String, broadcast::Sender<JobEvent>>>,
    capacity: usize,
}

impl SubscriberRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribes to the events of one job.
    pub fn subscribe(&self, job_id: &str) -> broadcast::Receiver<JobEvent> {
        let mut channels = match self.channels.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Delivers an event to the subscribers of its job.
    pub fn publish(&self, event: &JobEvent) {
        let job_id = event.job_id();
        let orphaned = {
            let channels = match self.channels.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match channels.get(job_id) {
                Some(sender) => sender.send(event.clone()).is_err(),
                None => false,
            }
        };

        if orphaned {
            let mut channels = match self.channels.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if channels
                .get(job_id)
                .is_some_and(|sender| sender.receiver_count() == 0)
            {
                channels.remove(job_id);
            }
        }
    }

    /// Number of jobs with at least one registered channel.
    pub fn len(&self) -> usize {
        match self.channels.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Broadcasts job events to a firehose channel and to per-job subscribers.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
    registry: Arc<SubscriberRegistry>,
}

impl JobEventBroadcaster {
    /// Creates a broadcaster over the given registry.
    pub fn new(capacity: usize, registry: Arc<SubscriberRegistry>) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
            registry,
        }
    }

    /// Subscribes to every event of every job.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Subscribes to the events of one job.
    pub fn subscribe_job(&self, job_id: &str) -> broadcast::Receiver<JobEvent> {
        self.registry.subscribe(job_id)
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(100, Arc::new(SubscriberRegistry::default()))
    }
}

impl Notifier for JobEventBroadcaster {
    fn notify(&self, event: JobEvent) {
        self.registry.publish(&event);
        // No active receivers is fine
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Unit, UnitKey, UnitKind, UnitStatus};

    fn unit_event(job_id: &str) -> JobEvent {
        JobEvent::unit(&Unit {
            id: 1,
            job_id: job_id.to_string(),
            key: UnitKey::new(UnitKind::Country, "France", None),
            file_name: None,
            status: UnitStatus::Processing,
            fills: Vec::new(),
        })
    }

    #[test]
    fn test_firehose_receives_everything() {
        let broadcaster = JobEventBroadcaster::default();
        let mut rx = broadcaster.subscribe();

        broadcaster.notify(unit_event("a"));
        broadcaster.notify(unit_event("b"));

        assert_eq!(rx.try_recv().unwrap().job_id(), "a");
        assert_eq!(rx.try_recv().unwrap().job_id(), "b");
    }

    #[test]
    fn test_job_subscription_is_scoped() {
        let broadcaster = JobEventBroadcaster::default();
        let mut rx = broadcaster.subscribe_job("a");

        broadcaster.notify(unit_event("b"));
        broadcaster.notify(unit_event("a"));

        assert_eq!(rx.try_recv().unwrap().job_id(), "a");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let registry = Arc::new(SubscriberRegistry::new(4));
        let broadcaster = JobEventBroadcaster::new(4, Arc::clone(&registry));

        let rx = broadcaster.subscribe_job("a");
        assert_eq!(registry.len(), 1);
        drop(rx);

        broadcaster.notify(unit_event("a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_notify_without_subscribers_is_silent() {
        let broadcaster = JobEventBroadcaster::default();
        broadcaster.notify(unit_event("nobody"));
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(unit_event("a")).unwrap();
        assert_eq!(json["type"], "unit");
        assert_eq!(json["jobId"], "a");
        assert_eq!(json["unit"]["status"], "processing");
        assert_eq!(json["unit"]["partition"], "France");
    }
}
