//! Topic-indexed pub/sub fan-out for trace events.
//!
//! Every publish is best-effort and non-blocking: a subscriber that can't
//! keep up drops old events rather than stalling the publisher, and a
//! subscriber failing to receive never affects any other subscriber.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::log::TraceEvent;

const CHANNEL_CAPACITY: usize = 1024;

/// A live subscription to one topic.
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<std::sync::Arc<TraceEvent>>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Await the next event on this topic. Returns `None` once the bus has
    /// been dropped and no further events can arrive.
    pub async fn recv(&mut self) -> Option<std::sync::Arc<TraceEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Topic-keyed event bus. Every publish also republishes to the broad
/// `"runs"` topic and the run-scoped `"run:<run_id>"` topic so subscribers
/// can listen at whatever granularity they need.
#[derive(Default)]
pub struct EventBus {
    topics: Mutex<HashMap<String, broadcast::Sender<std::sync::Arc<TraceEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.topics.lock().unwrap();
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Subscription {
            topic: topic.to_string(),
            rx: sender.subscribe(),
        }
    }

    fn publish_one(&self, topic: &str, event: std::sync::Arc<TraceEvent>) {
        let mut topics = self.topics.lock().unwrap();
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        // No subscribers is not an error: fan-out is best-effort.
        let _ = sender.send(event);
    }

    /// Publish an event to its own topic, `"runs"`, and `"run:<run_id>"`.
    pub fn publish(&self, topic: &str, event: TraceEvent) {
        let event = std::sync::Arc::new(event);
        self.publish_one(topic, event.clone());
        self.publish_one("runs", event.clone());
        self.publish_one(&format!("run:{}", event.run_id), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{RunId, SpanId};
    use crate::log::TraceEventKind;

    fn sample_event(run_id: &RunId) -> TraceEvent {
        TraceEvent {
            kind: TraceEventKind::NodeStart,
            timestamp_us: 0,
            run_id: run_id.clone(),
            span_id: SpanId::new(),
            parent_span_id: None,
            depth: 0,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn subscribers_on_own_topic_receive_events() {
        let bus = EventBus::new();
        let run_id = RunId::new();
        let mut sub = bus.subscribe(&format!("worker:{}", SpanId::new()));
        bus.publish(sub.topic().to_string().as_str(), sample_event(&run_id));
        let event = sub.recv().await.unwrap();
        assert_eq!(event.run_id, run_id);
    }

    #[tokio::test]
    async fn publish_fans_out_to_runs_and_run_scoped_topics() {
        let bus = EventBus::new();
        let run_id = RunId::new();
        let mut runs_sub = bus.subscribe("runs");
        let mut run_sub = bus.subscribe(&format!("run:{run_id}"));

        bus.publish("worker:abc", sample_event(&run_id));

        assert!(runs_sub.recv().await.is_some());
        assert!(run_sub.recv().await.is_some());
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = EventBus::new();
        let run_id = RunId::new();
        bus.publish("nobody:listening", sample_event(&run_id));
    }
}
