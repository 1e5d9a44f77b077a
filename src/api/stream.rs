//! Streaming event bus
//!
//! At-least-once frames with monotonically increasing sequence numbers. A
//! bounded replay ring lets reconnecting observers resume from their last
//! seen sequence.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::broadcast;

use crate::types::{Alert, Execution, Opportunity};

const REPLAY_CAPACITY: usize = 1024;
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct StreamFrame {
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

pub struct EventBus {
    sender: broadcast::Sender<StreamFrame>,
    replay: RwLock<VecDeque<StreamFrame>>,
    next_seq: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            replay: RwLock::new(VecDeque::with_capacity(REPLAY_CAPACITY)),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamFrame> {
        self.sender.subscribe()
    }

    fn publish(&self, kind: &str, payload: serde_json::Value) {
        let frame = StreamFrame {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            kind: kind.to_string(),
            payload,
        };

        if let Ok(mut ring) = self.replay.write() {
            if ring.len() == REPLAY_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(frame.clone());
        }

        // No receivers is fine; frames still land in the replay ring.
        let _ = self.sender.send(frame);
    }

    pub fn opportunity_upsert(&self, opportunity: &Opportunity) {
        if let Ok(payload) = serde_json::to_value(opportunity) {
            self.publish("opportunity.upsert", payload);
        }
    }

    pub fn opportunity_retire(&self, id: &str) {
        self.publish("opportunity.retire", serde_json::json!({ "id": id }));
    }

    pub fn execution_transition(&self, execution: &Execution) {
        if let Ok(payload) = serde_json::to_value(execution) {
            self.publish("execution.transition", payload);
        }
    }

    pub fn alert(&self, alert: &Alert) {
        if let Ok(payload) = serde_json::to_value(alert) {
            self.publish("alert", payload);
        }
    }

    /// Frames newer than `after`, oldest first, for resume-on-reconnect.
    pub fn replay_after(&self, after: u64) -> Vec<StreamFrame> {
        match self.replay.read() {
            Ok(ring) => ring.iter().filter(|f| f.seq > after).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst).saturating_sub(1)
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
    fn sequences_are_monotonic_and_resumable() {
        let bus = EventBus::new();
        bus.opportunity_retire("a");
        bus.opportunity_retire("b");
        bus.opportunity_retire("c");

        let frames = bus.replay_after(0);
        let seqs: Vec<u64> = frames.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        let resumed = bus.replay_after(2);
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].seq, 3);
    }

    #[tokio::test]
    async fn subscribers_receive_published_frames() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.opportunity_retire("x");
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.kind, "opportunity.retire");
        assert_eq!(frame.payload["id"], "x");
    }
}
