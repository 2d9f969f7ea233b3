// Copyright 2026 Taxprobe Contributors
// SPDX-License-Identifier: Apache-2.0

//! Run event bus — typed progress events from the orchestrator.
//!
//! A `tokio::sync::broadcast` channel carrying [`RunEvent`] values. The CLI
//! progress bar and any log consumer subscribe independently. When no
//! subscribers exist, events are silently dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::ExtractionStatus;

/// Every event a run emits. Serialized to JSON for stream consumers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    /// A run started with this many tasks queued.
    RunStarted { total_tasks: usize },
    /// A worker picked up a task (attempt numbers start at 1).
    TaskStarted {
        property_id: String,
        jurisdiction: String,
        attempt: u32,
    },
    /// A task reached a terminal status.
    TaskFinished {
        property_id: String,
        jurisdiction: String,
        status: ExtractionStatus,
        attempts: u32,
        elapsed_ms: u64,
    },
    /// A dispatch was delayed to honor the per-domain pacing interval.
    DomainDelayed { domain: String, wait_ms: u64 },
    /// The run drained its worklist (or was cancelled).
    RunCompleted {
        completed: usize,
        cancelled: bool,
        total_ms: u64,
    },
}

/// Broadcast bus the orchestrator emits through.
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Ignored when none are listening.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let event = RunEvent::TaskFinished {
            property_id: "prop-42".into(),
            jurisdiction: "Wayne".into(),
            status: ExtractionStatus::Success,
            attempts: 1,
            elapsed_ms: 1200,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"TaskFinished\""));
        assert!(json.contains("prop-42"));

        let parsed: RunEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            RunEvent::TaskFinished { status, .. } => {
                assert_eq!(status, ExtractionStatus::Success)
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.emit(RunEvent::RunStarted { total_tasks: 10 });
    }

    #[test]
    fn subscriber_receives_emitted_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit(RunEvent::DomainDelayed {
            domain: "actweb.acttax.com".into(),
            wait_ms: 2_000,
        });
        match rx.try_recv().unwrap() {
            RunEvent::DomainDelayed { domain, wait_ms } => {
                assert_eq!(domain, "actweb.acttax.com");
                assert_eq!(wait_ms, 2_000);
            }
            _ => panic!("wrong event"),
        }
    }
}
