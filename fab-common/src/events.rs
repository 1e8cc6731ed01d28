//! Event types for the Fab pipeline event system
//!
//! Provides shared event definitions and EventBus for the Fab services.
//! Events are broadcast via EventBus and can be serialized for SSE
//! transmission, so the pipeline never needs to be polled for completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// One discrete pipeline stage bounded by a design state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Vision analysis of the design's source images
    Analyze,
    /// 3D preview generation (video first, full model assets may follow)
    Preview,
    /// Manufacturing file conversion (STL/STEP)
    Convert,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Analyze => "analyze",
            PipelineStage::Preview => "preview",
            PipelineStage::Convert => "convert",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "analyze" => Ok(PipelineStage::Analyze),
            "preview" => Ok(PipelineStage::Preview),
            "convert" => Ok(PipelineStage::Convert),
            other => Err(format!("unknown pipeline stage: {}", other)),
        }
    }
}

/// Fab pipeline event types
///
/// Broadcast by the orchestrator and entitlement gate; consumed by SSE
/// handlers and tests. All events carry the design/user context needed to
/// correlate them without a follow-up query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A new design record was created (upload, generation, or edit)
    DesignCreated {
        design_id: Uuid,
        owner_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline stage began executing for a design
    StageStarted {
        design_id: Uuid,
        stage: PipelineStage,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline stage completed and its state transition was committed
    StageCompleted {
        design_id: Uuid,
        stage: PipelineStage,
        /// Design state after the transition (serialized state name)
        new_state: String,
        timestamp: DateTime<Utc>,
    },

    /// A pipeline stage exhausted its retries
    StageFailed {
        design_id: Uuid,
        stage: PipelineStage,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// An in-flight stage was cancelled before committing a transition
    StageCancelled {
        design_id: Uuid,
        stage: PipelineStage,
        timestamp: DateTime<Utc>,
    },

    /// Full 3D model assets arrived after the fast preview phase
    ModelAssetsReady {
        design_id: Uuid,
        model_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A gated download was granted and recorded against the quota ledger
    DownloadRecorded {
        user_id: String,
        design_id: Uuid,
        resource_type: String,
        /// Remaining units in the period, None for unlimited plans
        remaining: Option<u32>,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event type name for SSE `event:` field routing
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::DesignCreated { .. } => "DesignCreated",
            PipelineEvent::StageStarted { .. } => "StageStarted",
            PipelineEvent::StageCompleted { .. } => "StageCompleted",
            PipelineEvent::StageFailed { .. } => "StageFailed",
            PipelineEvent::StageCancelled { .. } => "StageCancelled",
            PipelineEvent::ModelAssetsReady { .. } => "ModelAssetsReady",
            PipelineEvent::DownloadRecorded { .. } => "DownloadRecorded",
        }
    }
}

/// Broadcast bus for PipelineEvents
///
/// Thin wrapper over `tokio::sync::broadcast` so emitters don't deal with
/// subscriber bookkeeping. Slow subscribers drop old events rather than
/// applying backpressure to the pipeline.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns the subscriber count, or an error if no subscriber is
    /// listening. Emitters that don't care use `let _ = bus.emit(..)`.
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let event = PipelineEvent::StageCompleted {
            design_id: Uuid::new_v4(),
            stage: PipelineStage::Analyze,
            new_state: "analyzed".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"StageCompleted\""));
        assert!(json.contains("\"stage\":\"analyze\""));
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let design_id = Uuid::new_v4();
        bus.emit(PipelineEvent::DesignCreated {
            design_id,
            owner_id: "user-1".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            PipelineEvent::DesignCreated { design_id: id, .. } => assert_eq!(id, design_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_is_an_error() {
        let bus = EventBus::new(16);
        let result = bus.emit(PipelineEvent::DesignCreated {
            design_id: Uuid::new_v4(),
            owner_id: "user-1".to_string(),
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
    }
}
