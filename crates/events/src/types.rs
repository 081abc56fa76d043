//! Event types for the keelson event system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// All possible events in the system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Project events
    #[serde(rename = "project.created")]
    ProjectCreated { project_id: Uuid, name: String },

    #[serde(rename = "project.updated")]
    ProjectUpdated { project_id: Uuid },

    /// Project name changed; its working directory moves with it
    #[serde(rename = "project.renamed")]
    ProjectRenamed {
        project_id: Uuid,
        from: String,
        to: String,
    },

    #[serde(rename = "project.deleted")]
    ProjectDeleted { project_id: Uuid, name: String },

    /// Hook set reconciled against a requested set
    #[serde(rename = "project.hooks_updated")]
    HooksUpdated {
        project_id: Uuid,
        added: Vec<String>,
        removed: Vec<String>,
    },

    // Build events
    #[serde(rename = "build.queued")]
    BuildQueued {
        project_id: Uuid,
        build_id: Uuid,
        build_no: i64,
    },

    #[serde(rename = "build.started")]
    BuildStarted {
        project_id: Uuid,
        build_id: Uuid,
        build_no: i64,
    },

    /// One step finished; `exit_code` is `None` for steps that were skipped
    #[serde(rename = "build.step_finished")]
    BuildStepFinished {
        project_id: Uuid,
        build_id: Uuid,
        position: usize,
        command: String,
        exit_code: Option<i32>,
    },

    /// Build reached a terminal status. `hooks` lists the notification
    /// targets configured for the project at that time.
    #[serde(rename = "build.finished")]
    BuildFinished {
        project_id: Uuid,
        project_name: String,
        build_id: Uuid,
        build_no: i64,
        status: String,
        hooks: Vec<String>,
    },

    /// Old builds removed by the retention policy
    #[serde(rename = "build.pruned")]
    BuildsPruned { project_id: Uuid, count: u64 },

    // System events
    /// Generic error event
    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

impl Event {
    /// Get the project ID associated with this event, if any
    pub fn project_id(&self) -> Option<Uuid> {
        match self {
            Event::ProjectCreated { project_id, .. } => Some(*project_id),
            Event::ProjectUpdated { project_id } => Some(*project_id),
            Event::ProjectRenamed { project_id, .. } => Some(*project_id),
            Event::ProjectDeleted { project_id, .. } => Some(*project_id),
            Event::HooksUpdated { project_id, .. } => Some(*project_id),
            Event::BuildQueued { project_id, .. } => Some(*project_id),
            Event::BuildStarted { project_id, .. } => Some(*project_id),
            Event::BuildStepFinished { project_id, .. } => Some(*project_id),
            Event::BuildFinished { project_id, .. } => Some(*project_id),
            Event::BuildsPruned { project_id, .. } => Some(*project_id),
            Event::Error { .. } => None,
        }
    }

    /// Get the build ID associated with this event, if any
    pub fn build_id(&self) -> Option<Uuid> {
        match self {
            Event::BuildQueued { build_id, .. }
            | Event::BuildStarted { build_id, .. }
            | Event::BuildStepFinished { build_id, .. }
            | Event::BuildFinished { build_id, .. } => Some(*build_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_creation() {
        let event = Event::ProjectCreated {
            project_id: Uuid::new_v4(),
            name: "Project".to_string(),
        };
        let envelope = EventEnvelope::new(event);

        assert!(!envelope.id.is_nil());
        assert!(envelope.timestamp <= Utc::now());
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::ProjectRenamed {
            project_id: Uuid::new_v4(),
            from: "my name".to_string(),
            to: "my other name".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("project.renamed"));
        assert!(json.contains("\"from\""));
        assert!(json.contains("\"to\""));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"build.queued","project_id":"550e8400-e29b-41d4-a716-446655440000","build_id":"550e8400-e29b-41d4-a716-446655440001","build_no":3}"#;
        let event: Event = serde_json::from_str(json).unwrap();

        match event {
            Event::BuildQueued { build_no, build_id, .. } => {
                assert_eq!(build_no, 3);
                assert!(!build_id.is_nil());
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_ids() {
        let project_id = Uuid::new_v4();
        let build_id = Uuid::new_v4();

        let event = Event::BuildFinished {
            project_id,
            project_name: "Project".to_string(),
            build_id,
            build_no: 1,
            status: "ok".to_string(),
            hooks: vec!["irc".to_string()],
        };
        assert_eq!(event.project_id(), Some(project_id));
        assert_eq!(event.build_id(), Some(build_id));

        let event = Event::BuildsPruned {
            project_id,
            count: 2,
        };
        assert_eq!(event.build_id(), None);

        let error_event = Event::Error {
            message: "test".to_string(),
            context: None,
        };
        assert_eq!(error_event.project_id(), None);
    }

    #[test]
    fn test_skipped_step_serializes_null_exit_code() {
        let event = Event::BuildStepFinished {
            project_id: Uuid::new_v4(),
            build_id: Uuid::new_v4(),
            position: 3,
            command: "echo 'not_here'".to_string(),
            exit_code: None,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "build.step_finished");
        assert!(json["exit_code"].is_null());
    }
}
