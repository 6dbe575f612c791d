//! Messages delivered to observers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::topic::Topic;
use crate::model::{
    AttachmentId, EventId, EventKind, IncidentEvent, IncidentId, Severity,
};

/// Name of a published event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    #[serde(rename = "incident:created")]
    IncidentCreated,
    #[serde(rename = "incident:updated")]
    IncidentUpdated,
    #[serde(rename = "incident:deleted")]
    IncidentDeleted,
    #[serde(rename = "incident:escalated")]
    IncidentEscalated,
    #[serde(rename = "incident:assigned")]
    IncidentAssigned,
    #[serde(rename = "incident:new_attachment")]
    AttachmentAdded,
    #[serde(rename = "incident:attachment_removed")]
    AttachmentRemoved,
    /// Timeline change (new entry, edit or delete)
    #[serde(rename = "newComment")]
    Timeline,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IncidentCreated => "incident:created",
            Self::IncidentUpdated => "incident:updated",
            Self::IncidentDeleted => "incident:deleted",
            Self::IncidentEscalated => "incident:escalated",
            Self::IncidentAssigned => "incident:assigned",
            Self::AttachmentAdded => "incident:new_attachment",
            Self::AttachmentRemoved => "incident:attachment_removed",
            Self::Timeline => "newComment",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an observer receives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: Topic,
    pub name: EventName,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

impl Envelope {
    /// Decode the payload into a typed value
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Change to an incident timeline, tagged so observers can tell a fresh
/// entry from an edit or removal of one they already hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineChange {
    Appended(IncidentEvent),
    Edited(IncidentEvent),
    Deleted {
        id: EventId,
        incident_id: IncidentId,
    },
}

impl TimelineChange {
    /// Discriminator as seen by observers
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Appended(event) => event.kind,
            Self::Edited(_) => EventKind::Edited,
            Self::Deleted { .. } => EventKind::Deleted,
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            Self::Appended(event) | Self::Edited(event) => &event.id,
            Self::Deleted { id, .. } => id,
        }
    }
}

/// Observer-side timeline that reconciles published changes.
///
/// Applying the same change twice leaves the same state.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<IncidentEvent>,
}

impl Timeline {
    /// Seed from a fresh fetch
    pub fn from_events(entries: Vec<IncidentEvent>) -> Self {
        Self { entries }
    }

    pub fn apply(&mut self, change: &TimelineChange) {
        match change {
            TimelineChange::Appended(event) => {
                if !self.entries.iter().any(|e| e.id == event.id) {
                    self.entries.push(event.clone());
                }
            }
            TimelineChange::Edited(event) => {
                if let Some(existing) = self.entries.iter_mut().find(|e| e.id == event.id) {
                    existing.message = event.message.clone();
                }
            }
            TimelineChange::Deleted { id, .. } => {
                self.entries.retain(|e| &e.id != id);
            }
        }
    }

    pub fn entries(&self) -> &[IncidentEvent] {
        &self.entries
    }
}

/// Team-wide notice that an incident breached its SLA
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationNotice {
    pub id: IncidentId,
    pub title: String,
    pub severity: Severity,
    pub message: String,
}

/// Payload identifying a removed record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Removed {
    pub id: String,
}

impl Removed {
    pub fn attachment(id: &AttachmentId) -> Self {
        Self { id: id.clone() }
    }

    pub fn incident(id: &IncidentId) -> Self {
        Self { id: id.clone() }
    }
}
