use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;

/// Envelope for a published event.
///
/// Notes:
/// - `event_type`/`event_version` are copied from the typed event so consumers can
///   route without deserializing the payload.
/// - `subject` is the id of the ledger entry, order or reservation concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    event_type: String,
    event_version: u32,
    subject: String,
    occurred_at: DateTime<Utc>,
    payload: E,
}

/// What the services put on the bus: the payload is the event serialized to JSON.
pub type NotificationEnvelope = EventEnvelope<serde_json::Value>;

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        event_type: impl Into<String>,
        event_version: u32,
        subject: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            event_version,
            subject: subject.into(),
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl NotificationEnvelope {
    /// Wrap a typed event, serializing its payload.
    pub fn from_event<E>(event: &E) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        Ok(Self::new(
            Uuid::now_v7(),
            event.event_type(),
            event.version(),
            event.subject(),
            event.occurred_at(),
            serde_json::to_value(event)?,
        ))
    }

    /// Decode the payload back into a typed event.
    pub fn decode<E>(&self) -> Result<E, serde_json::Error>
    where
        E: for<'de> Deserialize<'de>,
    {
        E::deserialize(&self.payload)
    }
}
