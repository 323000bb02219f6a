use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient};

/// Join rows between events and entities. Written inside the event-replace
/// transaction; read back by projection, so the record id never needs to
/// round-trip.

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventActorLink {
    pub id: String,
    pub event_id: String,
    pub entity_id: String,
    pub role: String,
}

impl EventActorLink {
    pub fn new(event_id: String, entity_id: String, role: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_id,
            entity_id,
            role,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSubjectLink {
    pub id: String,
    pub event_id: String,
    pub entity_id: String,
}

impl EventSubjectLink {
    pub fn new(event_id: String, entity_id: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_id,
            entity_id,
        }
    }
}

/// An event/entity edge seen from either join table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EventEntityEdge {
    pub event_id: String,
    pub entity_id: String,
}

/// Entities referenced by any of the given events, across both joins.
pub async fn entities_for_events(
    db: &SurrealDbClient,
    event_ids: &[String],
) -> Result<Vec<EventEntityEdge>, AppError> {
    if event_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut response = db
        .query("SELECT event_id, entity_id FROM event_actor WHERE event_id IN $ids")
        .query("SELECT event_id, entity_id FROM event_subject WHERE event_id IN $ids")
        .bind(("ids", event_ids.to_vec()))
        .await?;

    let mut edges: Vec<EventEntityEdge> = response.take(0)?;
    let subjects: Vec<EventEntityEdge> = response.take(1)?;
    edges.extend(subjects);
    Ok(edges)
}

/// Events referencing any of the given entities, across both joins.
pub async fn events_for_entities(
    db: &SurrealDbClient,
    entity_ids: &[String],
) -> Result<Vec<EventEntityEdge>, AppError> {
    if entity_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut response = db
        .query("SELECT event_id, entity_id FROM event_actor WHERE entity_id IN $ids")
        .query("SELECT event_id, entity_id FROM event_subject WHERE entity_id IN $ids")
        .bind(("ids", entity_ids.to_vec()))
        .await?;

    let mut edges: Vec<EventEntityEdge> = response.take(0)?;
    let subjects: Vec<EventEntityEdge> = response.take(1)?;
    edges.extend(subjects);
    Ok(edges)
}
