use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::warn;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            entity::Entity,
            event_links::{entities_for_events, events_for_entities},
            semantic_event::{EventCategory, SemanticEvent},
        },
    },
};

pub const MAX_SEED_EVENTS: usize = 50;
pub const MAX_BUDGET: usize = 100;
pub const DEFAULT_BUDGET: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct ExpansionRequest {
    pub seed_event_ids: Vec<String>,
    /// Clamped server-side to 1..=100.
    pub budget: usize,
    /// Raw category names; entries outside the closed set are dropped.
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpansionReason {
    pub entity_id: String,
    pub entity_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedEvent {
    pub event: SemanticEvent,
    pub reason: ExpansionReason,
}

/// 1-hop expansion from seed events to events sharing an entity.
///
/// Traversal is two query rounds over the join tables with bind
/// parameters throughout; no user-supplied string reaches a query as an
/// identifier.
pub async fn expand_events(
    db: &SurrealDbClient,
    request: &ExpansionRequest,
) -> Result<Vec<RelatedEvent>, AppError> {
    let mut seeds: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for id in &request.seed_event_ids {
        if seen.insert(id.clone()) {
            seeds.push(id.clone());
        }
        if seeds.len() == MAX_SEED_EVENTS {
            break;
        }
    }
    if seeds.is_empty() {
        return Ok(Vec::new());
    }

    let budget = request.budget.clamp(1, MAX_BUDGET);

    let mut allowed_categories: Vec<EventCategory> = Vec::new();
    for raw in &request.categories {
        match raw.parse::<EventCategory>() {
            Ok(category) => allowed_categories.push(category),
            Err(_) => warn!(category = %raw, "dropping unknown category filter"),
        }
    }

    // Round one: the entity set the seed events reference.
    let seed_edges = entities_for_events(db, &seeds).await?;
    let entity_ids: Vec<String> = {
        let mut seen = HashSet::new();
        seed_edges
            .iter()
            .filter(|edge| seen.insert(edge.entity_id.clone()))
            .map(|edge| edge.entity_id.clone())
            .collect()
    };
    if entity_ids.is_empty() {
        return Ok(Vec::new());
    }

    // Round two: events referencing any of those entities, minus the
    // seeds, remembering which entity connected each candidate back.
    let seed_set: HashSet<&String> = seeds.iter().collect();
    let mut connecting_entity: HashMap<String, String> = HashMap::new();
    for edge in events_for_entities(db, &entity_ids).await? {
        if seed_set.contains(&edge.event_id) {
            continue;
        }
        connecting_entity
            .entry(edge.event_id)
            .or_insert(edge.entity_id);
    }
    if connecting_entity.is_empty() {
        return Ok(Vec::new());
    }

    let candidate_ids: Vec<String> = connecting_entity.keys().cloned().collect();
    let mut events = SemanticEvent::get_by_ids(db, &candidate_ids).await?;

    if !allowed_categories.is_empty() {
        events.retain(|event| allowed_categories.contains(&event.category));
    }

    // Most recent first, then most confident, then a stable id order.
    events.sort_by(|a, b| {
        b.event_time
            .cmp(&a.event_time)
            .then_with(|| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    events.truncate(budget);

    let entity_names: HashMap<String, String> = {
        let wanted: Vec<String> = events
            .iter()
            .filter_map(|event| connecting_entity.get(&event.id).cloned())
            .collect();
        Entity::get_by_ids(db, &wanted)
            .await?
            .into_iter()
            .map(|entity| (entity.id.clone(), entity.name))
            .collect()
    };

    Ok(events
        .into_iter()
        .filter_map(|event| {
            let entity_id = connecting_entity.get(&event.id)?.clone();
            let entity_name = entity_names.get(&entity_id).cloned().unwrap_or_default();
            Some(RelatedEvent {
                event,
                reason: ExpansionReason {
                    entity_id,
                    entity_name,
                },
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use common::storage::types::{
        entity::EntityType,
        event_links::{EventActorLink, EventSubjectLink},
        semantic_event::{EventActor, EventSubject},
    };
    use common::utils::ids;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.apply_migrations().await.expect("migrations");
        db
    }

    fn event(uid: &str, narrative: &str, category: EventCategory, age_days: i64) -> SemanticEvent {
        let now = Utc::now();
        SemanticEvent {
            id: ids::event_id(),
            created_at: now,
            updated_at: now,
            artifact_uid: uid.to_string(),
            revision_id: "rev_1".to_string(),
            category,
            event_time: Some(now - Duration::days(age_days)),
            narrative: narrative.to_string(),
            subject: EventSubject {
                subject_type: "project".to_string(),
                subject_ref: "release".to_string(),
            },
            actors: vec![EventActor {
                ref_name: "Alice".to_string(),
                role: "owner".to_string(),
            }],
            confidence: 0.8,
            extraction_run_id: ids::extraction_run_id(),
        }
    }

    /// Seed: one shared entity connecting a seed event to two related
    /// events, plus one disconnected event.
    async fn seed_graph(db: &SurrealDbClient) -> (SemanticEvent, SemanticEvent, SemanticEvent) {
        let alice = Entity::new("Alice".into(), EntityType::Person, None, None, None);
        db.store_item(alice.clone()).await.expect("store entity");

        let seed = event("uid_a", "seed decision", EventCategory::Decision, 3);
        let related_recent = event("uid_b", "recent related", EventCategory::Commitment, 1);
        let related_old = event("uid_c", "older related", EventCategory::QualityRisk, 9);
        let unrelated = event("uid_d", "unrelated", EventCategory::Feedback, 1);

        for (uid, ev) in [
            ("uid_a", &seed),
            ("uid_b", &related_recent),
            ("uid_c", &related_old),
            ("uid_d", &unrelated),
        ] {
            let links = if uid == "uid_d" {
                Vec::new()
            } else {
                vec![EventActorLink::new(ev.id.clone(), alice.id.clone(), "owner".into())]
            };
            SemanticEvent::replace_for_revision(
                db,
                uid,
                "rev_1",
                vec![ev.clone()],
                Vec::new(),
                links,
                vec![],
            )
            .await
            .expect("seed events");
        }

        (seed, related_recent, related_old)
    }

    #[tokio::test]
    async fn expansion_finds_events_via_shared_entities() {
        let db = memory_db().await;
        let (seed, related_recent, related_old) = seed_graph(&db).await;

        let related = expand_events(
            &db,
            &ExpansionRequest {
                seed_event_ids: vec![seed.id.clone()],
                budget: DEFAULT_BUDGET,
                categories: Vec::new(),
            },
        )
        .await
        .expect("expand");

        let ids: Vec<&str> = related.iter().map(|r| r.event.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&related_recent.id.as_str()));
        assert!(ids.contains(&related_old.id.as_str()));
        assert!(!ids.contains(&seed.id.as_str()), "seeds are excluded");

        // Most recent event_time first.
        assert_eq!(related[0].event.id, related_recent.id);

        for item in &related {
            assert_eq!(item.reason.entity_name, "Alice");
        }
    }

    #[tokio::test]
    async fn budget_is_clamped_and_respected() {
        let db = memory_db().await;
        let (seed, _, _) = seed_graph(&db).await;

        let related = expand_events(
            &db,
            &ExpansionRequest {
                seed_event_ids: vec![seed.id.clone()],
                budget: 1,
                categories: Vec::new(),
            },
        )
        .await
        .expect("expand");
        assert_eq!(related.len(), 1);

        // A budget far beyond the cap still behaves (clamped to 100).
        let related = expand_events(
            &db,
            &ExpansionRequest {
                seed_event_ids: vec![seed.id],
                budget: 1000,
                categories: Vec::new(),
            },
        )
        .await
        .expect("expand clamped");
        assert!(related.len() <= MAX_BUDGET);
    }

    #[tokio::test]
    async fn category_filter_drops_invalid_entries_and_filters_valid_ones() {
        let db = memory_db().await;
        let (seed, related_recent, _) = seed_graph(&db).await;

        let related = expand_events(
            &db,
            &ExpansionRequest {
                seed_event_ids: vec![seed.id],
                budget: DEFAULT_BUDGET,
                categories: vec!["Commitment".to_string(), "NotACategory".to_string()],
            },
        )
        .await
        .expect("expand");

        assert_eq!(related.len(), 1);
        assert_eq!(related[0].event.id, related_recent.id);
    }

    #[tokio::test]
    async fn empty_seeds_expand_to_nothing() {
        let db = memory_db().await;
        let related = expand_events(
            &db,
            &ExpansionRequest {
                seed_event_ids: Vec::new(),
                budget: DEFAULT_BUDGET,
                categories: Vec::new(),
            },
        )
        .await
        .expect("expand");
        assert!(related.is_empty());
    }
}
