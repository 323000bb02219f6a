use std::collections::HashMap;

use chrono::Utc;
use tracing::{error, info};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            artifact_revision::ArtifactRevision,
            entity::EntityType,
            event_evidence::EventEvidence,
            event_links::{EventActorLink, EventSubjectLink},
            semantic_event::SemanticEvent,
        },
    },
    utils::ids,
};

use crate::{
    entity_resolver::{EntityMention, EntityResolver},
    extractor::CanonicalEvent,
};

/// Persist an extraction run for one revision.
///
/// Entities are resolved first: they are durable rows shared across
/// revisions, so creating them outside the replace transaction is
/// idempotent and keeps the transaction free of LLM traffic. The events,
/// evidence, and join rows then land in one atomic replace.
pub async fn write_events(
    db: &SurrealDbClient,
    resolver: &EntityResolver,
    revision: &ArtifactRevision,
    content_len: usize,
    canonical: Vec<CanonicalEvent>,
) -> Result<usize, AppError> {
    let run_id = ids::extraction_run_id();
    let now = Utc::now();

    let mut events = Vec::with_capacity(canonical.len());
    let mut evidence = Vec::new();
    let mut actor_links = Vec::new();
    let mut subject_links = Vec::new();
    let mut resolved: HashMap<(String, EntityType), String> = HashMap::new();

    for item in canonical {
        let event_id = ids::event_id();

        for span in &item.evidence {
            let row = EventEvidence::new(
                event_id.clone(),
                span.quote.clone(),
                span.start_char,
                span.end_char,
                span.chunk_id.clone(),
            );
            // Bounds were checked at validation; a violation here means an
            // invariant broke between validation and write.
            if let Err(err) = row.validate_span(content_len) {
                error!(event_id = %event_id, error = %err, "evidence span failed final bounds check");
                return Err(err);
            }
            evidence.push(row);
        }

        for actor in &item.actors {
            let entity_id = resolve_cached(
                resolver,
                &mut resolved,
                EntityMention {
                    name: actor.ref_name.clone(),
                    entity_type: EntityType::Person,
                    role: Some(actor.role.clone()),
                    organization: None,
                    email: None,
                },
            )
            .await?;
            actor_links.push(EventActorLink::new(
                event_id.clone(),
                entity_id,
                actor.role.clone(),
            ));
        }

        let subject_type: EntityType = item.subject.subject_type.parse()?;
        let subject_entity_id = resolve_cached(
            resolver,
            &mut resolved,
            EntityMention {
                name: item.subject.subject_ref.clone(),
                entity_type: subject_type,
                role: None,
                organization: None,
                email: None,
            },
        )
        .await?;
        subject_links.push(EventSubjectLink::new(event_id.clone(), subject_entity_id));

        events.push(SemanticEvent {
            id: event_id,
            created_at: now,
            updated_at: now,
            artifact_uid: revision.artifact_uid.clone(),
            revision_id: revision.revision_id.clone(),
            category: item.category,
            event_time: item.event_time,
            narrative: item.narrative,
            subject: item.subject,
            actors: item.actors,
            confidence: item.confidence,
            extraction_run_id: run_id.clone(),
        });
    }

    let written = events.len();
    SemanticEvent::replace_for_revision(
        db,
        &revision.artifact_uid,
        &revision.revision_id,
        events,
        evidence,
        actor_links,
        subject_links,
    )
    .await?;

    info!(
        artifact_uid = %revision.artifact_uid,
        revision_id = %revision.revision_id,
        run_id = %run_id,
        events = written,
        "extraction written"
    );

    Ok(written)
}

async fn resolve_cached(
    resolver: &EntityResolver,
    cache: &mut HashMap<(String, EntityType), String>,
    mention: EntityMention,
) -> Result<String, AppError> {
    let key = (
        common::storage::types::entity::normalize_name(&mention.name),
        mention.entity_type,
    );
    if let Some(entity_id) = cache.get(&key) {
        return Ok(entity_id.clone());
    }

    let entity = resolver.resolve_or_create(&mention).await?;
    cache.insert(key, entity.id.clone());
    Ok(entity.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::{
        artifact_revision::{ArtifactKind, PrivacyMetadata},
        entity::Entity,
        semantic_event::{EventActor, EventCategory, EventSubject},
    };
    use crate::extractor::CanonicalEvidence;
    use std::sync::Arc;
    use uuid::Uuid;

    async fn setup() -> (Arc<SurrealDbClient>, EntityResolver, ArtifactRevision) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.apply_migrations().await.expect("migrations");
        let resolver = EntityResolver::new(Arc::clone(&db));

        let now = Utc::now();
        let revision = ArtifactRevision {
            id: ArtifactRevision::record_key("uid_a", "rev_1"),
            created_at: now,
            updated_at: now,
            artifact_uid: "uid_a".to_string(),
            revision_id: "rev_1".to_string(),
            artifact_id: "art_1".to_string(),
            kind: ArtifactKind::Note,
            source_system: "manual".to_string(),
            source_id: None,
            title: None,
            author: None,
            participants: Vec::new(),
            occurred_at: None,
            privacy: PrivacyMetadata::default(),
            content_hash: "hash".to_string(),
            token_count: 50,
            chunk_count: 0,
            chunk_target: 900,
            chunk_overlap: 100,
            is_latest: true,
        };

        (db, resolver, revision)
    }

    fn canonical(narrative: &str, actor: &str) -> CanonicalEvent {
        CanonicalEvent {
            category: EventCategory::Decision,
            event_time: None,
            narrative: narrative.to_string(),
            subject: EventSubject {
                subject_type: "project".to_string(),
                subject_ref: "release".to_string(),
            },
            actors: vec![EventActor {
                ref_name: actor.to_string(),
                role: "owner".to_string(),
            }],
            confidence: 0.9,
            evidence: vec![CanonicalEvidence {
                quote: "decided to ship".to_string(),
                start_char: 3,
                end_char: 18,
                chunk_id: None,
            }],
        }
    }

    #[tokio::test]
    async fn writes_events_with_evidence_and_entity_joins() {
        let (db, resolver, revision) = setup().await;

        let written = write_events(
            &db,
            &resolver,
            &revision,
            100,
            vec![canonical("ship in April", "Alice"), canonical("delay QA", "Alice")],
        )
        .await
        .expect("write");
        assert_eq!(written, 2);

        let events = SemanticEvent::list_for_revision(&db, "uid_a", "rev_1")
            .await
            .expect("list");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].extraction_run_id, events[1].extraction_run_id);

        let ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
        let evidence = EventEvidence::for_events(&db, &ids).await.expect("evidence");
        assert_eq!(evidence.len(), 2);

        // Alice appears once as an entity even though she acts in both
        // events; the project subject adds a second entity.
        let entities: Vec<Entity> = db.get_all_stored_items().await.expect("entities");
        assert_eq!(entities.len(), 2);
    }

    #[tokio::test]
    async fn rewriting_replaces_rather_than_accumulates() {
        let (db, resolver, revision) = setup().await;

        write_events(&db, &resolver, &revision, 100, vec![canonical("first run", "Alice")])
            .await
            .expect("first write");
        write_events(
            &db,
            &resolver,
            &revision,
            100,
            vec![canonical("second run", "Alice")],
        )
        .await
        .expect("second write");

        let events = SemanticEvent::list_for_revision(&db, "uid_a", "rev_1")
            .await
            .expect("list");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].narrative, "second run");
    }

    #[tokio::test]
    async fn out_of_bounds_evidence_fails_the_write() {
        let (db, resolver, revision) = setup().await;

        let mut event = canonical("bad span", "Alice");
        event.evidence[0].end_char = 500;

        let err = write_events(&db, &resolver, &revision, 100, vec![event])
            .await
            .expect_err("integrity failure");
        assert!(matches!(err, AppError::Integrity(_)));

        let events = SemanticEvent::list_for_revision(&db, "uid_a", "rev_1")
            .await
            .expect("list");
        assert!(events.is_empty(), "nothing is written on integrity failure");
    }
}
