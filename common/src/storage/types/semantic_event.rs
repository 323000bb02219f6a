use std::str::FromStr;

use tokio::time::{sleep, Duration as TokioDuration};
use tracing::warn;

use crate::{
    error::AppError,
    storage::db::{is_commit_conflict, SurrealDbClient},
    stored_object,
};

use super::{
    event_evidence::EventEvidence,
    event_links::{EventActorLink, EventSubjectLink},
};

/// Closed category set. Anything else coming back from the LLM drops the
/// event, never the whole extraction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventCategory {
    Commitment,
    Execution,
    Decision,
    Collaboration,
    QualityRisk,
    Feedback,
    Change,
    Stakeholder,
}

impl EventCategory {
    pub const ALL: [Self; 8] = [
        Self::Commitment,
        Self::Execution,
        Self::Decision,
        Self::Collaboration,
        Self::QualityRisk,
        Self::Feedback,
        Self::Change,
        Self::Stakeholder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commitment => "Commitment",
            Self::Execution => "Execution",
            Self::Decision => "Decision",
            Self::Collaboration => "Collaboration",
            Self::QualityRisk => "QualityRisk",
            Self::Feedback => "Feedback",
            Self::Change => "Change",
            Self::Stakeholder => "Stakeholder",
        }
    }
}

impl FromStr for EventCategory {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|category| category.as_str() == value)
            .copied()
            .ok_or_else(|| {
                AppError::validation("INVALID_CATEGORY", format!("unknown category: {value}"))
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSubject {
    #[serde(rename = "type")]
    pub subject_type: String,
    #[serde(rename = "ref")]
    pub subject_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventActor {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub role: String,
}

stored_object!(SemanticEvent, "semantic_event", {
    artifact_uid: String,
    revision_id: String,
    category: EventCategory,
    #[serde(serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime", default)]
    event_time: Option<DateTime<Utc>>,
    narrative: String,
    subject: EventSubject,
    actors: Vec<EventActor>,
    confidence: f32,
    extraction_run_id: String
});

#[derive(Debug, Clone, Default)]
pub struct EventSearchFilters {
    pub query: Option<String>,
    pub category: Option<EventCategory>,
    pub time_from: Option<DateTime<Utc>>,
    pub time_to: Option<DateTime<Utc>>,
    pub artifact_uid: Option<String>,
    pub limit: usize,
}

impl SemanticEvent {
    pub async fn get(db: &SurrealDbClient, event_id: &str) -> Result<Option<Self>, AppError> {
        Ok(db.get_item(event_id).await?)
    }

    pub async fn list_for_revision(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM semantic_event
                 WHERE artifact_uid = $uid AND revision_id = $rev
                 ORDER BY created_at ASC",
            )
            .bind(("uid", artifact_uid.to_owned()))
            .bind(("rev", revision_id.to_owned()))
            .await?;

        Ok(response.take(0)?)
    }

    pub async fn get_by_ids(
        db: &SurrealDbClient,
        event_ids: &[String],
    ) -> Result<Vec<Self>, AppError> {
        if event_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut response = db
            .query("SELECT * FROM semantic_event WHERE record::id(id) IN $ids")
            .bind(("ids", event_ids.to_vec()))
            .await?;

        Ok(response.take(0)?)
    }

    /// Filtered event search; a text query engages the BM25 narrative
    /// index, otherwise results come back newest first.
    pub async fn search(
        db: &SurrealDbClient,
        filters: &EventSearchFilters,
    ) -> Result<(Vec<Self>, usize), AppError> {
        let mut conditions: Vec<&str> = Vec::new();
        if filters.query.is_some() {
            conditions.push("narrative @0@ $query");
        }
        if filters.category.is_some() {
            conditions.push("category = $category");
        }
        if filters.time_from.is_some() {
            conditions.push("event_time != NONE AND event_time >= $time_from");
        }
        if filters.time_to.is_some() {
            conditions.push("event_time != NONE AND event_time <= $time_to");
        }
        if filters.artifact_uid.is_some() {
            conditions.push("artifact_uid = $uid");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let order_clause = if filters.query.is_some() {
            "ORDER BY score DESC"
        } else {
            "ORDER BY created_at DESC"
        };
        let select_fields = if filters.query.is_some() {
            "*, search::score(0) AS score"
        } else {
            "*"
        };

        let search_sql = format!(
            "SELECT {select_fields} FROM semantic_event {where_clause} {order_clause} LIMIT $limit"
        );
        let count_sql =
            format!("SELECT count() AS count FROM semantic_event {where_clause} GROUP ALL");

        let limit = i64::try_from(filters.limit).unwrap_or(i64::MAX);

        let mut query = db.query(&search_sql).query(&count_sql).bind(("limit", limit));
        if let Some(text) = &filters.query {
            query = query.bind(("query", text.clone()));
        }
        if let Some(category) = filters.category {
            query = query.bind(("category", category.as_str().to_owned()));
        }
        if let Some(from) = filters.time_from {
            query = query.bind(("time_from", surrealdb::sql::Datetime::from(from)));
        }
        if let Some(to) = filters.time_to {
            query = query.bind(("time_to", surrealdb::sql::Datetime::from(to)));
        }
        if let Some(uid) = &filters.artifact_uid {
            query = query.bind(("uid", uid.clone()));
        }

        let mut response = query.await?;

        let events: Vec<Self> = response.take(0)?;

        #[derive(Deserialize)]
        struct CountRow {
            count: usize,
        }
        let counts: Vec<CountRow> = response.take(1)?;
        let total = counts.into_iter().next().map_or(0, |r| r.count);

        Ok((events, total))
    }

    /// Atomically replace the event set for a revision.
    ///
    /// One transaction deletes the prior events with their evidence and
    /// entity joins and inserts the replacement rows, so readers observe
    /// either the old set or the new set in full. Commit conflicts are
    /// retried a few times before giving up.
    pub async fn replace_for_revision(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
        events: Vec<Self>,
        evidence: Vec<EventEvidence>,
        actor_links: Vec<EventActorLink>,
        subject_links: Vec<EventSubjectLink>,
    ) -> Result<(), AppError> {
        let mut backoff_ms = 50u64;
        let attempts = 3;

        for attempt in 0..attempts {
            let result = db
                .client
                .query("BEGIN TRANSACTION;")
                .query(
                    "LET $old = (SELECT VALUE record::id(id) FROM semantic_event
                     WHERE artifact_uid = $uid AND revision_id = $rev);",
                )
                .query("DELETE event_evidence WHERE event_id IN $old;")
                .query("DELETE event_actor WHERE event_id IN $old;")
                .query("DELETE event_subject WHERE event_id IN $old;")
                .query("DELETE semantic_event WHERE artifact_uid = $uid AND revision_id = $rev;")
                .query(
                    "FOR $event IN $events {
                        CREATE type::thing('semantic_event', $event.id) CONTENT $event;
                    };",
                )
                .query(
                    "FOR $row IN $evidence {
                        CREATE type::thing('event_evidence', $row.id) CONTENT $row;
                    };",
                )
                .query(
                    "FOR $row IN $actor_links {
                        CREATE type::thing('event_actor', $row.id) CONTENT $row;
                    };",
                )
                .query(
                    "FOR $row IN $subject_links {
                        CREATE type::thing('event_subject', $row.id) CONTENT $row;
                    };",
                )
                .query("COMMIT TRANSACTION;")
                .bind(("uid", artifact_uid.to_owned()))
                .bind(("rev", revision_id.to_owned()))
                .bind(("events", events.clone()))
                .bind(("evidence", evidence.clone()))
                .bind(("actor_links", actor_links.clone()))
                .bind(("subject_links", subject_links.clone()))
                .await;

            let err = match result {
                Ok(response) => match response.check() {
                    Ok(_) => return Ok(()),
                    Err(err) => err,
                },
                Err(err) => err,
            };

            if is_commit_conflict(&err) && attempt + 1 < attempts {
                warn!(attempt = attempt + 1, "event replace hit a commit conflict; retrying");
                sleep(TokioDuration::from_millis(backoff_ms)).await;
                backoff_ms = backoff_ms.saturating_mul(2);
                continue;
            }

            return Err(AppError::Database(err));
        }

        Err(AppError::Integrity(
            "event replace failed after conflict retries".to_string(),
        ))
    }
}
