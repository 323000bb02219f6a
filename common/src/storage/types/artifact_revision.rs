use std::str::FromStr;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::event_job::EventJob;

/// Closed set of artifact kinds accepted at ingest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Email,
    Doc,
    Chat,
    Transcript,
    Note,
}

impl FromStr for ArtifactKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "email" => Ok(Self::Email),
            "doc" => Ok(Self::Doc),
            "chat" => Ok(Self::Chat),
            "transcript" => Ok(Self::Transcript),
            "note" => Ok(Self::Note),
            other => Err(AppError::validation(
                "INVALID_ARTIFACT_TYPE",
                format!("unknown artifact kind: {other}"),
            )),
        }
    }
}

/// Stored but not enforced; the retrieval privacy hook reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrivacyMetadata {
    pub sensitivity: String,
    pub visibility_scope: String,
    pub retention_policy: String,
}

impl Default for PrivacyMetadata {
    fn default() -> Self {
        Self {
            sensitivity: "internal".to_string(),
            visibility_scope: "team".to_string(),
            retention_policy: "standard".to_string(),
        }
    }
}

stored_object!(ArtifactRevision, "artifact_revision", {
    artifact_uid: String,
    revision_id: String,
    artifact_id: String,
    kind: ArtifactKind,
    source_system: String,
    source_id: Option<String>,
    title: Option<String>,
    author: Option<String>,
    participants: Vec<String>,
    #[serde(serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime", default)]
    occurred_at: Option<DateTime<Utc>>,
    privacy: PrivacyMetadata,
    content_hash: String,
    token_count: usize,
    chunk_count: usize,
    chunk_target: usize,
    chunk_overlap: usize,
    is_latest: bool
});

impl ArtifactRevision {
    /// Record key for the (uid, revision) pair. Revision hashes repeat when
    /// two artifacts carry identical content, so the key is composite.
    pub fn record_key(artifact_uid: &str, revision_id: &str) -> String {
        format!("{artifact_uid}::{revision_id}")
    }

    pub async fn find(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM artifact_revision
                 WHERE artifact_uid = $uid AND revision_id = $rev
                 LIMIT 1",
            )
            .bind(("uid", artifact_uid.to_owned()))
            .bind(("rev", revision_id.to_owned()))
            .await?;

        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    pub async fn latest_for_uid(
        db: &SurrealDbClient,
        artifact_uid: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM artifact_revision
                 WHERE artifact_uid = $uid AND is_latest = true
                 LIMIT 1",
            )
            .bind(("uid", artifact_uid.to_owned()))
            .await?;

        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    pub async fn list_for_uid(
        db: &SurrealDbClient,
        artifact_uid: &str,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM artifact_revision
                 WHERE artifact_uid = $uid
                 ORDER BY created_at DESC",
            )
            .bind(("uid", artifact_uid.to_owned()))
            .await?;

        Ok(response.take(0)?)
    }

    /// Commit the new revision together with its extraction job.
    ///
    /// One transaction flips any prior latest revision of the artifact,
    /// inserts the revision row, and inserts the PENDING job row. A caller
    /// observing success is guaranteed both rows exist.
    pub async fn commit_with_job(
        db: &SurrealDbClient,
        revision: Self,
        job: EventJob,
    ) -> Result<(), AppError> {
        let revision_key = revision.id.clone();
        let job_key = job.id.clone();
        let artifact_uid = revision.artifact_uid.clone();

        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(
                "UPDATE artifact_revision
                 SET is_latest = false, updated_at = time::now()
                 WHERE artifact_uid = $uid AND is_latest = true;",
            )
            .query("CREATE type::thing('artifact_revision', $revision_key) CONTENT $revision;")
            .query("CREATE type::thing('event_job', $job_key) CONTENT $job;")
            .query("COMMIT TRANSACTION;")
            .bind(("uid", artifact_uid))
            .bind(("revision_key", revision_key))
            .bind(("revision", revision))
            .bind(("job_key", job_key))
            .bind(("job", job))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(())
    }

    /// Remove every trace of an artifact: revisions, events, evidence,
    /// entity joins, jobs, and both vector collections.
    pub async fn forget_artifact(
        db: &SurrealDbClient,
        artifact_uid: &str,
    ) -> Result<ForgetReport, AppError> {
        let report = ForgetReport {
            revisions: count_rows(db, "artifact_revision", artifact_uid).await?,
            events: count_rows(db, "semantic_event", artifact_uid).await?,
            chunks: count_rows(db, "chunk_vector", artifact_uid).await?,
        };

        let response = db
            .client
            .query("BEGIN TRANSACTION;")
            .query(
                "LET $events = (SELECT VALUE record::id(id) FROM semantic_event WHERE artifact_uid = $uid);",
            )
            .query("DELETE event_evidence WHERE event_id IN $events;")
            .query("DELETE event_actor WHERE event_id IN $events;")
            .query("DELETE event_subject WHERE event_id IN $events;")
            .query("DELETE semantic_event WHERE artifact_uid = $uid;")
            .query("DELETE event_job WHERE artifact_uid = $uid;")
            .query("DELETE content_vector WHERE artifact_uid = $uid;")
            .query("DELETE chunk_vector WHERE artifact_uid = $uid;")
            .query("DELETE artifact_revision WHERE artifact_uid = $uid;")
            .query("COMMIT TRANSACTION;")
            .bind(("uid", artifact_uid.to_owned()))
            .await
            .map_err(AppError::Database)?;

        response.check().map_err(AppError::Database)?;

        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForgetReport {
    pub revisions: usize,
    pub events: usize,
    pub chunks: usize,
}

async fn count_rows(
    db: &SurrealDbClient,
    table: &str,
    artifact_uid: &str,
) -> Result<usize, AppError> {
    #[derive(Deserialize)]
    struct CountRow {
        count: usize,
    }

    let mut response = db
        .query(format!(
            "SELECT count() AS count FROM {table} WHERE artifact_uid = $uid GROUP ALL"
        ))
        .bind(("uid", artifact_uid.to_owned()))
        .await?;

    let rows: Vec<CountRow> = response.take(0)?;
    Ok(rows.into_iter().next().map_or(0, |r| r.count))
}
