use chrono::Duration;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object, utils::ids};

pub const DEFAULT_JOB_TYPE: &str = "extract_events";

/// Transient failures back off exponentially, capped at ten minutes.
pub fn backoff_seconds(attempts: u32) -> u64 {
    let doubled = 30u64.saturating_mul(2u64.saturating_pow(attempts));
    doubled.min(600)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

stored_object!(EventJob, "event_job", {
    job_type: String,
    artifact_uid: String,
    revision_id: String,
    status: JobStatus,
    attempts: u32,
    max_attempts: u32,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime", default)]
    next_run_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_option_datetime", deserialize_with = "deserialize_option_datetime", default)]
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    last_error_code: Option<String>,
    last_error_message: Option<String>
});

impl EventJob {
    pub fn new(artifact_uid: String, revision_id: String, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: ids::job_id(),
            created_at: now,
            updated_at: now,
            job_type: DEFAULT_JOB_TYPE.to_string(),
            artifact_uid,
            revision_id,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            next_run_at: now,
            locked_at: None,
            locked_by: None,
            last_error_code: None,
            last_error_message: None,
        }
    }

    pub async fn find_for_revision(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM event_job
                 WHERE artifact_uid = $uid AND revision_id = $rev AND job_type = $job_type
                 LIMIT 1",
            )
            .bind(("uid", artifact_uid.to_owned()))
            .bind(("rev", revision_id.to_owned()))
            .bind(("job_type", DEFAULT_JOB_TYPE.to_owned()))
            .await?;

        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Claim at most one ready job for this worker.
    ///
    /// Candidates are scanned oldest-first; each is taken with a
    /// conditional single-row UPDATE that only succeeds while the row is
    /// still PENDING and due. A row another worker already claimed simply
    /// fails the condition and the scan moves on, so no two workers ever
    /// hold PROCESSING on the same job.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, AppError> {
        let now_value = surrealdb::sql::Datetime::from(now);

        let mut response = db
            .query(
                "SELECT * FROM event_job
                 WHERE status = 'PENDING' AND next_run_at <= $now
                 ORDER BY created_at ASC
                 LIMIT 5",
            )
            .bind(("now", now_value.clone()))
            .await?;
        let candidates: Vec<Self> = response.take(0)?;

        for candidate in candidates.into_iter().map(|job| job.id) {
            let mut response = db
                .query(
                    "UPDATE type::thing('event_job', $job_id)
                     SET status = 'PROCESSING',
                         locked_at = $now,
                         locked_by = $worker_id,
                         attempts = attempts + 1,
                         updated_at = time::now()
                     WHERE status = 'PENDING' AND next_run_at <= $now
                     RETURN AFTER",
                )
                .bind(("job_id", candidate))
                .bind(("now", now_value.clone()))
                .bind(("worker_id", worker_id.to_owned()))
                .await?;

            let claimed: Vec<Self> = response.take(0)?;
            if let Some(job) = claimed.into_iter().next() {
                return Ok(Some(job));
            }
        }

        Ok(None)
    }

    pub async fn complete(db: &SurrealDbClient, job_id: &str) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('event_job', $job_id)
             SET status = 'DONE', locked_at = NONE, locked_by = NONE, updated_at = time::now()",
        )
        .bind(("job_id", job_id.to_owned()))
        .await?
        .check()?;

        Ok(())
    }

    /// Record a transient failure: back off and return to PENDING, or go
    /// terminally FAILED once the attempt budget is spent.
    pub async fn fail_transient(
        &self,
        db: &SurrealDbClient,
        code: &str,
        message: &str,
    ) -> Result<JobStatus, AppError> {
        if self.attempts >= self.max_attempts {
            Self::fail_terminal(db, &self.id, code, message).await?;
            return Ok(JobStatus::Failed);
        }

        let delay = Duration::seconds(i64::try_from(backoff_seconds(self.attempts)).unwrap_or(600));
        let next_run_at = Utc::now() + delay;

        db.query(
            "UPDATE type::thing('event_job', $job_id)
             SET status = 'PENDING',
                 next_run_at = $next_run_at,
                 locked_at = NONE,
                 locked_by = NONE,
                 last_error_code = $code,
                 last_error_message = $message,
                 updated_at = time::now()",
        )
        .bind(("job_id", self.id.clone()))
        .bind(("next_run_at", surrealdb::sql::Datetime::from(next_run_at)))
        .bind(("code", code.to_owned()))
        .bind(("message", message.to_owned()))
        .await?
        .check()?;

        Ok(JobStatus::Pending)
    }

    pub async fn fail_terminal(
        db: &SurrealDbClient,
        job_id: &str,
        code: &str,
        message: &str,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('event_job', $job_id)
             SET status = 'FAILED',
                 locked_at = NONE,
                 locked_by = NONE,
                 last_error_code = $code,
                 last_error_message = $message,
                 updated_at = time::now()",
        )
        .bind(("job_id", job_id.to_owned()))
        .bind(("code", code.to_owned()))
        .bind(("message", message.to_owned()))
        .await?
        .check()?;

        Ok(())
    }

    /// Queue (or re-queue) extraction for a revision.
    ///
    /// FAILED rows are always reset; DONE rows only with `force`; rows that
    /// are still in flight are left alone.
    pub async fn enqueue_reextract(
        db: &SurrealDbClient,
        artifact_uid: &str,
        revision_id: &str,
        force: bool,
        max_attempts: u32,
    ) -> Result<(Self, &'static str), AppError> {
        let existing = Self::find_for_revision(db, artifact_uid, revision_id).await?;

        let Some(job) = existing else {
            let job = Self::new(artifact_uid.to_owned(), revision_id.to_owned(), max_attempts);
            db.store_item(job.clone()).await?;
            return Ok((job, "queued"));
        };

        match job.status {
            JobStatus::Pending => Ok((job, "already queued")),
            JobStatus::Processing => Ok((job, "extraction in progress")),
            JobStatus::Done if !force => Ok((job, "already extracted; pass force to re-extract")),
            JobStatus::Failed | JobStatus::Done => {
                let mut response = db
                    .query(
                        "UPDATE type::thing('event_job', $job_id)
                         SET status = 'PENDING',
                             attempts = 0,
                             next_run_at = time::now(),
                             locked_at = NONE,
                             locked_by = NONE,
                             last_error_code = NONE,
                             last_error_message = NONE,
                             updated_at = time::now()
                         RETURN AFTER",
                    )
                    .bind(("job_id", job.id.clone()))
                    .await?;

                let rows: Vec<Self> = response.take(0)?;
                let job = rows
                    .into_iter()
                    .next()
                    .ok_or_else(|| AppError::NotFound(format!("job {}", job.id)))?;
                Ok((job, "requeued"))
            }
        }
    }

    /// Return PROCESSING rows whose lock is older than the cutoff to
    /// PENDING. The attempt consumed by the dead worker's claim stays
    /// consumed.
    pub async fn reclaim_stale(
        db: &SurrealDbClient,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let mut response = db
            .query(
                "UPDATE event_job
                 SET status = 'PENDING',
                     next_run_at = time::now(),
                     locked_at = NONE,
                     locked_by = NONE,
                     updated_at = time::now()
                 WHERE status = 'PROCESSING' AND locked_at != NONE AND locked_at <= $cutoff
                 RETURN AFTER",
            )
            .bind(("cutoff", surrealdb::sql::Datetime::from(cutoff)))
            .await?;

        let rows: Vec<Self> = response.take(0)?;
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.apply_migrations().await.expect("migrations");
        db
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_seconds(0), 30);
        assert_eq!(backoff_seconds(1), 60);
        assert_eq!(backoff_seconds(2), 120);
        assert_eq!(backoff_seconds(4), 480);
        assert_eq!(backoff_seconds(5), 600);
        assert_eq!(backoff_seconds(30), 600);
    }

    #[tokio::test]
    async fn claim_marks_processing_and_increments_attempts() {
        let db = memory_db().await;
        let job = EventJob::new("uid_a".into(), "rev_1".into(), 5);
        db.store_item(job.clone()).await.expect("store");

        let claimed = EventJob::claim_next_ready(&db, "worker-1", Utc::now())
            .await
            .expect("claim")
            .expect("job available");

        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.locked_by.as_deref(), Some("worker-1"));
        assert!(claimed.locked_at.is_some());

        // Nothing left to claim while the job is held.
        let second = EventJob::claim_next_ready(&db, "worker-2", Utc::now())
            .await
            .expect("claim again");
        assert!(second.is_none(), "no two workers may hold the same job");
    }

    #[tokio::test]
    async fn claim_respects_next_run_at() {
        let db = memory_db().await;
        let mut job = EventJob::new("uid_a".into(), "rev_1".into(), 5);
        job.next_run_at = Utc::now() + Duration::seconds(120);
        db.store_item(job.clone()).await.expect("store");

        let now = EventJob::claim_next_ready(&db, "w", Utc::now())
            .await
            .expect("claim");
        assert!(now.is_none(), "job is not yet due");

        let later = EventJob::claim_next_ready(&db, "w", Utc::now() + Duration::seconds(200))
            .await
            .expect("claim later");
        assert!(later.is_some(), "job becomes claimable after next_run_at");
    }

    #[tokio::test]
    async fn claim_prefers_the_oldest_pending_job() {
        let db = memory_db().await;
        let mut first = EventJob::new("uid_a".into(), "rev_1".into(), 5);
        first.created_at = Utc::now() - Duration::seconds(60);
        let second = EventJob::new("uid_b".into(), "rev_1".into(), 5);
        db.store_item(first.clone()).await.expect("store first");
        db.store_item(second).await.expect("store second");

        let claimed = EventJob::claim_next_ready(&db, "w", Utc::now())
            .await
            .expect("claim")
            .expect("job");
        assert_eq!(claimed.id, first.id);
    }

    #[tokio::test]
    async fn transient_failure_backs_off_then_goes_terminal() {
        let db = memory_db().await;
        let job = EventJob::new("uid_a".into(), "rev_1".into(), 2);
        db.store_item(job.clone()).await.expect("store");

        let claimed = EventJob::claim_next_ready(&db, "w", Utc::now())
            .await
            .expect("claim")
            .expect("job");
        let status = claimed
            .fail_transient(&db, "TIMEOUT", "upstream timeout")
            .await
            .expect("fail transient");
        assert_eq!(status, JobStatus::Pending);

        let stored: EventJob = db.get_item(&job.id).await.expect("get").expect("row");
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.last_error_code.as_deref(), Some("TIMEOUT"));
        assert!(stored.next_run_at > Utc::now(), "backoff pushed next_run_at");

        // Exhaust the attempt budget.
        let far_future = Utc::now() + Duration::seconds(3600);
        let claimed = EventJob::claim_next_ready(&db, "w", far_future)
            .await
            .expect("claim")
            .expect("job");
        assert_eq!(claimed.attempts, 2);
        let status = claimed
            .fail_transient(&db, "TIMEOUT", "again")
            .await
            .expect("fail transient at cap");
        assert_eq!(status, JobStatus::Failed);

        let stored: EventJob = db.get_item(&job.id).await.expect("get").expect("row");
        assert_eq!(stored.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn complete_marks_done_and_releases_the_lock() {
        let db = memory_db().await;
        let job = EventJob::new("uid_a".into(), "rev_1".into(), 5);
        db.store_item(job.clone()).await.expect("store");

        let claimed = EventJob::claim_next_ready(&db, "w", Utc::now())
            .await
            .expect("claim")
            .expect("job");
        EventJob::complete(&db, &claimed.id).await.expect("complete");

        let stored: EventJob = db.get_item(&job.id).await.expect("get").expect("row");
        assert_eq!(stored.status, JobStatus::Done);
        assert!(stored.locked_by.is_none());
    }

    #[tokio::test]
    async fn reextract_paths() {
        let db = memory_db().await;

        // No job yet: a fresh one is queued.
        let (job, message) = EventJob::enqueue_reextract(&db, "uid_a", "rev_1", false, 5)
            .await
            .expect("enqueue");
        assert_eq!(message, "queued");
        assert_eq!(job.status, JobStatus::Pending);

        // Pending job: no-op.
        let (_, message) = EventJob::enqueue_reextract(&db, "uid_a", "rev_1", false, 5)
            .await
            .expect("enqueue pending");
        assert_eq!(message, "already queued");

        // Done without force: no-op; with force: requeued.
        let claimed = EventJob::claim_next_ready(&db, "w", Utc::now())
            .await
            .expect("claim")
            .expect("job");
        EventJob::complete(&db, &claimed.id).await.expect("complete");

        let (_, message) = EventJob::enqueue_reextract(&db, "uid_a", "rev_1", false, 5)
            .await
            .expect("enqueue done");
        assert_eq!(message, "already extracted; pass force to re-extract");

        let (job, message) = EventJob::enqueue_reextract(&db, "uid_a", "rev_1", true, 5)
            .await
            .expect("enqueue force");
        assert_eq!(message, "requeued");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);

        // Failed: reset without force.
        let claimed = EventJob::claim_next_ready(&db, "w", Utc::now())
            .await
            .expect("claim")
            .expect("job");
        EventJob::fail_terminal(&db, &claimed.id, "LLM_SCHEMA", "bad output")
            .await
            .expect("fail terminal");
        let (job, message) = EventJob::enqueue_reextract(&db, "uid_a", "rev_1", false, 5)
            .await
            .expect("enqueue failed");
        assert_eq!(message, "requeued");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.last_error_code.is_none());
    }

    #[tokio::test]
    async fn unique_index_rejects_duplicate_jobs_for_a_revision() {
        let db = memory_db().await;
        let job = EventJob::new("uid_a".into(), "rev_1".into(), 5);
        db.store_item(job).await.expect("store first");

        let duplicate = EventJob::new("uid_a".into(), "rev_1".into(), 5);
        let result = db.store_item(duplicate).await;
        assert!(result.is_err(), "unique (uid, rev, type) index must reject");
    }

    #[tokio::test]
    async fn stale_processing_rows_are_reclaimed() {
        let db = memory_db().await;
        let job = EventJob::new("uid_a".into(), "rev_1".into(), 5);
        db.store_item(job.clone()).await.expect("store");

        let claimed = EventJob::claim_next_ready(&db, "dead-worker", Utc::now())
            .await
            .expect("claim")
            .expect("job");
        assert_eq!(claimed.status, JobStatus::Processing);

        // A cutoff before the lock was taken reclaims nothing.
        let reclaimed = EventJob::reclaim_stale(&db, Utc::now() - Duration::seconds(600))
            .await
            .expect("reclaim early");
        assert_eq!(reclaimed, 0);

        let reclaimed = EventJob::reclaim_stale(&db, Utc::now() + Duration::seconds(1))
            .await
            .expect("reclaim");
        assert_eq!(reclaimed, 1);

        let stored: EventJob = db.get_item(&job.id).await.expect("get").expect("row");
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(stored.locked_by.is_none());
        assert_eq!(stored.attempts, 1, "the dead worker's attempt stays consumed");
    }
}
