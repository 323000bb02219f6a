#![allow(clippy::missing_docs_in_private_items)]

pub mod entity_resolver;
pub mod extractor;
pub mod llm_instructions;
pub mod writer;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

use common::{
    error::{AppError, RetryClass},
    storage::{
        db::SurrealDbClient,
        types::{
            artifact_revision::ArtifactRevision,
            chunk_vector::ChunkVectorRecord,
            content_vector::ContentVectorRecord,
            event_job::EventJob,
        },
    },
    utils::config::AppConfig,
};

use entity_resolver::EntityResolver;
use extractor::{EventExtractor, ExtractionChunk};

/// Claim/process loop. One invocation per worker process; multiple
/// processes may run against the same store. Holds no state across
/// iterations, so restarting mid-stream is always safe. The shutdown flag
/// is honored between jobs; an in-flight job is finished first.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    extractor: Arc<dyn EventExtractor>,
    resolver: Arc<EntityResolver>,
    config: &AppConfig,
    shutdown: Arc<AtomicBool>,
) -> Result<(), AppError> {
    let worker_id = format!("extraction-worker-{}", Uuid::new_v4());
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let stale_cutoff = ChronoDuration::seconds(i64::try_from(config.stale_lock_secs).unwrap_or(600));

    info!(%worker_id, "worker started");

    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!(%worker_id, "worker stopping");
            return Ok(());
        }

        // Opportunistic stale-lock recovery; cheap when nothing is stuck.
        match EventJob::reclaim_stale(&db, Utc::now() - stale_cutoff).await {
            Ok(0) => {}
            Ok(reclaimed) => warn!(%worker_id, reclaimed, "reclaimed stale processing jobs"),
            Err(err) => warn!(%worker_id, error = %err, "stale reclaim failed"),
        }

        match EventJob::claim_next_ready(&db, &worker_id, Utc::now()).await {
            Ok(Some(job)) => {
                let job_id = job.id.clone();
                info!(
                    %worker_id,
                    %job_id,
                    artifact_uid = %job.artifact_uid,
                    revision_id = %job.revision_id,
                    attempt = job.attempts,
                    "claimed extraction job"
                );

                let outcome = match process_job(&db, extractor.as_ref(), &resolver, &job).await {
                    Ok(events) => {
                        info!(%worker_id, %job_id, events, "extraction job done");
                        EventJob::complete(&db, &job_id).await
                    }
                    Err(err) => dispatch_failure(&db, &job, &err, &worker_id).await,
                };
                if let Err(err) = outcome {
                    // The job stays PROCESSING; stale recovery will return
                    // it to the queue.
                    error!(%worker_id, %job_id, error = %err, "failed to record job outcome");
                }
            }
            Ok(None) => {
                sleep(poll_interval).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim extraction job");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Route a processing failure into the queue's transient or terminal path.
async fn dispatch_failure(
    db: &SurrealDbClient,
    job: &EventJob,
    err: &AppError,
    worker_id: &str,
) -> Result<(), AppError> {
    let code = err.error_code();
    let message = err.to_string();

    match err.retry_class() {
        RetryClass::Transient => {
            let status = job.fail_transient(db, &code, &message).await?;
            warn!(
                %worker_id,
                job_id = %job.id,
                attempt = job.attempts,
                status = ?status,
                error = %message,
                "extraction job failed transiently"
            );
        }
        RetryClass::Integrity => {
            EventJob::fail_terminal(db, &job.id, &code, &message).await?;
            error!(
                %worker_id,
                job_id = %job.id,
                error = %message,
                "extraction job violated an invariant"
            );
        }
        _ => {
            EventJob::fail_terminal(db, &job.id, &code, &message).await?;
            warn!(
                %worker_id,
                job_id = %job.id,
                error = %message,
                "extraction job failed terminally"
            );
        }
    }

    Ok(())
}

/// Load the revision text, run extraction, and write the replacement set.
pub async fn process_job(
    db: &SurrealDbClient,
    extractor: &dyn EventExtractor,
    resolver: &EntityResolver,
    job: &EventJob,
) -> Result<usize, AppError> {
    let revision = ArtifactRevision::find(db, &job.artifact_uid, &job.revision_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "revision {}/{}",
                job.artifact_uid, job.revision_id
            ))
        })?;

    let (content, chunks) = load_revision_text(db, &revision).await?;
    let content_len = content.len();

    let extraction_chunks = if chunks.is_empty() {
        vec![ExtractionChunk {
            chunk_id: None,
            content,
            start_char: 0,
        }]
    } else {
        chunks
            .into_iter()
            .map(|chunk| ExtractionChunk {
                chunk_id: Some(chunk.id),
                content: chunk.document,
                start_char: chunk.start_char,
            })
            .collect()
    };

    let events = extractor
        .extract(&revision, content_len, &extraction_chunks)
        .await?;

    writer::write_events(db, resolver, &revision, content_len, events).await
}

/// The revision text: one GET against the content collection, or a
/// reassembly from the overlapping chunk windows when the content record
/// is gone.
async fn load_revision_text(
    db: &SurrealDbClient,
    revision: &ArtifactRevision,
) -> Result<(String, Vec<ChunkVectorRecord>), AppError> {
    let chunks = if revision.chunk_count > 0 {
        ChunkVectorRecord::list_for_revision(db, &revision.artifact_uid, &revision.revision_id)
            .await?
    } else {
        Vec::new()
    };

    if let Some(record) = ContentVectorRecord::get(db, &revision.artifact_id).await? {
        if record.revision_id == revision.revision_id {
            return Ok((record.document, chunks));
        }
    }

    if chunks.is_empty() {
        return Err(AppError::NotFound(format!(
            "no stored text for revision {}/{}",
            revision.artifact_uid, revision.revision_id
        )));
    }

    Ok((reassemble_chunks(&chunks)?, chunks))
}

/// Stitch overlapping windows back into the full text using their byte
/// offsets.
fn reassemble_chunks(chunks: &[ChunkVectorRecord]) -> Result<String, AppError> {
    let mut text = String::new();

    for chunk in chunks {
        if chunk.start_char > text.len() {
            return Err(AppError::Integrity(format!(
                "chunk {} starts at {} but only {} bytes are assembled",
                chunk.id,
                chunk.start_char,
                text.len()
            )));
        }

        let skip = text.len() - chunk.start_char;
        let fresh = chunk.document.get(skip..).ok_or_else(|| {
            AppError::Integrity(format!(
                "chunk {} overlap does not align on a character boundary",
                chunk.id
            ))
        })?;
        text.push_str(fresh);
    }

    Ok(text)
}
