use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identifier constructors.
///
/// Every function here is pure: identical inputs always produce identical
/// identifiers, which is what makes the ingest path idempotent and the
/// vector-store upserts safe to repeat. Nothing in this module consults
/// external state.

fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub fn content_hash(content: &str) -> String {
    sha256_hex(content.as_bytes())
}

/// Stable artifact identity: derived from the source coordinates when the
/// caller supplies them, from the content hash otherwise.
pub fn artifact_uid(source_system: &str, source_id: Option<&str>, content: &str) -> String {
    let digest = match source_id {
        Some(source_id) => sha256_hex(format!("{source_system}:{source_id}").as_bytes()),
        None => content_hash(content),
    };
    format!("uid_{}", &digest[..16])
}

pub fn revision_id(content: &str) -> String {
    format!("rev_{}", &content_hash(content)[..16])
}

/// Vector-store document id for the artifact, stable across revisions.
pub fn artifact_id(artifact_uid: &str) -> String {
    format!("art_{}", &sha256_hex(artifact_uid.as_bytes())[..8])
}

pub fn chunk_id(artifact_id: &str, index: usize, chunk_text: &str) -> String {
    format!(
        "{artifact_id}::chunk::{index:03}::{}",
        &content_hash(chunk_text)[..8]
    )
}

pub fn event_id() -> String {
    format!("evt_{}", Uuid::new_v4())
}

pub fn evidence_id() -> String {
    format!("evi_{}", Uuid::new_v4())
}

pub fn job_id() -> String {
    format!("job_{}", Uuid::new_v4())
}

pub fn extraction_run_id() -> String {
    format!("run_{}", Uuid::new_v4())
}
