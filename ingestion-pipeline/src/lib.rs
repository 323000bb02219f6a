#![allow(clippy::missing_docs_in_private_items)]

pub mod chunker;
pub mod coordinator;

pub use chunker::{Chunk, Chunker};
pub use coordinator::{
    IngestCoordinator, IngestMetadata, IngestOutcome, IngestReceipt, IngestRequest,
};
