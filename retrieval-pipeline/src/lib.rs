#![allow(clippy::missing_docs_in_private_items)]

pub mod engine;
pub mod graph;
pub mod hybrid;

pub use engine::{
    HitKind, NoopPrivacyFilter, PrivacyFilter, RetrievalEngine, SearchHit, SearchOptions,
    CHUNK_BOUNDARY,
};
pub use graph::{expand_events, ExpansionRequest, RelatedEvent};
pub use hybrid::{hybrid_search_with_graph, HybridOptions, HybridResponse};
