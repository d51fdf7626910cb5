//! Knowledge entities: data model, storage, lookup and retrieval.

pub mod kb;
pub mod memory;
pub mod pg;
pub mod rag;
pub mod store;
pub mod types;

pub use kb::{KnowledgeBase, RESOLVE_THRESHOLD};
pub use memory::MemoryKnowledgeStore;
pub use pg::PgKnowledgeStore;
pub use rag::{RagOutcome, RagPipeline};
pub use store::{
    clamp_limit, clamp_offset, KnowledgeError, KnowledgeStore, NearbyEntity, Page, ScoredEntity,
    SearchFilters,
};
pub use types::{EntityDraft, EntityKind, GeoPoint, KnowledgeEntity, MultilingualText};
