//! Multi-tier memory providers and the manager that orchestrates them.

pub mod error;
pub mod health;
pub mod manager;
pub mod model;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod text;
pub mod vector;

/// Memory error type.
pub use error::MemoryError;
/// Provider health reporting.
pub use health::{HealthState, HealthStatus};
/// Lifecycle orchestration.
pub use manager::{HealthCallback, HealthReport, ManagerStatus, MemoryManager};
/// Domain records.
pub use model::{
    ConversationSummary, EmotionTrend, EmotionalRecord, EpisodeHit, EpisodeKind,
    EpisodeSearchOptions, HistoryOptions, KeyEvent, KeyEventQuery, KeyEventUpdate, Message,
    NewKeyEvent, NewProfileFact, ObjectMeta, ProfileFact, Sentiment, TimelineEntry,
};
/// Capture filtering for working memory.
pub use policy::CapturePolicy;
/// Provider contracts and built-in backends.
pub use provider::episodic::InMemoryEpisodicMemory;
pub use provider::knowledge::VectorKnowledgeMemory;
pub use provider::profile::{InMemoryProfileMemory, SqliteProfileMemory};
pub use provider::storage::{FileObjectStorage, InMemoryObjectStorage};
pub use provider::working::InMemoryWorkingMemory;
pub use provider::{
    AddOutcome, EpisodicMemory, KnowledgeMemory, ObjectStorage, ProfileMemory, Provider,
    ProviderState, WorkingMemory,
};
/// Provider factory.
pub use registry::{DomainProvider, ProviderConstructor, ProviderRegistry};
/// Vector search.
pub use vector::{
    Embedder, HashEmbedder, InMemoryVectorStore, MemoryFilter, MemoryMatch, NewUserMemory,
    RebuildReport, SearchOptions, SqliteVectorStore, UserMemory, VectorSearchEngine, VectorStore,
};
