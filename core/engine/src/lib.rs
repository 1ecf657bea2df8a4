//! Conversation Memory & Moderation Engine.
//!
//! Assembles bounded context for every AI call (recency window plus
//! semantic recall), keeps the relational and vector stores consistent
//! under soft- and permanent-delete semantics, screens replies for
//! policy violations without blocking delivery, and produces
//! privacy-preserving emotional summaries for administrators.

pub mod assembler;
pub mod deletion;
pub mod engine;
pub mod error;
pub mod locks;
pub mod moderation;
pub mod providers;
pub mod store;
pub mod summary;
pub mod users;
pub mod vector;

pub use engine::{CompanionEngine, RECALL_K, SUMMARY_INPUT_BOUND, WINDOW_SIZE};
pub use error::EngineError;
pub use moderation::ModerationScanner;
pub use providers::{
    CompletionProvider, EmbeddingProvider, GenerationOptions, OllamaProvider, OpenAiProvider,
};
pub use store::ChatStore;
pub use users::{StaticDirectory, UserDirectory};
pub use vector::{InMemoryVectorStore, SqliteVectorStore, VectorHit, VectorStore};
