pub mod audit_log;
pub mod embedding;
pub mod fixtures;
pub mod index;

pub use audit_log::JsonlAuditLog;
pub use embedding::{Embedder, HashingEmbedder};
pub use fixtures::{financial_corpus, seeded_index};
pub use index::InMemoryDocumentIndex;
