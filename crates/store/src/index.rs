use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use ledgerlens_core::domain::document::{Document, ScoredDocument};
use ledgerlens_core::retrieval::{DocumentIndex, RetrievalError};

use crate::embedding::{cosine, Embedder};

struct IndexedDocument {
    document: Document,
    embedding: Vec<f32>,
}

/// Brute-force cosine index over an immutable document set.
///
/// Ingestion happens before the index is shared; afterwards it is read-only
/// and safe to hold behind an `Arc` across requests.
pub struct InMemoryDocumentIndex {
    embedder: Arc<dyn Embedder>,
    entries: Vec<IndexedDocument>,
}

impl InMemoryDocumentIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder, entries: Vec::new() }
    }

    pub fn with_documents(
        embedder: Arc<dyn Embedder>,
        documents: impl IntoIterator<Item = Document>,
    ) -> Self {
        let mut index = Self::new(embedder);
        for document in documents {
            index.ingest(document);
        }
        debug!(
            event_name = "store.index_built",
            documents = index.entries.len(),
            dimensions = index.embedder.dimensions(),
            "document index built"
        );
        index
    }

    pub fn ingest(&mut self, document: Document) {
        let embedding = self.embedder.embed(&document.content);
        self.entries.push(IndexedDocument { document, embedding });
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.entries.iter().map(|entry| &entry.document)
    }
}

#[async_trait]
impl DocumentIndex for InMemoryDocumentIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>, RetrievalError> {
        let query_embedding = self.embedder.embed(query);
        if query_embedding.len() != self.embedder.dimensions() {
            return Err(RetrievalError::Embedding(format!(
                "expected {} dimensions, embedder produced {}",
                self.embedder.dimensions(),
                query_embedding.len()
            )));
        }

        let mut scored = self
            .entries
            .iter()
            .map(|entry| ScoredDocument {
                document: entry.document.clone(),
                score: cosine(&query_embedding, &entry.embedding),
            })
            .collect::<Vec<_>>();
        // Stable sort: equal scores keep ingestion order.
        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(k);
        Ok(scored)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
