use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::document::{Document, ScoredDocument};
use crate::domain::role::Role;
use crate::domain::sensitivity::SensitivityLabel;
use crate::policy::AccessPolicy;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("document index unavailable: {0}")]
    Unavailable(String),
    #[error("query embedding failed: {0}")]
    Embedding(String),
}

/// Similarity search over the document store.
///
/// Implementations know nothing about roles; results come back ordered by
/// descending relevance and may include any label.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>, RetrievalError>;

    /// Number of ingested documents.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrievalSettings {
    pub oversample_factor: usize,
    pub max_oversample_factor: usize,
    pub widen_on_sparse: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { oversample_factor: 3, max_oversample_factor: 12, widen_on_sparse: true }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub items: Vec<ScoredDocument>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.items.iter().map(|item| &item.document)
    }

    pub fn sensitivities(&self) -> BTreeSet<SensitivityLabel> {
        self.documents().map(|document| document.sensitivity).collect()
    }

    pub fn sources(&self) -> BTreeSet<String> {
        self.documents().map(|document| document.source.clone()).collect()
    }

    /// Context block handed to the model, one paragraph per document.
    pub fn context_text(&self) -> String {
        self.documents()
            .map(|document| {
                format!(
                    "Source ({}, {}): {}",
                    document.sensitivity, document.source, document.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Wraps a [`DocumentIndex`] and enforces the [`AccessPolicy`].
///
/// Similarity search cannot see access control, so the retriever oversamples
/// candidates and filters afterwards. A heavily restricted role can still get
/// fewer than `k` results when permitted matches rank below the widest window;
/// `max_oversample_factor` bounds that cost.
#[derive(Clone)]
pub struct SecureRetriever {
    index: Arc<dyn DocumentIndex>,
    policy: AccessPolicy,
    settings: RetrievalSettings,
}

impl SecureRetriever {
    pub fn new(index: Arc<dyn DocumentIndex>, policy: AccessPolicy) -> Self {
        Self::with_settings(index, policy, RetrievalSettings::default())
    }

    pub fn with_settings(
        index: Arc<dyn DocumentIndex>,
        policy: AccessPolicy,
        settings: RetrievalSettings,
    ) -> Self {
        Self { index, policy, settings }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn corpus_size(&self) -> usize {
        self.index.len()
    }

    pub async fn retrieve(
        &self,
        query: &str,
        role: Role,
        k: usize,
    ) -> Result<RetrievalResult, RetrievalError> {
        if k == 0 {
            return Ok(RetrievalResult::default());
        }

        let allowed = self.policy.allowed_labels(role);
        let corpus_size = self.index.len();
        let oversample = self.settings.oversample_factor.max(1);
        let max_window = k.saturating_mul(self.settings.max_oversample_factor.max(oversample));
        let mut window = k.saturating_mul(oversample);

        loop {
            let candidates = self.index.search(query, window).await?;
            let fetched = candidates.len();
            let items = candidates
                .into_iter()
                .filter(|candidate| allowed.contains(&candidate.document.sensitivity))
                .take(k)
                .collect::<Vec<_>>();

            let exhausted = fetched < window || window >= corpus_size || window >= max_window;
            if items.len() >= k || !self.settings.widen_on_sparse || exhausted {
                debug!(
                    event_name = "retrieval.completed",
                    role = %role,
                    requested = k,
                    candidate_window = window,
                    returned = items.len(),
                    "secure retrieval completed"
                );
                return Ok(RetrievalResult { items });
            }

            debug!(
                event_name = "retrieval.window_widened",
                role = %role,
                previous_window = window,
                permitted = items.len(),
                "permitted results sparse, widening candidate window"
            );
            window = window.saturating_mul(2).min(max_window);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{DocumentIndex, RetrievalError, RetrievalSettings, SecureRetriever};
    use crate::domain::document::{Document, ScoredDocument};
    use crate::domain::role::Role;
    use crate::domain::sensitivity::SensitivityLabel;
    use crate::policy::AccessPolicy;

    /// Returns its documents in the given order, scored by position.
    struct RankedIndex {
        documents: Vec<Document>,
        searches: AtomicUsize,
    }

    impl RankedIndex {
        fn new(labels: &[SensitivityLabel]) -> Self {
            let documents = labels
                .iter()
                .enumerate()
                .map(|(position, label)| {
                    let content = format!("doc-{position}");
                    Document::new(content, *label, format!("src-{position}"), "test", 2024)
                })
                .collect();
            Self { documents, searches: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl DocumentIndex for RankedIndex {
        async fn search(
            &self,
            _query: &str,
            k: usize,
        ) -> Result<Vec<ScoredDocument>, RetrievalError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .documents
                .iter()
                .take(k)
                .enumerate()
                .map(|(position, document)| ScoredDocument {
                    document: document.clone(),
                    score: 1.0 - position as f32 / 100.0,
                })
                .collect())
        }

        fn len(&self) -> usize {
            self.documents.len()
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl DocumentIndex for BrokenIndex {
        async fn search(&self, _: &str, _: usize) -> Result<Vec<ScoredDocument>, RetrievalError> {
            Err(RetrievalError::Unavailable("index offline".to_string()))
        }

        fn len(&self) -> usize {
            0
        }
    }

    use SensitivityLabel::{Insider, Product, Public};

    #[tokio::test]
    async fn filters_out_labels_outside_the_role_grant() {
        let index = Arc::new(RankedIndex::new(&[Insider, Product, Public, Insider, Public]));
        let retriever = SecureRetriever::new(index, AccessPolicy::standard());

        let result = retriever.retrieve("anything", Role::Analyst, 5).await.expect("retrieve");

        assert_eq!(result.len(), 2);
        assert!(result.documents().all(|document| document.sensitivity == Public));
    }

    #[tokio::test]
    async fn preserves_similarity_order_and_truncates_to_k() {
        let index = Arc::new(RankedIndex::new(&[Public, Insider, Public, Product, Public]));
        let retriever = SecureRetriever::new(index, AccessPolicy::standard());

        let result =
            retriever.retrieve("anything", Role::ProductManager, 3).await.expect("retrieve");
        let contents = result.documents().map(|d| d.content.as_str()).collect::<Vec<_>>();

        assert_eq!(contents, vec!["doc-0", "doc-2", "doc-3"]);
        assert!(result.items.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[tokio::test]
    async fn widens_window_when_permitted_results_are_sparse() {
        let mut labels = vec![Insider; 8];
        labels.extend([Public, Public]);
        let index = Arc::new(RankedIndex::new(&labels));
        let retriever = SecureRetriever::new(index.clone(), AccessPolicy::standard());

        let result = retriever.retrieve("anything", Role::Analyst, 2).await.expect("retrieve");

        assert_eq!(result.len(), 2);
        assert!(index.searches.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn without_widening_sparse_results_stay_partial() {
        let mut labels = vec![Insider; 8];
        labels.extend([Public, Public]);
        let index = Arc::new(RankedIndex::new(&labels));
        let retriever = SecureRetriever::with_settings(
            index.clone(),
            AccessPolicy::standard(),
            RetrievalSettings { widen_on_sparse: false, ..RetrievalSettings::default() },
        );

        let result = retriever.retrieve("anything", Role::Analyst, 2).await.expect("retrieve");

        assert!(result.is_empty(), "no permitted document in the first window");
        assert_eq!(index.searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_result_is_not_an_error() {
        let index = Arc::new(RankedIndex::new(&[Insider, Insider]));
        let retriever = SecureRetriever::new(index, AccessPolicy::standard());

        let result = retriever.retrieve("anything", Role::Analyst, 3).await.expect("retrieve");

        assert!(result.is_empty());
        assert_eq!(result.context_text(), "");
    }

    #[tokio::test]
    async fn index_failure_surfaces_as_retrieval_error() {
        let retriever = SecureRetriever::new(Arc::new(BrokenIndex), AccessPolicy::standard());

        let error = retriever.retrieve("anything", Role::Executive, 3).await.expect_err("fails");

        assert_eq!(error, RetrievalError::Unavailable("index offline".to_string()));
    }

    #[tokio::test]
    async fn context_text_names_label_and_source() {
        let index = Arc::new(RankedIndex::new(&[Public, Product]));
        let retriever = SecureRetriever::new(index, AccessPolicy::standard());

        let result =
            retriever.retrieve("anything", Role::ProductManager, 2).await.expect("retrieve");

        assert_eq!(
            result.context_text(),
            "Source (public, src-0): doc-0\n\nSource (product, src-1): doc-1"
        );
        assert_eq!(result.sensitivities().len(), 2);
        assert!(result.sources().contains("src-1"));
    }
}
