use serde::{Deserialize, Serialize};

use crate::domain::sensitivity::SensitivityLabel;

/// A knowledge-base passage. Documents are never mutated after ingestion;
/// an update is modelled as replacing the whole document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub sensitivity: SensitivityLabel,
    pub source: String,
    pub category: String,
    pub year: i32,
}

impl Document {
    pub fn new(
        content: impl Into<String>,
        sensitivity: SensitivityLabel,
        source: impl Into<String>,
        category: impl Into<String>,
        year: i32,
    ) -> Self {
        Self {
            content: content.into(),
            sensitivity,
            source: source.into(),
            category: category.into(),
            year,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}
