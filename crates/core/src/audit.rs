use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::role::Role;
use crate::domain::sensitivity::SensitivityLabel;
use crate::retrieval::RetrievalResult;

/// Compliance record of one completed question/answer exchange.
///
/// The serialized field set is the persisted line format of the audit file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub query: String,
    pub sensitivities_touched: BTreeSet<SensitivityLabel>,
    pub sources_touched: BTreeSet<String>,
    pub response_length: usize,
    pub guardrail_triggered: bool,
}

impl AuditEntry {
    pub fn for_exchange(
        role: Role,
        query: impl Into<String>,
        context: &RetrievalResult,
        response: &str,
        guardrail_triggered: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            role,
            query: query.into(),
            sensitivities_touched: context.sensitivities(),
            sources_touched: context.sources(),
            response_length: response.chars().count(),
            guardrail_triggered,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Append-only sink. One call writes exactly one entry or fails without
/// leaving a partial one behind.
pub trait AuditLog: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

#[derive(Clone, Default)]
pub struct InMemoryAuditLog {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl InMemoryAuditLog {
    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditLog for InMemoryAuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry.clone()),
            Err(poisoned) => poisoned.into_inner().push(entry.clone()),
        }
        Ok(())
    }
}
