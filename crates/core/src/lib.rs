pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod policy;
pub mod retrieval;

pub use audit::{AuditEntry, AuditError, AuditLog, InMemoryAuditLog};
pub use domain::document::{Document, ScoredDocument};
pub use domain::role::Role;
pub use domain::sensitivity::SensitivityLabel;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use policy::AccessPolicy;
pub use retrieval::{
    DocumentIndex, RetrievalError, RetrievalResult, RetrievalSettings, SecureRetriever,
};
