use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Classification attached to every stored document.
///
/// Labels carry no rank. Which roles see which labels is decided only by the
/// [`AccessPolicy`](crate::policy::AccessPolicy).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityLabel {
    Public,
    Product,
    Insider,
}

impl SensitivityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Product => "product",
            Self::Insider => "insider",
        }
    }
}

impl fmt::Display for SensitivityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensitivityLabel {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "public" => Ok(Self::Public),
            "product" => Ok(Self::Product),
            "insider" => Ok(Self::Insider),
            other => Err(DomainError::InvariantViolation(format!(
                "unknown sensitivity label `{other}`"
            ))),
        }
    }
}
