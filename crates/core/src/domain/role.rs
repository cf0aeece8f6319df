use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Identity presented by the caller. The set is closed; anything else is an
/// [`DomainError::UnknownRole`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Analyst,
    ProductManager,
    Executive,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Analyst, Role::ProductManager, Role::Executive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyst => "analyst",
            Self::ProductManager => "product_manager",
            Self::Executive => "executive",
        }
    }

    /// Accepted role names quoted for user messages: `'a', 'b', or 'c'`.
    pub fn accepted_names() -> String {
        let quoted =
            Self::ALL.iter().map(|role| format!("'{}'", role.as_str())).collect::<Vec<_>>();
        match quoted.split_last() {
            Some((last, rest)) if !rest.is_empty() => format!("{}, or {last}", rest.join(", ")),
            _ => quoted.join(""),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "analyst" => Ok(Self::Analyst),
            "product_manager" => Ok(Self::ProductManager),
            "executive" => Ok(Self::Executive),
            other => Err(DomainError::UnknownRole(other.to_string())),
        }
    }
}
