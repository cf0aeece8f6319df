use std::collections::{BTreeMap, BTreeSet};

use crate::domain::role::Role;
use crate::domain::sensitivity::SensitivityLabel;
use crate::errors::DomainError;

/// Role → visible sensitivity labels.
///
/// The mapping is total over [`Role::ALL`] and never maps a role to an empty
/// set; both are checked at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPolicy {
    grants: BTreeMap<Role, BTreeSet<SensitivityLabel>>,
}

impl AccessPolicy {
    pub fn new(grants: BTreeMap<Role, BTreeSet<SensitivityLabel>>) -> Result<Self, DomainError> {
        for role in Role::ALL {
            match grants.get(&role) {
                None => {
                    return Err(DomainError::InvariantViolation(format!(
                        "access policy has no grant for role `{role}`"
                    )))
                }
                Some(labels) if labels.is_empty() => {
                    return Err(DomainError::InvariantViolation(format!(
                        "access policy grants role `{role}` no labels"
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(Self { grants })
    }

    /// analyst: public; product_manager: public + product; executive: everything.
    pub fn standard() -> Self {
        use SensitivityLabel::{Insider, Product, Public};

        let grants = BTreeMap::from([
            (Role::Analyst, BTreeSet::from([Public])),
            (Role::ProductManager, BTreeSet::from([Public, Product])),
            (Role::Executive, BTreeSet::from([Public, Product, Insider])),
        ]);
        Self { grants }
    }

    pub fn allowed_labels(&self, role: Role) -> &BTreeSet<SensitivityLabel> {
        // `new` and `standard` both guarantee an entry for every role.
        &self.grants[&role]
    }

    pub fn allowed_labels_for_name(
        &self,
        role_name: &str,
    ) -> Result<&BTreeSet<SensitivityLabel>, DomainError> {
        let role = role_name.parse::<Role>()?;
        Ok(self.allowed_labels(role))
    }

    pub fn permits(&self, role: Role, label: SensitivityLabel) -> bool {
        self.allowed_labels(role).contains(&label)
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::standard()
    }
}
