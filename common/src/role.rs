// Execution role: a static, named capability grant checked before every
// privileged call. Denial is an error, never a silent no-op.

use crate::errors::RoleError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single named permission a role may or may not grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Basic execution and structured logging
    Logging,
    /// Publishing to the notification channel
    NotifyPublish,
    /// Reading and writing artifact records
    StorageReadWrite,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Logging => "logging",
            Capability::NotifyPublish => "notify_publish",
            Capability::StorageReadWrite => "storage_read_write",
        };
        f.write_str(name)
    }
}

/// A named set of capabilities bound to the compute function at construction
/// time. The grant set is immutable after the role is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRole {
    name: String,
    grants: BTreeSet<Capability>,
}

impl ExecutionRole {
    pub fn new(name: impl Into<String>, grants: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            name: name.into(),
            grants: grants.into_iter().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grants(&self) -> impl Iterator<Item = Capability> + '_ {
        self.grants.iter().copied()
    }

    /// Check a capability against the grant set. Fails closed: anything not
    /// explicitly granted is denied.
    pub fn authorize(&self, capability: Capability) -> Result<(), RoleError> {
        if self.grants.contains(&capability) {
            Ok(())
        } else {
            Err(RoleError::CapabilityDenied {
                role: self.name.clone(),
                capability,
            })
        }
    }

    pub fn is_granted(&self, capability: Capability) -> bool {
        self.grants.contains(&capability)
    }
}
