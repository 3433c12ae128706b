/// Policy gate for destructive administrative operations
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PasarelaError, PasarelaResult};

/// Classification of every operation the dispatcher executes.
/// Checked once, centrally, before anything reaches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write,
    DropDatabase,
    DropCollection,
    /// Non-destructive administrative calls (create database, create collection, ...)
    Admin,
}

impl OperationKind {
    pub fn is_destructive(&self) -> bool {
        matches!(self, OperationKind::DropDatabase | OperationKind::DropCollection)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Read => write!(f, "read"),
            OperationKind::Write => write!(f, "write"),
            OperationKind::DropDatabase => write!(f, "drop-database"),
            OperationKind::DropCollection => write!(f, "drop-collection"),
            OperationKind::Admin => write!(f, "admin"),
        }
    }
}

/// The capability a denied operation would have needed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    DatabaseDelete,
    CollectionDelete,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::DatabaseDelete => write!(f, "database deletion"),
            Capability::CollectionDelete => write!(f, "collection deletion"),
        }
    }
}

/// Which destructive operations are permitted. Resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyPolicy {
    pub disable_database_delete: bool,
    pub disable_collection_delete: bool,
}

impl SafetyPolicy {
    /// Everything destructive denied
    pub fn locked() -> Self {
        Self {
            disable_database_delete: true,
            disable_collection_delete: true,
        }
    }

    /// Everything destructive allowed
    pub fn permissive() -> Self {
        Self {
            disable_database_delete: false,
            disable_collection_delete: false,
        }
    }
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::locked()
    }
}

/// Read-only after construction; shared freely without locking.
#[derive(Debug, Clone, Copy)]
pub struct SafetyGuard {
    policy: SafetyPolicy,
}

impl SafetyGuard {
    pub fn new(policy: SafetyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SafetyPolicy {
        self.policy
    }

    /// Synchronous, local decision. Non-destructive kinds always pass.
    pub fn check_allowed(&self, kind: OperationKind) -> PasarelaResult<()> {
        let denied = match kind {
            OperationKind::DropDatabase if self.policy.disable_database_delete => {
                Some(Capability::DatabaseDelete)
            }
            OperationKind::DropCollection if self.policy.disable_collection_delete => {
                Some(Capability::CollectionDelete)
            }
            _ => None,
        };

        match denied {
            Some(capability) => {
                tracing::warn!(kind = %kind, "Destructive operation denied by safety policy");
                Err(PasarelaError::OperationForbidden { capability })
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [OperationKind; 5] = [
        OperationKind::Read,
        OperationKind::Write,
        OperationKind::DropDatabase,
        OperationKind::DropCollection,
        OperationKind::Admin,
    ];

    #[test]
    fn test_non_destructive_always_pass() {
        let guard = SafetyGuard::new(SafetyPolicy::locked());
        for kind in ALL_KINDS.iter().filter(|k| !k.is_destructive()) {
            assert!(guard.check_allowed(*kind).is_ok(), "{} should pass", kind);
        }
    }

    #[test]
    fn test_database_delete_denied() {
        let guard = SafetyGuard::new(SafetyPolicy {
            disable_database_delete: true,
            disable_collection_delete: false,
        });

        for _ in 0..10 {
            match guard.check_allowed(OperationKind::DropDatabase) {
                Err(PasarelaError::OperationForbidden { capability }) => {
                    assert_eq!(capability, Capability::DatabaseDelete);
                }
                other => panic!("expected denial, got {:?}", other),
            }
        }
        assert!(guard.check_allowed(OperationKind::DropCollection).is_ok());
    }

    #[test]
    fn test_collection_delete_denied_independently() {
        let guard = SafetyGuard::new(SafetyPolicy {
            disable_database_delete: false,
            disable_collection_delete: true,
        });

        assert!(guard.check_allowed(OperationKind::DropDatabase).is_ok());
        assert!(matches!(
            guard.check_allowed(OperationKind::DropCollection),
            Err(PasarelaError::OperationForbidden {
                capability: Capability::CollectionDelete
            })
        ));
    }

    #[test]
    fn test_permissive_policy() {
        let guard = SafetyGuard::new(SafetyPolicy::permissive());
        for kind in ALL_KINDS {
            assert!(guard.check_allowed(kind).is_ok());
        }
    }

    #[test]
    fn test_default_is_locked() {
        assert_eq!(SafetyPolicy::default(), SafetyPolicy::locked());
    }
}
