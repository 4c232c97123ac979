//! Which tenants a caller may act on

use netbill_core::tenant::{User, UserRole};
use uuid::Uuid;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerScope {
    /// Every tenant
    All,
    /// A single tenant
    Owner(Uuid),
}

impl OwnerScope {
    /// Resolve the scope of a caller.
    ///
    /// Fails for a non-top-level user that belongs to no tenant, which must
    /// abort the caller's operation before anything is written.
    pub fn for_caller(caller: &User) -> Result<Self> {
        if caller.role == UserRole::Superadmin {
            return Ok(Self::All);
        }
        match caller.owner_id {
            Some(owner_id) => Ok(Self::Owner(owner_id)),
            None if caller.role == UserRole::Admin => Ok(Self::Owner(caller.id)),
            None => Err(EngineError::config(format!(
                "User '{}' ({}) is not attached to a tenant",
                caller.username,
                caller.role.as_str()
            ))),
        }
    }

    /// The tenant filter, `None` for every tenant
    pub fn owner_id(self) -> Option<Uuid> {
        match self {
            Self::All => None,
            Self::Owner(id) => Some(id),
        }
    }

    pub fn allows(self, owner_id: Uuid) -> bool {
        self.owner_id().map_or(true, |id| id == owner_id)
    }
}
