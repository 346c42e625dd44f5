use serde::{Deserialize, Serialize};

pub use stockroom_core::PrincipalId;

use crate::{Permission, Role};

/// A resolved principal: identity plus the roles and explicit permissions
/// granted to it.
///
/// Construction is decoupled from storage and transport; the identity
/// collaborator builds these from whatever it authenticates against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Principal {
    pub fn new(principal_id: PrincipalId) -> Self {
        Self {
            principal_id,
            roles: Vec::new(),
            permissions: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }
}
