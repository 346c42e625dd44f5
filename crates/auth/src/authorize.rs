use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use thiserror::Error;

use stockroom_core::{DomainError, DomainResult};

use crate::permissions::capabilities as caps;
use crate::{Permission, Principal, PrincipalId, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("unknown principal: {0}")]
    UnknownPrincipal(PrincipalId),

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

impl From<AuthzError> for DomainError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::UnknownPrincipal(_) => DomainError::permission_denied("authenticated"),
            AuthzError::Forbidden(capability) => DomainError::permission_denied(capability),
        }
    }
}

/// Authorization collaborator: answers "may this principal use this capability?".
///
/// The ledger and order services call this before every guarded mutation and
/// never decide on roles themselves.
pub trait Authorizer: Send + Sync {
    fn has_capability(&self, principal: PrincipalId, capability: &Permission) -> bool;

    /// `has_capability` lifted into the domain error contract.
    fn ensure(&self, principal: PrincipalId, capability: &Permission) -> DomainResult<()> {
        if self.has_capability(principal, capability) {
            Ok(())
        } else {
            Err(DomainError::permission_denied(capability.as_str()))
        }
    }
}

impl<A> Authorizer for std::sync::Arc<A>
where
    A: Authorizer + ?Sized,
{
    fn has_capability(&self, principal: PrincipalId, capability: &Permission) -> bool {
        (**self).has_capability(principal, capability)
    }
}

/// Mapping from role names to the permissions they grant.
#[derive(Debug, Clone, Default)]
pub struct RolePolicy {
    grants: HashMap<String, Vec<Permission>>,
}

impl RolePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, role: Role, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.grants
            .entry(role.as_str().to_string())
            .or_default()
            .extend(permissions);
        self
    }

    /// The role set shipped by default.
    ///
    /// Only `admin` (through the wildcard) may ADJUST stock.
    pub fn standard() -> Self {
        Self::new()
            .grant(Role::ADMIN, [caps::WILDCARD])
            .grant(
                Role::MANAGER,
                [
                    caps::TRANSACT_STOCK,
                    caps::ADD_PRODUCT,
                    caps::DISCONTINUE_PRODUCT,
                    caps::ADD_WAREHOUSE,
                    caps::CREATE_PURCHASE_ORDER,
                    caps::CHANGE_PURCHASE_ORDER,
                    caps::CONFIRM_PURCHASE_ORDER,
                    caps::RECEIVE_PURCHASE_ORDER,
                    caps::COMPLETE_PURCHASE_ORDER,
                    caps::CANCEL_PURCHASE_ORDER,
                    caps::CREATE_SALE_ORDER,
                    caps::CHANGE_SALE_ORDER,
                    caps::CONFIRM_SALE_ORDER,
                    caps::SHIP_SALE_ORDER,
                    caps::INVOICE_SALE_ORDER,
                    caps::COMPLETE_SALE_ORDER,
                    caps::CANCEL_SALE_ORDER,
                ],
            )
            .grant(
                Role::WAREHOUSE,
                [
                    caps::TRANSACT_STOCK,
                    caps::RECEIVE_PURCHASE_ORDER,
                    caps::SHIP_SALE_ORDER,
                ],
            )
            .grant(
                Role::SALESPERSON,
                [
                    caps::CREATE_SALE_ORDER,
                    caps::CHANGE_SALE_ORDER,
                    caps::CONFIRM_SALE_ORDER,
                    caps::INVOICE_SALE_ORDER,
                ],
            )
    }

    pub fn permissions_for(&self, role: &Role) -> &[Permission] {
        self.grants
            .get(role.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Effective permission names of a principal: role grants plus explicit grants.
pub fn effective_permissions<'a>(
    principal: &'a Principal,
    policy: &'a RolePolicy,
) -> HashSet<&'a str> {
    principal
        .roles
        .iter()
        .flat_map(|role| policy.permissions_for(role).iter())
        .chain(principal.permissions.iter())
        .map(Permission::as_str)
        .collect()
}

/// Authorize a resolved principal against a policy.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(
    principal: &Principal,
    policy: &RolePolicy,
    required: &Permission,
) -> Result<(), AuthzError> {
    let perms = effective_permissions(principal, policy);
    if perms.contains(caps::WILDCARD.as_str()) || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// In-process principal directory backed by a `RolePolicy`.
///
/// Unknown principals are denied everything.
#[derive(Debug, Default)]
pub struct DirectoryAuthorizer {
    policy: RolePolicy,
    principals: RwLock<HashMap<PrincipalId, Principal>>,
}

impl DirectoryAuthorizer {
    pub fn new(policy: RolePolicy) -> Self {
        Self {
            policy,
            principals: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) a principal.
    pub fn register(&self, principal: Principal) {
        if let Ok(mut principals) = self.principals.write() {
            principals.insert(principal.principal_id, principal);
        }
    }

    pub fn check(&self, principal_id: PrincipalId, required: &Permission) -> Result<(), AuthzError> {
        let principals = self
            .principals
            .read()
            .map_err(|_| AuthzError::UnknownPrincipal(principal_id))?;
        let principal = principals
            .get(&principal_id)
            .ok_or(AuthzError::UnknownPrincipal(principal_id))?;
        authorize(principal, &self.policy, required)
    }
}

impl Authorizer for DirectoryAuthorizer {
    fn has_capability(&self, principal: PrincipalId, capability: &Permission) -> bool {
        self.check(principal, capability).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> DirectoryAuthorizer {
        DirectoryAuthorizer::new(RolePolicy::standard())
    }

    #[test]
    fn admin_wildcard_grants_adjust() {
        let authz = directory();
        let admin = Principal::new(PrincipalId::new()).with_role(Role::ADMIN);
        let id = admin.principal_id;
        authz.register(admin);

        assert!(authz.has_capability(id, &caps::ADJUST_STOCK));
        assert!(authz.has_capability(id, &caps::SHIP_SALE_ORDER));
    }

    #[test]
    fn manager_cannot_adjust_but_can_transact() {
        let authz = directory();
        let manager = Principal::new(PrincipalId::new()).with_role(Role::MANAGER);
        let id = manager.principal_id;
        authz.register(manager);

        assert!(authz.has_capability(id, &caps::TRANSACT_STOCK));
        assert_eq!(
            authz.ensure(id, &caps::ADJUST_STOCK),
            Err(DomainError::permission_denied("inventory.adjust_stock"))
        );
    }

    #[test]
    fn explicit_permission_is_honoured_without_role() {
        let authz = directory();
        let clerk = Principal::new(PrincipalId::new()).with_permission(caps::TRANSACT_STOCK);
        let id = clerk.principal_id;
        authz.register(clerk);

        assert!(authz.has_capability(id, &caps::TRANSACT_STOCK));
        assert!(!authz.has_capability(id, &caps::CONFIRM_SALE_ORDER));
    }

    #[test]
    fn unknown_principal_is_denied() {
        let authz = directory();
        let stranger = PrincipalId::new();
        assert_eq!(
            authz.check(stranger, &caps::TRANSACT_STOCK),
            Err(AuthzError::UnknownPrincipal(stranger))
        );
    }
}
