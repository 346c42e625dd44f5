//! `stockroom-auth`: who may move stock and drive orders.
//!
//! Services only ever ask `Authorizer::ensure(principal, capability)`; roles
//! and grants stay inside this crate.

pub mod authorize;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{authorize, AuthzError, Authorizer, DirectoryAuthorizer, RolePolicy};
pub use permissions::{capabilities, Permission};
pub use principal::{Principal, PrincipalId};
pub use roles::Role;
