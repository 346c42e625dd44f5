use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Named bundle of capabilities; `RolePolicy` decides what each one grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    pub const MANAGER: Role = Role(Cow::Borrowed("manager"));
    pub const WAREHOUSE: Role = Role(Cow::Borrowed("warehouse"));
    pub const SALESPERSON: Role = Role(Cow::Borrowed("salesperson"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
