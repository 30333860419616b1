//! Permission tags carried in access tokens and declared by routes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const MEMBER: &str = "member";
pub const ADMIN: &str = "admin";
pub const RESET_CREDENTIALS: &str = "reset_credentials";
pub const PARTICIPATE_EVENT: &str = "participate_event";

/// A set of opaque capability tags.
///
/// Serialized as a JSON array so it travels inside token claims unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(permission: &str) -> Self {
        Self::from_iter([permission])
    }

    pub fn insert(&mut self, permission: impl Into<String>) {
        self.0.insert(permission.into());
    }

    pub fn contains(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }

    /// True when at least one tag is shared.
    pub fn intersects(&self, other: &PermissionSet) -> bool {
        self.0.iter().any(|p| other.0.contains(p))
    }

    pub fn is_superset(&self, other: &PermissionSet) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<'a> FromIterator<&'a str> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(str::to_string).collect())
    }
}

impl FromIterator<String> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
