//! Role & Capability Mapping
//!
//! Pure functions from the host platform's access level to an internal
//! [`AppRole`] and the [`CapabilitySet`] the UI and route layer consume.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Access level reported by the host platform for a user in a company
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostAccessLevel {
    Admin,
    Customer,
    NoAccess,
}

impl HostAccessLevel {
    /// Parse a raw access level. Unknown values collapse to `NoAccess`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "customer" => Self::Customer,
            _ => Self::NoAccess,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Customer => "customer",
            Self::NoAccess => "no_access",
        }
    }
}

impl From<&str> for HostAccessLevel {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// Internal application role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppRole {
    /// Company owner; shown as "creator" in the UI
    Admin,
    Member,
    Guest,
}

impl AppRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Guest => "guest",
        }
    }

    /// Product-facing label
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Admin => "creator",
            Self::Member => "member",
            Self::Guest => "guest",
        }
    }

    pub fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::for_role(*self)
    }
}

impl fmt::Display for AppRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a role may see and do. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySet {
    pub can_create_challenges: bool,
    pub can_view_admin: bool,
    pub can_view_my_feed: bool,
    pub can_view_discover: bool,
}

impl CapabilitySet {
    pub const fn for_role(role: AppRole) -> Self {
        match role {
            AppRole::Admin => Self {
                can_create_challenges: true,
                can_view_admin: true,
                can_view_my_feed: true,
                can_view_discover: true,
            },
            AppRole::Member => Self {
                can_create_challenges: false,
                can_view_admin: false,
                can_view_my_feed: true,
                can_view_discover: true,
            },
            AppRole::Guest => Self {
                can_create_challenges: false,
                can_view_admin: false,
                can_view_my_feed: false,
                can_view_discover: true,
            },
        }
    }
}

/// Map a host access level to an application role
pub fn map_access_to_app_role(level: HostAccessLevel) -> AppRole {
    match level {
        HostAccessLevel::Admin => AppRole::Admin,
        HostAccessLevel::Customer => AppRole::Member,
        HostAccessLevel::NoAccess => AppRole::Guest,
    }
}

/// Derive the role from the live request context.
///
/// An explicit access level always wins. Without one, a caller that arrives
/// with a company id is that company's creator and anyone else is a member.
pub fn derive_role(level: Option<HostAccessLevel>, external_company_id: Option<&str>) -> AppRole {
    match level {
        Some(level) => map_access_to_app_role(level),
        None if external_company_id.is_some_and(|c| !c.is_empty()) => AppRole::Admin,
        None => AppRole::Member,
    }
}

pub fn is_admin_role(role: AppRole) -> bool {
    role == AppRole::Admin
}

pub fn is_member_role(role: AppRole) -> bool {
    matches!(role, AppRole::Admin | AppRole::Member)
}
