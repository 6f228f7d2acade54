use std::{fmt::Display, sync::Arc};

use snafu::Snafu;

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[snafu(display("invalid tenant id {id:?}: {reason}"))]
    InvalidTenantId { id: String, reason: &'static str },
}

pub type ResourceResult<T, E = ResourceError> = std::result::Result<T, E>;

/// The name of a tenant.
///
/// A tenant is the top-level resource in Timber: every stream belongs to
/// exactly one tenant, and tenants are fully isolated from each other.
/// Ids are restricted to characters that are safe to embed in storage keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantName(Arc<str>);

impl TenantName {
    pub fn new(id: impl AsRef<str>) -> ResourceResult<Self> {
        let id = id.as_ref();
        if id.is_empty() {
            return InvalidTenantIdSnafu {
                id,
                reason: "must not be empty",
            }
            .fail();
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return InvalidTenantIdSnafu {
                id,
                reason: "must contain only alphanumeric characters, '-', '_' or '.'",
            }
            .fail();
        }

        Ok(Self(id.into()))
    }

    /// Create a tenant name without validating the id.
    pub fn new_unchecked(id: &str) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl Display for TenantName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
