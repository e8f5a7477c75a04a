use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize};

use crate::{db::TenantStore, error::Error};

const MAX_TENANT_LEN: usize = 63;

/// Validated tenant identifier.
///
/// A tenant id names the tenant's database, so it is restricted to ASCII
/// letters, digits, `_` and `-`, at most 63 bytes long.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(s: &str) -> Result<Self, Error> {
        let valid = !s.is_empty()
            && s.len() <= MAX_TENANT_LEN
            && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidTenant(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TenantId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TenantId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Yields an open handle to a tenant's isolated storage.
///
/// The core never constructs connections itself; it only works against the
/// store a resolver hands out.
#[async_trait::async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve(&self, tenant: &TenantId) -> Result<Arc<dyn TenantStore>, Error>;
}
