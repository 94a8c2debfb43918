use axum::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::BillingError;

/// key: identity -> tenant/role context from the upstream auth collaborator
///
/// Authentication and role resolution happen outside this core; the auth
/// proxy in front of it places the resolved identity into request headers.
/// This extractor only re-surfaces its decisions.
pub struct TenantContext {
    pub tenant_id: String,
    pub uid: String,
    pub roles: Vec<String>,
}

impl TenantContext {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|candidate| candidate == role)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = BillingError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let tenant_id = header("x-tenant-id").ok_or(BillingError::Unauthorized)?;
        let uid = header("x-user-id").ok_or(BillingError::Unauthorized)?;
        let roles = header("x-user-roles")
            .map(|raw| {
                raw.split(',')
                    .map(|role| role.trim().to_string())
                    .filter(|role| !role.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Ok(TenantContext {
            tenant_id,
            uid,
            roles,
        })
    }
}
