//! Identity policy: `none` (open, everyone is admin) or `static` (bearer
//! tokens, a global admin key plus per-tenant keys).

use crate::config::AuthConfig;
use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub tenant: Option<String>,
    pub is_admin: bool,
}

/// Resolve a bearer token (if any) into an [`AuthContext`] per `auth.mode`.
pub fn authenticate(auth: &AuthConfig, bearer_token: Option<&str>) -> Result<AuthContext, ServiceError> {
    match auth.mode.to_lowercase().as_str() {
        "none" => Ok(AuthContext { tenant: auth.default_access_tenant.clone(), is_admin: true }),
        "static" => {
            let token = bearer_token
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| ServiceError::new("auth_invalid", "missing or invalid authorization header"))?;

            if let Some(global) = &auth.global_key {
                if token == global {
                    return Ok(AuthContext { tenant: auth.default_access_tenant.clone(), is_admin: true });
                }
            }
            for (tenant, expected) in &auth.api_keys {
                if token == expected {
                    return Ok(AuthContext { tenant: Some(tenant.clone()), is_admin: false });
                }
            }
            Err(ServiceError::new("auth_forbidden", "forbidden"))
        }
        other => Err(ServiceError::new("auth_invalid", format!("unknown auth mode: {other}"))),
    }
}

/// Require that `ctx` is either an admin or scoped to `tenant`.
pub fn authorize_tenant(ctx: &AuthContext, tenant: &str) -> Result<(), ServiceError> {
    if ctx.is_admin || ctx.tenant.as_deref() == Some(tenant) {
        return Ok(());
    }
    Err(ServiceError::new("auth_forbidden", "forbidden (tenant mismatch)"))
}

/// Require that `ctx` is an admin.
pub fn require_admin(ctx: &AuthContext) -> Result<(), ServiceError> {
    if ctx.is_admin {
        return Ok(());
    }
    Err(ServiceError::new("admin_required", "admin access required"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn static_auth() -> AuthConfig {
        let mut api_keys = BTreeMap::new();
        api_keys.insert("acme".to_string(), "acme-key".to_string());
        AuthConfig { mode: "static".to_string(), global_key: Some("admin-key".to_string()), api_keys, default_access_tenant: None, tenants_file: None }
    }

    #[test]
    fn none_mode_is_open_admin() {
        let auth = AuthConfig::default();
        let ctx = authenticate(&auth, None).unwrap();
        assert!(ctx.is_admin);
    }

    #[test]
    fn static_mode_requires_token() {
        let auth = static_auth();
        let err = authenticate(&auth, None).unwrap_err();
        assert_eq!(err.code, "auth_invalid");
    }

    #[test]
    fn static_mode_global_key_is_admin() {
        let auth = static_auth();
        let ctx = authenticate(&auth, Some("admin-key")).unwrap();
        assert!(ctx.is_admin);
    }

    #[test]
    fn static_mode_tenant_key_scopes_tenant() {
        let auth = static_auth();
        let ctx = authenticate(&auth, Some("acme-key")).unwrap();
        assert!(!ctx.is_admin);
        assert_eq!(ctx.tenant.as_deref(), Some("acme"));
    }

    #[test]
    fn unknown_token_is_forbidden() {
        let auth = static_auth();
        let err = authenticate(&auth, Some("bogus")).unwrap_err();
        assert_eq!(err.code, "auth_forbidden");
    }

    #[test]
    fn authorize_tenant_rejects_mismatch() {
        let ctx = AuthContext { tenant: Some("acme".to_string()), is_admin: false };
        assert!(authorize_tenant(&ctx, "acme").is_ok());
        assert!(authorize_tenant(&ctx, "other").is_err());
    }
}
