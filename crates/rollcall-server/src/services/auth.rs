//! Login state backed by the session cache.

use std::sync::Arc;

use rollcall_directory::{AuthProvider, Principal};
use serde::Serialize;

use super::ServiceError;
use crate::cache::SessionCache;

/// Result of a logout. Logout never fails from the caller's point of view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LogoutOutcome {
    /// Set when the remote sign-out failed; the local session is cleared
    /// regardless.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct AuthSession {
    cache: Arc<SessionCache>,
    provider: Arc<dyn AuthProvider>,
}

impl AuthSession {
    pub fn new(cache: Arc<SessionCache>, provider: Arc<dyn AuthProvider>) -> Self {
        Self { cache, provider }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Arc<Principal>, ServiceError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ServiceError::InvalidInput(
                "email and password are required".into(),
            ));
        }
        let principal = self.provider.sign_in(email.trim(), password).await?;
        tracing::info!(principal_id = %principal.id, role = ?principal.role, "signed in");
        Ok(self.cache.set_user(principal))
    }

    /// The signed-in principal, cache first. After a logout the provider
    /// is not consulted until the next login.
    pub async fn current(&self) -> Result<Option<Arc<Principal>>, ServiceError> {
        if let Some(principal) = self.cache.get() {
            return Ok(Some(principal));
        }
        if self.cache.is_signed_out() {
            return Ok(None);
        }
        let principal = self.provider.current_principal().await?;
        // A logout that landed during the lookup wins
        if self.cache.is_signed_out() {
            return Ok(None);
        }
        Ok(principal.map(|p| self.cache.set_user(p)))
    }

    pub async fn logout(&self) -> LogoutOutcome {
        let result = self.provider.sign_out().await;
        self.cache.sign_out();
        match result {
            Ok(()) => LogoutOutcome::default(),
            Err(e) => {
                tracing::warn!(error = %e, "remote sign-out failed, local session cleared");
                LogoutOutcome {
                    warning: Some(format!("remote sign-out failed: {e}")),
                }
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.cache.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_directory::{MemoryAuthProvider, Role};
    use std::time::Duration;

    fn setup() -> (Arc<MemoryAuthProvider>, AuthSession) {
        let provider = Arc::new(MemoryAuthProvider::new());
        provider.add_account(
            "secret",
            Principal {
                id: "u-1".to_string(),
                email: "org@example.com".to_string(),
                display_name: None,
                role: Role::Organizer,
            },
        );
        let cache = Arc::new(SessionCache::new(Duration::from_secs(300)));
        (provider.clone(), AuthSession::new(cache, provider))
    }

    #[tokio::test]
    async fn test_login_populates_session() {
        let (provider, auth) = setup();
        let principal = auth.login("org@example.com", "secret").await.unwrap();
        assert_eq!(principal.id, "u-1");

        let current = auth.current().await.unwrap().unwrap();
        assert_eq!(current.email, "org@example.com");
        assert_eq!(provider.principal_lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let (_, auth) = setup();
        let err = auth.login("org@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, ServiceError::Directory(_)));
        assert!(!auth.is_active());
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_remote_fails() {
        let (provider, auth) = setup();
        auth.login("org@example.com", "secret").await.unwrap();
        provider.set_sign_out_failure(true);

        let outcome = auth.logout().await;
        assert!(outcome.warning.is_some());
        assert!(!auth.is_active());

        // The provider still holds its session; it must not come back
        assert!(auth.current().await.unwrap().is_none());
        assert_eq!(provider.principal_lookup_count(), 0);

        provider.set_sign_out_failure(false);
        let principal = auth.login("org@example.com", "secret").await.unwrap();
        assert_eq!(auth.current().await.unwrap(), Some(principal));
    }

    #[tokio::test]
    async fn test_current_falls_through_once() {
        let (provider, auth) = setup();
        assert!(auth.current().await.unwrap().is_none());
        assert_eq!(provider.principal_lookup_count(), 1);

        auth.login("org@example.com", "secret").await.unwrap();
        auth.logout().await;
        assert!(auth.current().await.unwrap().is_none());
        assert_eq!(provider.principal_lookup_count(), 1);
    }
}
