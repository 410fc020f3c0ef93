//! Connection authentication and user extraction.
//!
//! Two hooks gate every accepted connection:
//!
//! 1. `authenticate` — a predicate over the connect-time metadata;
//! 2. `extract_user` — maps the metadata to the stable [`UserId`] under
//!    which the connection is registered. It may collapse many api_keys onto
//!    one user (account mapping) or be the identity.
//!
//! Both are async so implementations can consult external stores; the
//! default [`ApiKeyIdentity`] never awaits. If `authenticate` returns false
//! or `extract_user` errors, the handshake is rejected before any registry
//! mutation.

use async_trait::async_trait;
use thiserror::Error;

use crate::ids::UserId;
use crate::meta::ConnectMeta;

/// Authentication failure: the handshake is rejected and no connection
/// record is created.
#[derive(Debug, Error)]
#[error("authentication rejected: {reason}")]
pub struct AuthError {
    pub reason: String,
}

impl AuthError {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Pluggable connect-time credential validation and user extraction.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether the presented metadata is acceptable.
    async fn authenticate(&self, meta: &ConnectMeta) -> bool {
        !meta.api_key.is_empty()
    }

    /// Derive the stable user id this connection registers under.
    async fn extract_user(&self, meta: &ConnectMeta) -> Result<UserId, AuthError> {
        if meta.api_key.is_empty() {
            return Err(AuthError::new("cannot derive user id from empty api_key"));
        }
        Ok(UserId::from(meta.api_key.as_str()))
    }
}

/// Default authenticator: any non-empty api_key passes, and the user id is
/// the api_key verbatim.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApiKeyIdentity;

#[async_trait]
impl Authenticator for ApiKeyIdentity {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_accepts_non_empty_key() {
        let auth = ApiKeyIdentity;
        assert!(auth.authenticate(&ConnectMeta::new("kA", "wechat")).await);
    }

    #[tokio::test]
    async fn default_rejects_empty_key() {
        let auth = ApiKeyIdentity;
        assert!(!auth.authenticate(&ConnectMeta::new("", "wechat")).await);
    }

    #[tokio::test]
    async fn default_user_is_api_key_verbatim() {
        let auth = ApiKeyIdentity;
        let user = auth
            .extract_user(&ConnectMeta::from_api_key("kA"))
            .await
            .unwrap();
        assert_eq!(user.as_str(), "kA");
    }

    #[tokio::test]
    async fn extract_from_empty_key_errors() {
        let auth = ApiKeyIdentity;
        let err = auth
            .extract_user(&ConnectMeta::from_api_key(""))
            .await
            .unwrap_err();
        assert!(err.reason.contains("empty api_key"));
    }

    #[tokio::test]
    async fn custom_authenticator_can_collapse_keys() {
        // An account-mapping extractor: strips a per-device suffix.
        struct AccountMap;

        #[async_trait]
        impl Authenticator for AccountMap {
            async fn extract_user(&self, meta: &ConnectMeta) -> Result<UserId, AuthError> {
                let account = meta
                    .api_key
                    .split_once('/')
                    .map_or(meta.api_key.as_str(), |(account, _)| account);
                Ok(UserId::from(account))
            }
        }

        let auth = AccountMap;
        let a = auth
            .extract_user(&ConnectMeta::from_api_key("acct-1/dev-a"))
            .await
            .unwrap();
        let b = auth
            .extract_user(&ConnectMeta::from_api_key("acct-1/dev-b"))
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "acct-1");
    }
}
