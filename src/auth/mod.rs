//! Credential verification consumed by the session handshake.
//!
//! The hub never owns member data; it asks a [`CredentialVerifier`] whether an
//! account/password pair is valid and receives the member's identity back.

mod memory;
mod postgres;
mod session;

pub use memory::StaticCredentials;
pub use postgres::PgCredentials;
pub use session::generate_session_token;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::AuthConfig;

/// Authenticated member attached to a connection after a successful handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: i64,
    pub account: String,
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid account or password")]
    InvalidCredentials,

    #[error("credential backend unavailable: {0}")]
    Unavailable(String),

    #[error("unknown credential backend: {0}")]
    UnknownBackend(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AuthError::InvalidCredentials,
            other => AuthError::Unavailable(other.to_string()),
        }
    }
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Resolve an account/password pair to a member identity
    async fn verify_credentials(&self, account: &str, password: &str)
        -> Result<Identity, AuthError>;

    fn backend_name(&self) -> &'static str;
}

/// Build the configured credential backend
pub fn create_verifier(config: &AuthConfig) -> Result<Arc<dyn CredentialVerifier>, AuthError> {
    match config.backend.as_str() {
        "memory" => {
            tracing::info!(
                accounts = config.accounts.len(),
                "Using in-memory credential backend"
            );
            Ok(Arc::new(StaticCredentials::from_config(&config.accounts)))
        }
        "postgres" => {
            tracing::info!("Using PostgreSQL credential backend");
            Ok(Arc::new(PgCredentials::connect_lazy(&config.database)?))
        }
        other => Err(AuthError::UnknownBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_memory_verifier() {
        let config = AuthConfig::default();
        let verifier = create_verifier(&config).unwrap();
        assert_eq!(verifier.backend_name(), "memory");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let config = AuthConfig {
            backend: "ldap".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            create_verifier(&config),
            Err(AuthError::UnknownBackend(name)) if name == "ldap"
        ));
    }

    #[test]
    fn test_row_not_found_is_invalid_credentials() {
        let err = AuthError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, AuthError::InvalidCredentials));

        let err = AuthError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, AuthError::Unavailable(_)));
    }
}
