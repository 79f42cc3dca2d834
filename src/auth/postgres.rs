//! Member lookup against the platform's `member` table.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::{AuthError, CredentialVerifier, Identity};
use crate::config::DatabaseConfig;

const MEMBER_QUERY: &str =
    "SELECT mem001, mem002, mem004 FROM member WHERE mem002 = $1 AND mem003 = $2 LIMIT 1";

pub struct PgCredentials {
    pool: PgPool,
}

impl PgCredentials {
    /// Create the pool without connecting; the first lookup establishes a connection.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, AuthError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .connect_lazy(&config.url)
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        tracing::info!(
            pool_size = config.pool_size,
            "PostgreSQL credential pool created"
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialVerifier for PgCredentials {
    async fn verify_credentials(
        &self,
        account: &str,
        password: &str,
    ) -> Result<Identity, AuthError> {
        let (id, account, display_name): (i64, String, String) = sqlx::query_as(MEMBER_QUERY)
            .bind(account)
            .bind(password)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if !matches!(e, sqlx::Error::RowNotFound) {
                    tracing::error!(error = %e, "Member lookup failed");
                }
                AuthError::from(e)
            })?;

        Ok(Identity {
            id,
            account,
            display_name,
        })
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
