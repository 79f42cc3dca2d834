use std::collections::HashMap;

use async_trait::async_trait;

use super::{AuthError, CredentialVerifier, Identity};
use crate::config::AccountConfig;

/// Accounts held in memory, loaded from configuration
pub struct StaticCredentials {
    accounts: HashMap<String, AccountConfig>,
}

impl StaticCredentials {
    pub fn from_config(accounts: &[AccountConfig]) -> Self {
        Self {
            accounts: accounts
                .iter()
                .map(|a| (a.account.clone(), a.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl CredentialVerifier for StaticCredentials {
    async fn verify_credentials(
        &self,
        account: &str,
        password: &str,
    ) -> Result<Identity, AuthError> {
        match self.accounts.get(account) {
            Some(entry) if entry.password == password => Ok(Identity {
                id: entry.id,
                account: entry.account.clone(),
                display_name: entry.display_name.clone(),
            }),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> AccountConfig {
        AccountConfig {
            id: 7,
            account: "alice".to_string(),
            password: "secret".to_string(),
            display_name: "Alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_known_account_resolves_identity() {
        let creds = StaticCredentials::from_config(&[alice()]);
        let identity = creds.verify_credentials("alice", "secret").await.unwrap();
        assert_eq!(identity.id, 7);
        assert_eq!(identity.account, "alice");
        assert_eq!(identity.display_name, "Alice");
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let creds = StaticCredentials::from_config(&[alice()]);
        let err = creds.verify_credentials("alice", "nope").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_unknown_account_rejected() {
        let creds = StaticCredentials::from_config(&[alice()]);
        assert!(creds.verify_credentials("bob", "secret").await.is_err());
        assert_eq!(creds.len(), 1);
    }
}
