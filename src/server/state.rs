use std::sync::Arc;
use std::time::Instant;

use crate::auth::{create_verifier, AuthError, CredentialVerifier};
use crate::config::Settings;
use crate::hub::{Hub, HubLimits};
use crate::websocket::SessionConfig;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub hub: Arc<Hub>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub session_config: SessionConfig,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self, AuthError> {
        let verifier = create_verifier(&settings.auth)?;
        Ok(Self::with_verifier(settings, verifier))
    }

    /// Build the state around an already constructed credential backend
    pub fn with_verifier(settings: Settings, verifier: Arc<dyn CredentialVerifier>) -> Self {
        let session_config = SessionConfig::from(&settings.websocket);
        let hub = Hub::new(HubLimits::from_config(
            &settings.hub,
            settings.websocket.mailbox_capacity,
        ));

        Self {
            settings: Arc::new(settings),
            hub,
            verifier,
            session_config,
            start_time: Instant::now(),
        }
    }
}
