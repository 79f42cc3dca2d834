use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Landing page served at `/home`; the bundled test client is used when unset
    #[serde(default)]
    pub home_page: Option<String>,
}

/// Per-connection transport timing and limits
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Time allowed to read the next pong (or any frame) from the peer
    #[serde(default = "default_pong_wait")]
    pub pong_wait_secs: u64,
    /// Time allowed to write a control frame to the peer
    #[serde(default = "default_write_wait")]
    pub write_wait_secs: u64,
    /// Period of the application-level keepalive envelope (protocol 999)
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    /// Maximum inbound frame size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Outbound mailbox bound per connection
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_room_capacity")]
    pub room_capacity: usize,
    /// Upper bound on how long shutdown waits for connection loops to exit
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// "memory" or "postgres"
    #[serde(default = "default_auth_backend")]
    pub backend: String,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// A member account known to the in-memory credential backend
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub id: i64,
    pub account: String,
    pub password: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiConfig {
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_pong_wait() -> u64 {
    60
}

fn default_write_wait() -> u64 {
    10
}

fn default_keepalive_interval() -> u64 {
    6
}

fn default_max_message_size() -> usize {
    512
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_max_connections() -> usize {
    100_000
}

fn default_room_capacity() -> usize {
    1000
}

fn default_drain_timeout() -> u64 {
    10
}

fn default_auth_backend() -> String {
    "memory".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("websocket.pong_wait_secs", 60)?
            .set_default("websocket.write_wait_secs", 10)?
            .set_default("websocket.keepalive_interval_secs", 6)?
            .set_default("hub.max_connections", 100_000)?
            .set_default("hub.room_capacity", 1000)?
            .set_default("auth.backend", "memory")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, HUB__MAX_CONNECTIONS, AUTH__DATABASE__URL, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.websocket.pong_wait_secs == 0 {
            return Err(ConfigError::Message(
                "websocket.pong_wait_secs must be greater than zero".into(),
            ));
        }
        if self.websocket.write_wait_secs == 0 {
            return Err(ConfigError::Message(
                "websocket.write_wait_secs must be greater than zero".into(),
            ));
        }
        if self.websocket.keepalive_interval_secs == 0 {
            return Err(ConfigError::Message(
                "websocket.keepalive_interval_secs must be greater than zero".into(),
            ));
        }
        if self.websocket.mailbox_capacity == 0 {
            return Err(ConfigError::Message(
                "websocket.mailbox_capacity must be greater than zero".into(),
            ));
        }
        if self.hub.max_connections == 0 || self.hub.room_capacity == 0 {
            return Err(ConfigError::Message(
                "hub capacities must be greater than zero".into(),
            ));
        }
        if self.auth.backend == "postgres" && self.auth.database.url.is_empty() {
            return Err(ConfigError::Message(
                "auth.database.url is required for the postgres backend".into(),
            ));
        }
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebSocketConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    /// Pings go out at 9/10 of the pong wait so at least one lands in every window
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            websocket: WebSocketConfig::default(),
            hub: HubConfig::default(),
            auth: AuthConfig::default(),
            api: ApiConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            home_page: None,
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            pong_wait_secs: default_pong_wait(),
            write_wait_secs: default_write_wait(),
            keepalive_interval_secs: default_keepalive_interval(),
            max_message_size: default_max_message_size(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            room_capacity: default_room_capacity(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            backend: default_auth_backend(),
            accounts: vec![],
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}
