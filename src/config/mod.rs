mod settings;

pub use settings::{
    AccountConfig, ApiConfig, AuthConfig, DatabaseConfig, HubConfig, LogConfig, ServerConfig,
    Settings, WebSocketConfig,
};
