// ============================
// supportchat-backend-lib/src/config.rs
// ============================
//! Configuration management.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "supportchat.toml";
/// Prefix of environment overrides, nested keys are split on `__`
pub const ENV_PREFIX: &str = "SUPPORTCHAT_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Log level
    pub log_level: String,
    /// Emit logs as JSON lines
    pub log_json: bool,
    pub session: SessionSettings,
    pub rpc: RpcSettings,
    pub storage: StorageSettings,
    pub cors: CorsSettings,
}

/// Session cookie and token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Base64 encoded Ed25519 signing key; an ephemeral key is used when absent or invalid
    pub secret: Option<String>,
    /// Token validity window in seconds
    pub ttl_secs: u64,
    pub cookie_name: String,
    /// Unsigned marker cookie granting the support capability
    pub support_cookie_name: String,
    pub cookie_path: String,
    pub same_site: SameSite,
    /// Force the `Secure` attribute on or off; detected from the request when unset
    pub secure: Option<bool>,
}

/// `SameSite` policies allowed for the session cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Lax,
    Strict,
}

impl From<SameSite> for cookie::SameSite {
    fn from(policy: SameSite) -> Self {
        match policy {
            SameSite::Lax => cookie::SameSite::Lax,
            SameSite::Strict => cookie::SameSite::Strict,
        }
    }
}

/// RPC transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Deadline for a single call, store access included
    pub call_timeout_secs: u64,
    /// Deadline for the WebSocket upgrade handshake
    pub handshake_timeout_secs: u64,
    /// Frames queued per connection before writers wait
    pub outbound_buffer: usize,
    /// Calls a single connection may have running before reads pause
    pub max_in_flight: usize,
    /// Largest accepted inbound frame
    pub max_message_bytes: usize,
    /// Serve the legacy plain-HTTP endpoint
    pub enable_http: bool,
    /// Serve the operator endpoint that hands out the support cookie
    pub support_endpoint: bool,
}

/// Which store backs rooms and messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageSettings {
    Memory,
    Sqlite { path: PathBuf },
}

/// Cross-origin settings for browser clients
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsSettings {
    /// Origins allowed to send credentialed requests; CORS is off when empty
    pub allowed_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3009)),
            log_level: "info".to_string(),
            log_json: false,
            session: SessionSettings::default(),
            rpc: RpcSettings::default(),
            storage: StorageSettings::Memory,
            cors: CorsSettings::default(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            secret: None,
            ttl_secs: 2 * 60 * 60, // 2 hours
            cookie_name: "chat_session".to_string(),
            support_cookie_name: "chat_support".to_string(),
            cookie_path: "/chat".to_string(),
            same_site: SameSite::Lax,
            secure: None,
        }
    }
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: 10,
            handshake_timeout_secs: 10,
            outbound_buffer: 64,
            max_in_flight: 32,
            max_message_bytes: 1024 * 1024,
            enable_http: true,
            support_endpoint: true,
        }
    }
}

impl Settings {
    /// Load settings from `supportchat.toml` (if present) and the environment
    pub fn load() -> Result<Self, AppError> {
        Self::from_figment(Self::figment(Path::new(DEFAULT_CONFIG_FILE)))
    }

    /// Load settings from an explicit file, environment overrides still apply
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AppError::Config(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        Self::from_figment(Self::figment(path))
    }

    /// Layered sources: defaults, then the TOML file, then `SUPPORTCHAT_*` variables
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn from_figment(figment: Figment) -> Result<Self, AppError> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), AppError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "invalid log level {:?}, expected one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        if self.session.ttl_secs == 0 {
            return Err(AppError::Config("session.ttl_secs must be positive".into()));
        }
        for (key, name) in [
            ("session.cookie_name", &self.session.cookie_name),
            ("session.support_cookie_name", &self.session.support_cookie_name),
        ] {
            if !is_cookie_token(name) {
                return Err(AppError::Config(format!("{key} {name:?} is not a valid cookie name")));
            }
        }
        if self.session.cookie_name == self.session.support_cookie_name {
            return Err(AppError::Config(
                "session and support cookies must use different names".into(),
            ));
        }
        if !self.session.cookie_path.starts_with('/')
            || self.session.cookie_path.contains(&[';', ' ', '\t'][..])
        {
            return Err(AppError::Config(format!(
                "session.cookie_path {:?} must be an absolute path",
                self.session.cookie_path
            )));
        }

        if self.rpc.call_timeout_secs == 0 || self.rpc.handshake_timeout_secs == 0 {
            return Err(AppError::Config("rpc timeouts must be positive".into()));
        }
        if self.rpc.outbound_buffer == 0 {
            return Err(AppError::Config("rpc.outbound_buffer must be positive".into()));
        }
        if self.rpc.max_in_flight == 0 {
            return Err(AppError::Config("rpc.max_in_flight must be positive".into()));
        }
        if self.rpc.max_message_bytes < 1024 {
            return Err(AppError::Config("rpc.max_message_bytes must be at least 1024".into()));
        }

        if let StorageSettings::Sqlite { path } = &self.storage {
            if path.as_os_str().is_empty() {
                return Err(AppError::Config("storage.path must not be empty".into()));
            }
        }

        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.ttl_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.call_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.handshake_timeout_secs)
    }
}

fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
