//! Runtime configuration.
//!
//! Sources, lowest precedence first: compiled defaults, `config.toml` in the
//! working directory, then `RALLY_*` environment variables (`__` separates
//! nested keys, e.g. `RALLY_X__CLIENT_ID`).

use crate::error::RallyError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Settings key holding the default inter-account delay, in seconds.
pub const BROADCAST_DELAY_KEY: &str = "broadcast_delay_sec";

/// Fallback inter-account delay when neither an override nor a setting applies.
pub const DEFAULT_BROADCAST_DELAY_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub base_url: Url,
    pub database_url: String,
    pub loglevel: String,
    pub session_secret: String,
    pub secure_cookie: bool,
    pub proxy: Option<Url>,
    pub x: XConfig,
    pub broadcast: BroadcastConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<Url>,
    pub scopes: String,
    pub auth_url: Url,
    pub token_url: Url,
    pub api_base: Url,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub step_delay_secs: u64,
    pub default_delay_secs: u64,
    pub actions_per_minute: u32,
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            base_url: Url::parse("http://localhost:3000").expect("static url"),
            database_url: "sqlite:xrally.db".to_string(),
            loglevel: "info".to_string(),
            session_secret: String::new(),
            secure_cookie: false,
            proxy: None,
            x: XConfig::default(),
            broadcast: BroadcastConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for XConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            redirect_uri: None,
            scopes: "tweet.read tweet.write users.read offline.access".to_string(),
            auth_url: Url::parse("https://twitter.com/i/oauth2/authorize").expect("static url"),
            token_url: Url::parse("https://api.twitter.com/2/oauth2/token").expect("static url"),
            api_base: Url::parse("https://api.twitter.com").expect("static url"),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            step_delay_secs: 3,
            default_delay_secs: DEFAULT_BROADCAST_DELAY_SECS,
            actions_per_minute: 50,
            event_capacity: 256,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            timeout_secs: 20,
        }
    }
}

impl Config {
    /// Load and validate the layered configuration.
    pub fn load() -> Result<Self, RallyError> {
        let cfg: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("RALLY_").split("__"))
            .extract()
            .map_err(|e| RallyError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), RallyError> {
        if self.x.client_id.trim().is_empty() {
            return Err(RallyError::Config(
                "missing X client id (set RALLY_X__CLIENT_ID)".to_string(),
            ));
        }
        Ok(())
    }

    /// Callback URL registered with X; defaults to `<base_url>/callback`.
    pub fn redirect_uri(&self) -> Result<Url, RallyError> {
        match &self.x.redirect_uri {
            Some(uri) => Ok(uri.clone()),
            None => Ok(self.base_url.join("/callback")?),
        }
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_secs(self.broadcast.step_delay_secs)
    }
}
