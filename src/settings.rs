use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct Telegram {
    pub token: String,
    pub channel_link: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_poll_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub postgres: Postgres,
    pub telegram: Telegram,
}

impl Settings {
    /// Loads `config.toml`, then environment overrides such as
    /// `REFBOT__TELEGRAM__TOKEN` (a `.env` file is honored when present).
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config.toml").required(false))
            .add_source(Environment::with_prefix("REFBOT").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
