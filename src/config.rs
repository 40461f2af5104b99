use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::Error;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub check: CheckOptions,
    pub notify: NotifyOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProberKind {
    Http,
    Wget,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CheckOptions {
    pub timeout_secs: u64,
    pub tries: u32,
    pub prober: ProberKind,
    /// 0 means one task per target with no bound.
    pub max_concurrency: usize,
    pub strict_poll_ms: u64,
    /// 0 disables the run deadline.
    pub run_timeout_secs: u64,
    pub lock_suffix: String,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            tries: 3,
            prober: ProberKind::Http,
            max_concurrency: 0,
            strict_poll_ms: 10,
            run_timeout_secs: 0,
            lock_suffix: "_lock".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NotifyOptions {
    pub webhook_url: Option<String>,
    pub discord_id: Option<u64>,
}

impl Config {
    /// Location used when no `--settings` path is given.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sitewatch").join("config.toml"))
    }

    /// Loads settings from `path`, or from the default location when `None`.
    ///
    /// A missing file is not an error and yields the defaults. Notification
    /// settings absent from the file are taken from `WEBHOOK_URL` and
    /// `DISCORD_ID` (a `.env` file is honoured).
    pub fn load(path: Option<&Path>) -> Result<Config, Error> {
        let path = path.map(Path::to_path_buf).or_else(Config::default_path);

        let mut config = match path {
            Some(path) if path.exists() => Config::from_toml(&fs::read_to_string(path)?)?,
            _ => Config::default(),
        };

        if config.notify.webhook_url.is_none() {
            config.notify.webhook_url = env_var("WEBHOOK_URL")?;
        }

        if config.notify.discord_id.is_none() {
            if let Some(id) = env_var("DISCORD_ID")? {
                let id = id
                    .parse()
                    .map_err(|_| Error::Config(format!("DISCORD_ID is not a number: {id}")))?;
                config.notify.discord_id = Some(id);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Config, Error> {
        Ok(toml::from_str(content)?)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.check.tries == 0 {
            return Err(Error::Config("tries must be at least 1".to_string()));
        }
        if self.check.lock_suffix.is_empty() {
            return Err(Error::Config("lock_suffix must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Reads `name` from the environment or `.env`; unset is `None`, unreadable is an error.
fn env_var(name: &str) -> Result<Option<String>, Error> {
    match dotenvy::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(dotenvy::Error::EnvVar(std::env::VarError::NotPresent)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
