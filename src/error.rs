use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Environment variable fetching error: {0}")]
    EnvVar(#[from] dotenvy::Error),
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
    #[error("Notification error: {0}")]
    Notify(String),
    #[error("No targets given, use --url or --known")]
    NoTargets,
}

/// Failures acquiring the run lock over a record store.
#[derive(Error, Debug)]
pub enum LockError {
    #[error("store is locked by running process {0}")]
    HeldByOther(u32),
    #[error("lock file {} is corrupt ({contents:?}), remove it manually", path.display())]
    Corrupt { path: PathBuf, contents: String },
    #[error("lock file I/O error: {0}")]
    Io(#[from] std::io::Error),
}
