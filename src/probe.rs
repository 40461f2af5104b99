//! Liveness probes.
//!
//! A probe never fails: anything that keeps it from reaching the target is
//! reported as unreachable, except for the redirect case described on
//! [`UNFOLLOWED_REDIRECT_EXIT`].

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use std::{process::Stdio, time::Duration};
use tokio::{process::Command, time::Instant};
use url::Url;

use crate::error::Error;
use crate::record::ProbeOutcome;

/// wget exit status for a redirect it will not follow without extra flags,
/// typically an http site forwarding to https. The target answered, so it
/// counts as up.
pub const UNFOLLOWED_REDIRECT_EXIT: i32 = 6;

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &str, timeout: Duration, tries: u32) -> ProbeOutcome;
}

/// Probes with HTTP GET requests.
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            client: Client::builder().build()?,
        })
    }

    async fn probe_once(&self, url: &Url, timeout: Duration) -> bool {
        match self.client.get(url.clone()).timeout(timeout).send().await {
            Ok(resp) => resp.status().is_success() || resp.status().is_redirection(),
            // A redirect the client refused to follow still means the site answered
            Err(e) if e.is_redirect() => true,
            Err(e) => {
                debug!("{url}: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &str, timeout: Duration, tries: u32) -> ProbeOutcome {
        let start = Instant::now();

        let url = match normalize_target(target) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot probe {target}: {e}");
                return ProbeOutcome::unreachable(start.elapsed());
            }
        };

        for attempt in 1..=tries.max(1) {
            if self.probe_once(&url, timeout).await {
                return ProbeOutcome::reachable(start.elapsed());
            }
            debug!("{target}: attempt {attempt}/{tries} failed");
        }

        ProbeOutcome::unreachable(start.elapsed())
    }
}

/// Parses `target` as a URL, assuming `http://` when no scheme is given.
pub fn normalize_target(target: &str) -> Result<Url, Error> {
    let url = if target.contains("://") {
        Url::parse(target)?
    } else {
        Url::parse(&format!("http://{target}"))?
    };

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Config(format!("unsupported scheme {other} in {target}"))),
    }
}

/// Probes by running `wget --spider`.
#[derive(Debug, Clone)]
pub struct WgetProber {
    program: String,
}

impl Default for WgetProber {
    fn default() -> Self {
        Self {
            program: "wget".to_string(),
        }
    }
}

impl WgetProber {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Prober for WgetProber {
    async fn probe(&self, target: &str, timeout: Duration, tries: u32) -> ProbeOutcome {
        let start = Instant::now();

        let status = Command::new(&self.program)
            .arg("--quiet")
            .arg(format!("--timeout={}", timeout.as_secs().max(1)))
            .arg(format!("--tries={}", tries.max(1)))
            .arg("--spider")
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        let reachable = match status {
            Ok(status) => is_reachable_exit(status.code()),
            Err(e) => {
                warn!("Could not run {} for {target}: {e}", self.program);
                false
            }
        };

        ProbeOutcome {
            reachable,
            elapsed: start.elapsed(),
        }
    }
}

/// Maps a wget exit status to a verdict. `None` means killed by a signal.
pub fn is_reachable_exit(code: Option<i32>) -> bool {
    matches!(code, Some(0 | UNFOLLOWED_REDIRECT_EXIT))
}
