//! Readiness polling for the server under test

use crate::{Result, RuntimeError};
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Outcome of waiting for the server to come up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The liveness endpoint answered and the settle delay has passed
    Ready,
    /// The process exited before it ever answered
    Died { code: Option<i32> },
    /// The startup timeout elapsed
    TimedOut,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Ready => write!(f, "ready"),
            Readiness::Died { code: Some(code) } => write!(f, "died (exit code {})", code),
            Readiness::Died { code: None } => write!(f, "died (killed by signal)"),
            Readiness::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Single-shot liveness check against `GET {base_url}{path}`
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: Client,
    url: String,
}

impl HealthProbe {
    /// Create a probe; each check gives up after `timeout`
    pub fn new(base_url: &str, path: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            RuntimeError::HealthCheck(format!("Failed to create HTTP client: {}", e))
        })?;
        Ok(Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), path),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// True when the endpoint answers 200
    pub async fn check(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Liveness poll of {} failed: {}", self.url, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let probe =
            HealthProbe::new("http://127.0.0.1:8000/", "/v1/models", Duration::from_secs(2))
                .unwrap();
        assert_eq!(probe.url(), "http://127.0.0.1:8000/v1/models");
    }

    #[tokio::test]
    async fn test_check_fails_without_server() {
        // Port 9 (discard) is not expected to run an HTTP server
        let probe =
            HealthProbe::new("http://127.0.0.1:9", "/v1/models", Duration::from_millis(200))
                .unwrap();
        assert!(!probe.check().await);
    }

    #[test]
    fn test_readiness_display() {
        assert_eq!(Readiness::Died { code: Some(1) }.to_string(), "died (exit code 1)");
        assert!(Readiness::Ready.is_ready());
        assert!(!Readiness::TimedOut.is_ready());
    }
}
