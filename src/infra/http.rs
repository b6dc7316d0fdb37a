//! Shared HTTP client construction.
//!
//! The timestamp client and the external revocation checks all go through
//! here so that one timeout and one proxy policy govern every request made
//! during an operation.

use crate::infra::error::{SignError, SignResult};
use std::time::Duration;

/// Default per-request timeout applied when the caller does not set one.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings shared by every outbound request of one operation.
#[derive(Debug, Clone, Default)]
pub struct HttpSettings {
    /// Per-request timeout; `None` means [`DEFAULT_HTTP_TIMEOUT`].
    pub timeout: Option<Duration>,
    /// Explicit proxy URL. When unset, reqwest honours `HTTP_PROXY` /
    /// `HTTPS_PROXY` from the environment.
    pub proxy_url: Option<String>,
}

impl HttpSettings {
    pub fn effective_timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT)
    }

    /// Build a client with this policy applied.
    pub fn build_client(&self) -> SignResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder().timeout(self.effective_timeout());
        if let Some(url) = &self.proxy_url {
            let proxy = reqwest::Proxy::all(url.as_str())
                .map_err(|e| SignError::ConfigError(format!("invalid proxy URL {url}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        Ok(builder.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_applies() {
        let settings = HttpSettings::default();
        assert_eq!(settings.effective_timeout(), DEFAULT_HTTP_TIMEOUT);

        let settings = HttpSettings {
            timeout: Some(Duration::from_secs(3)),
            proxy_url: None,
        };
        assert_eq!(settings.effective_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn invalid_proxy_is_a_config_error() {
        let settings = HttpSettings {
            timeout: None,
            proxy_url: Some("::not a url::".to_string()),
        };
        assert!(matches!(
            settings.build_client(),
            Err(SignError::ConfigError(_))
        ));
    }
}
