//! Per-request TLS, proxy, timeout and socket options.
//!
//! # Design
//! Every option is optional and deserializable, so a whole option set can be
//! loaded from a JSON document. Timeouts are given in seconds, as callers
//! write them, and only turned into milliseconds through [`TimeoutSpec`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::engine::VerifyHost;
use crate::error::{AdapterError, Result};

/// TLS settings for a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SslOptions {
    /// Verify the server hostname. Absent means verify.
    pub verify: Option<bool>,
    pub version: Option<String>,
    pub client_cert_file: Option<PathBuf>,
    pub client_key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
    pub ca_path: Option<PathBuf>,
}

impl SslOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn verify_host(&self) -> VerifyHost {
        VerifyHost::from_verify(self.verify.unwrap_or(true))
    }
}

/// Outbound proxy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyOptions {
    pub uri: Url,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyOptions {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// `host:port` of the proxy, falling back to the scheme's default port.
    pub fn address(&self) -> Result<String> {
        let host = self
            .uri
            .host_str()
            .ok_or_else(|| AdapterError::InvalidOption(format!("proxy URI has no host: {}", self.uri)))?;
        let port = self
            .uri
            .port_or_known_default()
            .ok_or_else(|| AdapterError::InvalidOption(format!("proxy URI has no port: {}", self.uri)))?;
        Ok(format!("{host}:{port}"))
    }

    /// `username:password`, only when both halves are present.
    pub fn credentials(&self) -> Option<String> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(format!("{username}:{password}")),
            _ => None,
        }
    }
}

/// Local socket binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindOptions {
    pub host: String,
}

/// Request-level options: timeouts, proxy and socket binding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// Overall timeout, in seconds.
    pub timeout: Option<f64>,
    /// Connect-phase timeout, in seconds.
    pub open_timeout: Option<f64>,
    pub proxy: Option<ProxyOptions>,
    pub bind: Option<BindOptions>,
}

impl RequestOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn timeouts(&self) -> Result<TimeoutSpec> {
        TimeoutSpec::from_secs(self.timeout, self.open_timeout)
    }
}

/// Overall and connect timeouts, already validated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutSpec {
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl TimeoutSpec {
    pub fn from_secs(timeout: Option<f64>, connect_timeout: Option<f64>) -> Result<Self> {
        Ok(Self {
            timeout: timeout.map(|s| secs_to_duration("timeout", s)).transpose()?,
            connect_timeout: connect_timeout
                .map(|s| secs_to_duration("open_timeout", s))
                .transpose()?,
        })
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout.map(|d| d.as_millis() as u64)
    }

    pub fn connect_timeout_ms(&self) -> Option<u64> {
        self.connect_timeout.map(|d| d.as_millis() as u64)
    }
}

// Rounded in milliseconds so that 0.3s is 300ms, not 299.
fn secs_to_duration(name: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(AdapterError::InvalidOption(format!(
            "{name} must be a non-negative number of seconds, got {secs}"
        )));
    }
    Ok(Duration::from_millis((secs * 1000.0).round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssl_verify_defaults_to_strict() {
        assert_eq!(SslOptions::default().verify_host(), VerifyHost::Strict);
        let ssl = SslOptions {
            verify: Some(false),
            ..SslOptions::default()
        };
        assert_eq!(ssl.verify_host(), VerifyHost::None);
    }

    #[test]
    fn ssl_options_load_from_json() {
        let ssl = SslOptions::from_json(r#"{"verify":true,"ca_file":"/etc/ca.pem"}"#).unwrap();
        assert_eq!(ssl.verify, Some(true));
        assert_eq!(ssl.ca_file, Some(PathBuf::from("/etc/ca.pem")));
        assert!(ssl.version.is_none());
    }

    #[test]
    fn request_options_load_from_json() {
        let options = RequestOptions::from_json(
            r#"{
                "timeout": 5,
                "open_timeout": 1.5,
                "proxy": {"uri": "http://proxy.local:3128", "username": "u"},
                "bind": {"host": "10.0.0.2"}
            }"#,
        )
        .unwrap();
        assert_eq!(options.timeout, Some(5.0));
        let proxy = options.proxy.unwrap();
        assert_eq!(proxy.address().unwrap(), "proxy.local:3128");
        assert_eq!(proxy.credentials(), None);
        assert_eq!(options.bind.unwrap().host, "10.0.0.2");
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = RequestOptions::from_json(r#"{"timeout":"soon"}"#).unwrap_err();
        assert!(matches!(err, AdapterError::Config(_)));
    }

    #[test]
    fn proxy_address_uses_default_port() {
        let proxy = ProxyOptions::new(Url::parse("https://secure.proxy").unwrap());
        assert_eq!(proxy.address().unwrap(), "secure.proxy:443");
    }

    #[test]
    fn proxy_credentials_need_both_halves() {
        let uri = Url::parse("http://p:8080").unwrap();
        let both = ProxyOptions::new(uri.clone()).with_credentials("alice", "s3cret");
        assert_eq!(both.credentials().as_deref(), Some("alice:s3cret"));

        let mut only_password = ProxyOptions::new(uri);
        only_password.password = Some("s3cret".to_string());
        assert_eq!(only_password.credentials(), None);
    }

    #[test]
    fn proxy_without_host_is_rejected() {
        let proxy = ProxyOptions::new(Url::parse("unix:/var/run/proxy.sock").unwrap());
        assert!(matches!(proxy.address(), Err(AdapterError::InvalidOption(_))));
    }

    #[test]
    fn timeouts_convert_to_exact_milliseconds() {
        let spec = TimeoutSpec::from_secs(Some(30.0), Some(0.3)).unwrap();
        assert_eq!(spec.timeout_ms(), Some(30_000));
        assert_eq!(spec.connect_timeout_ms(), Some(300));

        let spec = TimeoutSpec::from_secs(Some(2.5), None).unwrap();
        assert_eq!(spec.timeout_ms(), Some(2_500));
        assert_eq!(spec.connect_timeout_ms(), None);
    }

    #[test]
    fn negative_or_nan_timeouts_are_rejected() {
        assert!(TimeoutSpec::from_secs(Some(-1.0), None).is_err());
        assert!(TimeoutSpec::from_secs(None, Some(f64::NAN)).is_err());
    }
}
