//! A `ureq`-backed transport engine for `courier-core`.
//!
//! # Overview
//! [`UreqEngine`] hands out [`UreqManager`]s. A manager collects queued
//! requests and, on `run`, executes them concurrently on scoped threads, at
//! most `max_concurrency` at a time, then fires each completion callback on
//! the thread that called `run`. Callbacks may queue more requests on the
//! same manager; `run` keeps draining until nothing is left.
//!
//! # Design
//! - Each request gets its own agent, configured from its `EngineOptions`,
//!   so requests in one batch never share timeouts or proxy settings.
//! - Status codes are data, not errors: 4xx/5xx responses complete normally.
//!   Redirects are not followed; a 3xx response is handed back as is.
//! - Response bodies are read up to `max_body_bytes`, unlimited by default.
//! - Timeouts complete with `timed_out` set. Refused connections are
//!   reported as `EngineErrorKind::ConnectionRefused`; everything else as
//!   `EngineErrorKind::Other` with the `ureq` error as source.
//! - TLS version pinning, client certificates, CA paths and interface
//!   binding are not available through this backend; they are logged and
//!   ignored.

use std::io;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use courier_core::{
    EngineError, EngineOptions, EngineRequest, EngineResponse, ManagerOptions, OnComplete,
    ParallelManager, TransportEngine, VerifyHost,
};
use parking_lot::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Concurrency used when the options do not say otherwise.
pub const DEFAULT_MAX_CONCURRENCY: usize = 200;

/// Manager settings read from [`ManagerOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    pub max_concurrency: usize,
    /// Largest response body accepted; bigger bodies fail the request.
    pub max_body_bytes: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_body_bytes: u64::MAX,
        }
    }
}

impl ManagerConfig {
    /// Read recognised keys from `options`; unknown keys are ignored.
    pub fn from_options(options: &ManagerOptions) -> Self {
        let max_concurrency = options
            .get("max_concurrency")
            .and_then(serde_json::Value::as_u64)
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_CONCURRENCY);
        let max_body_bytes = options
            .get("max_body_bytes")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(u64::MAX);
        Self {
            max_concurrency,
            max_body_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UreqEngine;

impl TransportEngine for UreqEngine {
    fn setup_parallel_manager(&self, options: &ManagerOptions) -> Box<dyn ParallelManager> {
        Box::new(UreqManager::new(ManagerConfig::from_options(options)))
    }
}

pub struct UreqManager {
    config: ManagerConfig,
    pending: Mutex<Vec<(EngineRequest, OnComplete)>>,
}

impl UreqManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Take the next chunk off the queue, holding the lock only to drain.
    fn next_batch(&self) -> Option<(Vec<EngineRequest>, Vec<OnComplete>)> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return None;
        }
        let n = self.config.max_concurrency.min(pending.len());
        let batch = pending.drain(..n).unzip();
        debug!(batch = n, remaining = pending.len(), "running batch");
        Some(batch)
    }

    pub fn config(&self) -> ManagerConfig {
        self.config
    }
}

impl Default for UreqManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl ParallelManager for UreqManager {
    fn queue(&self, request: EngineRequest, on_complete: OnComplete) -> Result<(), EngineError> {
        warn_unsupported(&request.options);
        self.pending.lock().push((request, on_complete));
        Ok(())
    }

    fn run(&self) -> Result<(), EngineError> {
        let limit = self.config.max_body_bytes;
        while let Some((requests, callbacks)) = self.next_batch() {
            let completions: Vec<_> = thread::scope(|scope| {
                let handles: Vec<_> = requests
                    .iter()
                    .map(|request| scope.spawn(move || execute(request, limit)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|_| Err(EngineError::other("request thread panicked")))
                    })
                    .collect()
            });

            for (on_complete, completion) in callbacks.into_iter().zip(completions) {
                on_complete(completion);
            }
        }
        Ok(())
    }

    fn queued(&self) -> usize {
        self.pending.lock().len()
    }
}

fn warn_unsupported(options: &EngineOptions) {
    let ignored = [
        ("sslversion", options.sslversion.is_some()),
        ("sslcert", options.sslcert.is_some()),
        ("sslkey", options.sslkey.is_some()),
        ("cainfo", options.cainfo.is_some()),
        ("capath", options.capath.is_some()),
        ("interface", options.interface.is_some()),
    ];
    for (name, set) in ignored {
        if set {
            warn!(option = name, "option not supported by the ureq engine; ignoring");
        }
    }
}

/// Build an agent honouring the request's timeouts, proxy and verification.
fn agent_for(options: &EngineOptions) -> Result<ureq::Agent, EngineError> {
    let mut config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .max_redirects(0)
        .timeout_global(options.timeout_ms.map(Duration::from_millis))
        .timeout_connect(options.connecttimeout_ms.map(Duration::from_millis));

    if let Some(proxy) = &options.proxy {
        let uri = proxy_uri(proxy, options.proxyuserpwd.as_deref())?;
        let proxy = ureq::Proxy::new(&uri).map_err(EngineError::other)?;
        config = config.proxy(Some(proxy));
    }

    // No hostname-only switch in ureq: this skips chain validation too.
    if options.ssl_verifyhost == VerifyHost::None {
        config = config.tls_config(
            ureq::tls::TlsConfig::builder()
                .disable_verification(true)
                .build(),
        );
    }

    Ok(config.build().new_agent())
}

/// Proxy URI for ureq with `user:pass` percent-encoded into the userinfo.
fn proxy_uri(proxy: &str, credentials: Option<&str>) -> Result<String, EngineError> {
    let mut uri = Url::parse(&format!("http://{proxy}")).map_err(EngineError::other)?;
    if let Some((username, password)) = credentials.and_then(|c| c.split_once(':')) {
        uri.set_username(username)
            .and_then(|()| uri.set_password(Some(password)))
            .map_err(|()| EngineError::other(format!("proxy {proxy} cannot carry credentials")))?;
    }
    Ok(uri.as_str().trim_end_matches('/').to_string())
}

/// Execute one request, failing it when the body exceeds `max_body_bytes`.
pub fn execute(request: &EngineRequest, max_body_bytes: u64) -> Result<EngineResponse, EngineError> {
    let agent = agent_for(&request.options)?;

    let mut builder = ureq::http::Request::builder()
        .method(request.method.as_str())
        .uri(request.url.as_str());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let result = if request.body.is_empty() {
        let http_request = builder.body(()).map_err(EngineError::other)?;
        agent.run(http_request)
    } else {
        let http_request = builder.body(request.body.to_vec()).map_err(EngineError::other)?;
        agent.run(http_request)
    };

    let mut response = match result {
        Ok(response) => response,
        Err(ureq::Error::Timeout(_)) => return Ok(EngineResponse::timed_out()),
        Err(err) => return Err(classify(err)),
    };

    let code = response.status().as_u16();
    let headers = raw_headers(&response);
    let body = match response
        .body_mut()
        .with_config()
        .limit(max_body_bytes)
        .read_to_vec()
    {
        Ok(body) => body,
        Err(ureq::Error::Timeout(_)) => return Ok(EngineResponse::timed_out()),
        Err(err) => return Err(classify(err)),
    };

    Ok(EngineResponse {
        code,
        headers,
        body: Bytes::from(body),
        timed_out: false,
    })
}

fn classify(err: ureq::Error) -> EngineError {
    let refused = match &err {
        ureq::Error::ConnectionFailed => true,
        ureq::Error::Io(io_err) => io_err.kind() == io::ErrorKind::ConnectionRefused,
        _ => false,
    };
    if refused {
        EngineError::connection_refused(err)
    } else {
        EngineError::other(err)
    }
}

/// Render the response head as the raw block the adapter parses.
fn raw_headers<B>(response: &ureq::http::Response<B>) -> String {
    let status = response.status();
    let mut raw = format!(
        "{:?} {} {}\r\n",
        response.version(),
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            raw.push_str(name.as_str());
            raw.push_str(": ");
            raw.push_str(value);
            raw.push_str("\r\n");
        }
    }
    raw.push_str("\r\n");
    raw
}
