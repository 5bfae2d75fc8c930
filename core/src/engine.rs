//! The transport-engine boundary.
//!
//! # Design
//! The adapter never performs I/O. It builds an [`EngineRequest`], queues it on
//! a [`ParallelManager`] together with a single completion callback, and lets
//! the engine decide how and when to execute it. Engines are plugged in by
//! implementing [`TransportEngine`], whose only job is to hand out managers.
//!
//! A completion is `Ok(EngineResponse)` for anything the engine finished,
//! timeouts included (`timed_out` is set), or `Err(EngineError)` when the
//! request never produced a response.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use crate::http::HttpMethod;

/// Boxed error produced inside an engine.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Library-specific tuning options passed to the manager factory.
pub type ManagerOptions = serde_json::Map<String, serde_json::Value>;

/// What an engine reports when it finishes a queued request.
pub type Completion = std::result::Result<EngineResponse, EngineError>;

/// Callback fired exactly once per queued request.
pub type OnComplete = Box<dyn FnOnce(Completion) + Send + 'static>;

/// A manager shared between the caller and any number of adapter calls.
pub type SharedManager = Arc<dyn ParallelManager>;

/// Wrap a manager so it can be placed on request environments.
pub fn shared_manager<M: ParallelManager + 'static>(manager: M) -> SharedManager {
    Arc::new(manager)
}

/// A source of parallel managers.
pub trait TransportEngine: Send + Sync {
    /// Build a fresh manager configured with `options`.
    fn setup_parallel_manager(&self, options: &ManagerOptions) -> Box<dyn ParallelManager>;
}

/// A batch of queued requests executed together.
///
/// Managers synchronize themselves. Completion callbacks may queue further
/// requests on the manager that is running them, so an implementation must
/// not hold its own locks while a callback runs.
pub trait ParallelManager: Send + Sync {
    /// Queue a request. Nothing runs until [`run`](Self::run) is called.
    fn queue(&self, request: EngineRequest, on_complete: OnComplete) -> Result<(), EngineError>;

    /// Execute every queued request, firing each callback, and block until
    /// the queue is empty, including requests queued by those callbacks.
    fn run(&self) -> Result<(), EngineError>;

    /// Number of requests queued and not yet completed.
    fn queued(&self) -> usize;
}

/// Hostname verification strictness, in the numeric convention engines use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum VerifyHost {
    None = 0,
    #[default]
    Strict = 2,
}

impl VerifyHost {
    pub fn from_verify(verify: bool) -> Self {
        if verify {
            VerifyHost::Strict
        } else {
            VerifyHost::None
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Engine-level options, named after the settings they map to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOptions {
    pub ssl_verifyhost: VerifyHost,
    pub sslversion: Option<String>,
    pub sslcert: Option<PathBuf>,
    pub sslkey: Option<PathBuf>,
    pub cainfo: Option<PathBuf>,
    pub capath: Option<PathBuf>,
    /// `host:port` of the proxy.
    pub proxy: Option<String>,
    /// `username:password` for the proxy.
    pub proxyuserpwd: Option<String>,
    pub timeout_ms: Option<u64>,
    pub connecttimeout_ms: Option<u64>,
    /// Local interface or address the outbound socket binds to.
    pub interface: Option<String>,
}

/// A request as handed to the engine. The body is always fully materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRequest {
    pub url: String,
    pub method: HttpMethod,
    pub body: Bytes,
    pub headers: Vec<(String, String)>,
    pub options: EngineOptions,
}

/// A finished request as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineResponse {
    pub code: u16,
    /// Raw header block, status lines included.
    pub headers: String,
    pub body: Bytes,
    pub timed_out: bool,
}

impl EngineResponse {
    /// The completion an engine reports when a request ran out of time.
    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    ConnectionRefused,
    Other,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineErrorKind::ConnectionRefused => f.write_str("connection refused"),
            EngineErrorKind::Other => f.write_str("engine error"),
        }
    }
}

/// A failure reported by an engine, with the engine's own error as source.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {source}")]
pub struct EngineError {
    kind: EngineErrorKind,
    #[source]
    source: BoxError,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn connection_refused(source: impl Into<BoxError>) -> Self {
        Self::new(EngineErrorKind::ConnectionRefused, source)
    }

    pub fn other(source: impl Into<BoxError>) -> Self {
        Self::new(EngineErrorKind::Other, source)
    }

    pub fn kind(&self) -> EngineErrorKind {
        self.kind
    }

    pub fn into_source(self) -> BoxError {
        self.source
    }
}
