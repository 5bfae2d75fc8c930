//! Request adapter between a normalized request environment and an external
//! parallel transport engine.
//!
//! # Overview
//! The adapter translates a [`RequestEnvironment`] into an [`EngineRequest`],
//! queues it on a [`ParallelManager`] with one completion callback, and turns
//! the engine's completion back into a [`ResponseEnvelope`]. All HTTP, TLS and
//! concurrency work stays inside the engine.
//!
//! # Design
//! - Engines plug in through the [`TransportEngine`] and [`ParallelManager`]
//!   traits; the adapter depends on nothing else.
//! - Without a `parallel_manager` on the environment the adapter creates a
//!   manager, runs it and blocks until the request completes. With one, it
//!   only queues, and the caller decides when to run.
//! - A refused connection is reported as [`AdapterError::ConnectionFailed`];
//!   a timeout fails synchronous calls with [`AdapterError::Timeout`] and is
//!   only flagged on the envelope in batch mode.

pub mod adapter;
pub mod engine;
pub mod env;
pub mod error;
pub mod http;
pub mod options;
pub mod response;

pub use adapter::{Handler, RequestAdapter};
pub use engine::{
    shared_manager, Completion, EngineError, EngineErrorKind, EngineOptions, EngineRequest,
    EngineResponse, ManagerOptions, OnComplete, ParallelManager, SharedManager, TransportEngine,
    VerifyHost,
};
pub use env::{Body, RequestEnvironment};
pub use error::{AdapterError, Result};
pub use http::{Headers, HttpMethod, ResponseEnvelope};
pub use options::{BindOptions, ProxyOptions, RequestOptions, SslOptions, TimeoutSpec};
pub use response::ResponseHandle;
