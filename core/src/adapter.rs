//! The request adapter: environment in, engine request out, response back.
//!
//! # Design
//! `RequestAdapter` holds the engine, the tuning options for managers it
//! creates, and the next handler in the chain. A call is one pipeline:
//! materialize the body, translate the environment into an
//! [`EngineRequest`], queue it with a completion callback, and either run a
//! private manager to completion (synchronous mode) or leave the request on
//! the caller's manager (batch mode).
//!
//! In synchronous mode the callback hands its outcome back through a slot the
//! adapter reads after `run`; the adapter then finishes the environment's
//! [`ResponseHandle`] whether the call succeeded or not. In batch mode the
//! callback writes straight to the handle and finishes it.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, debug_span};
use uuid::Uuid;

use crate::engine::{
    Completion, EngineOptions, EngineRequest, EngineResponse, ManagerOptions, OnComplete,
    ParallelManager, TransportEngine,
};
use crate::env::RequestEnvironment;
use crate::error::{AdapterError, Result};
use crate::http::{Headers, ResponseEnvelope};
use crate::options::{RequestOptions, SslOptions};
use crate::response::ResponseHandle;

/// A step in the request pipeline.
pub trait Handler: Send + Sync {
    fn call(&self, env: &mut RequestEnvironment) -> Result<()>;
}

/// Binds request environments to a [`TransportEngine`].
pub struct RequestAdapter<E> {
    engine: E,
    manager_options: ManagerOptions,
    next: Option<Arc<dyn Handler>>,
}

impl<E: TransportEngine> RequestAdapter<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            manager_options: ManagerOptions::new(),
            next: None,
        }
    }

    /// Options handed to the engine whenever this adapter creates a manager.
    pub fn with_manager_options(mut self, options: ManagerOptions) -> Self {
        self.manager_options = options;
        self
    }

    /// Handler invoked after this adapter has submitted the request.
    pub fn with_next(mut self, next: impl Handler + 'static) -> Self {
        self.next = Some(Arc::new(next));
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Build a manager with this adapter's options.
    pub fn setup_parallel_manager(&self) -> Box<dyn ParallelManager> {
        self.engine.setup_parallel_manager(&self.manager_options)
    }

    /// Submit `env` to the engine without invoking the rest of the chain.
    pub fn perform_request(&self, env: &mut RequestEnvironment) -> Result<()> {
        let body = read_body(env)?;
        let request = build_request(env, body)?;

        match env.parallel_manager.clone() {
            Some(manager) => {
                let on_complete = batch_completion(env.response.clone());
                manager.queue(request, on_complete)?;
                debug!("queued on caller-supplied parallel manager");
                Ok(())
            }
            None => {
                let result = self.run_locally(request, &env.response);
                // Failed calls finish the handle too, so waiters never hang.
                env.response.finish();
                result
            }
        }
    }

    fn run_locally(&self, request: EngineRequest, response: &ResponseHandle) -> Result<()> {
        let outcome: Arc<Mutex<Option<Result<()>>>> = Arc::new(Mutex::new(None));
        let on_complete = sync_completion(response.clone(), Arc::clone(&outcome));
        let manager = self.setup_parallel_manager();
        manager.queue(request, on_complete)?;
        manager.run()?;
        let result = outcome.lock().take();
        result.unwrap_or(Err(AdapterError::Unfinished))
    }
}

impl<E: TransportEngine> Handler for RequestAdapter<E> {
    fn call(&self, env: &mut RequestEnvironment) -> Result<()> {
        let span = debug_span!(
            "adapter.call",
            request_id = %Uuid::new_v4(),
            method = %env.method,
            url = %env.url,
            parallel = env.is_parallel(),
        );
        let _enter = span.enter();

        if env.needs_body() {
            env.clear_body();
        }
        self.perform_request(env)?;

        match &self.next {
            Some(next) => next.call(env),
            None => Ok(()),
        }
    }
}

/// Replace a stream body with its contents and return the bytes to send.
pub fn read_body(env: &mut RequestEnvironment) -> Result<Bytes> {
    match env.body.as_mut() {
        Some(body) => {
            let streamed = body.is_stream();
            let bytes = body.materialize()?;
            if streamed {
                debug!(len = bytes.len(), "read stream body into memory");
            }
            Ok(bytes)
        }
        None => Ok(Bytes::new()),
    }
}

/// Translate `env` into the request the engine will execute.
pub fn build_request(env: &RequestEnvironment, body: Bytes) -> Result<EngineRequest> {
    let mut options = EngineOptions {
        ssl_verifyhost: env.ssl.verify_host(),
        ..EngineOptions::default()
    };
    configure_ssl(&mut options, &env.ssl);
    configure_proxy(&mut options, &env.request)?;
    configure_timeout(&mut options, &env.request)?;
    configure_socket(&mut options, &env.request);

    Ok(EngineRequest {
        url: env.url.to_string(),
        method: env.method,
        body,
        headers: env.request_headers.to_pairs(),
        options,
    })
}

fn configure_ssl(options: &mut EngineOptions, ssl: &SslOptions) {
    options.sslversion = ssl.version.clone();
    options.sslcert = ssl.client_cert_file.clone();
    options.sslkey = ssl.client_key_file.clone();
    options.cainfo = ssl.ca_file.clone();
    options.capath = ssl.ca_path.clone();
}

fn configure_proxy(options: &mut EngineOptions, request: &RequestOptions) -> Result<()> {
    let Some(proxy) = &request.proxy else {
        return Ok(());
    };
    let address = proxy.address()?;
    debug!(proxy = %address, authenticated = proxy.credentials().is_some(), "using proxy");
    options.proxy = Some(address);
    options.proxyuserpwd = proxy.credentials();
    Ok(())
}

fn configure_timeout(options: &mut EngineOptions, request: &RequestOptions) -> Result<()> {
    let timeouts = request.timeouts()?;
    options.timeout_ms = timeouts.timeout_ms();
    options.connecttimeout_ms = timeouts.connect_timeout_ms();
    Ok(())
}

fn configure_socket(options: &mut EngineOptions, request: &RequestOptions) {
    if let Some(bind) = &request.bind {
        options.interface = Some(bind.host.clone());
    }
}

fn sync_completion(response: ResponseHandle, outcome: Arc<Mutex<Option<Result<()>>>>) -> OnComplete {
    Box::new(move |completion: Completion| {
        let result = complete_sync(&response, completion);
        *outcome.lock() = Some(result);
    })
}

fn complete_sync(response: &ResponseHandle, completion: Completion) -> Result<()> {
    let engine_response = completion?;
    if engine_response.timed_out {
        return Err(AdapterError::Timeout);
    }
    save_response(response, engine_response);
    Ok(())
}

fn batch_completion(response: ResponseHandle) -> OnComplete {
    Box::new(move |completion: Completion| {
        match completion {
            Ok(engine_response) => {
                if engine_response.timed_out {
                    // Surfaced only through the envelope's `timed_out` flag.
                    debug!("request timed out in batch mode");
                }
                save_response(&response, engine_response);
            }
            Err(err) => response.fail(AdapterError::from(err)),
        }
        response.finish();
    })
}

fn save_response(response: &ResponseHandle, engine_response: EngineResponse) {
    let mut headers = Headers::new();
    let reason_phrase = headers.parse(&engine_response.headers);
    debug!(
        status = engine_response.code,
        body_len = engine_response.body.len(),
        "saving response"
    );
    response.save(ResponseEnvelope {
        status: engine_response.code,
        reason_phrase,
        headers,
        body: engine_response.body,
        timed_out: engine_response.timed_out,
    });
}
