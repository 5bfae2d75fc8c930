//! The request environment passed through the handler chain.

use std::fmt;
use std::io::{self, Read};

use bytes::Bytes;
use url::Url;

use crate::engine::SharedManager;
use crate::error::Result;
use crate::http::{Headers, HttpMethod};
use crate::options::{RequestOptions, SslOptions};
use crate::response::ResponseHandle;

/// Request body: bytes, or a reader drained before the engine sees it.
pub enum Body {
    Bytes(Bytes),
    Stream(Box<dyn Read + Send>),
}

impl Body {
    pub fn stream(reader: impl Read + Send + 'static) -> Self {
        Body::Stream(Box::new(reader))
    }

    /// Drain a stream body into memory, replacing it with the bytes read.
    /// Byte bodies are returned as they are.
    pub fn materialize(&mut self) -> io::Result<Bytes> {
        let bytes = match self {
            Body::Bytes(bytes) => return Ok(bytes.clone()),
            Body::Stream(reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Bytes::from(buf)
            }
        };
        *self = Body::Bytes(bytes.clone());
        Ok(bytes)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Body::Bytes(bytes) => Some(bytes),
            Body::Stream(_) => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Bytes(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// Everything known about one request and, eventually, its response.
///
/// A `parallel_manager` switches the adapter into batch mode: the request is
/// only queued, and the caller runs the manager later.
pub struct RequestEnvironment {
    pub method: HttpMethod,
    pub url: Url,
    pub body: Option<Body>,
    pub request_headers: Headers,
    pub ssl: SslOptions,
    pub request: RequestOptions,
    pub parallel_manager: Option<SharedManager>,
    pub response: ResponseHandle,
}

impl RequestEnvironment {
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
            request_headers: Headers::new(),
            ssl: SslOptions::default(),
            request: RequestOptions::default(),
            parallel_manager: None,
            response: ResponseHandle::new(),
        }
    }

    pub fn parse(method: HttpMethod, url: &str) -> Result<Self> {
        Ok(Self::new(method, Url::parse(url)?))
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request_headers.insert(name, value);
        self
    }

    pub fn with_ssl(mut self, ssl: SslOptions) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn with_request_options(mut self, request: RequestOptions) -> Self {
        self.request = request;
        self
    }

    pub fn with_parallel_manager(mut self, manager: SharedManager) -> Self {
        self.parallel_manager = Some(manager);
        self
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel_manager.is_some()
    }

    /// A body-carrying method was given no body.
    pub fn needs_body(&self) -> bool {
        self.body.is_none() && self.method.has_body()
    }

    /// Send an explicit empty body.
    pub fn clear_body(&mut self) {
        self.request_headers.insert("Content-Length", "0");
        self.body = Some(Body::Bytes(Bytes::new()));
    }
}

impl fmt::Debug for RequestEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEnvironment")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("body", &self.body)
            .field("request_headers", &self.request_headers)
            .field("ssl", &self.ssl)
            .field("request", &self.request)
            .field("parallel", &self.is_parallel())
            .field("response", &self.response)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn materialize_drains_stream_into_bytes() {
        let mut body = Body::stream(Cursor::new(b"streamed payload".to_vec()));
        assert!(body.is_stream());
        let bytes = body.materialize().unwrap();
        assert_eq!(&bytes[..], b"streamed payload");
        assert_eq!(body.as_bytes(), Some(&bytes));
    }

    #[test]
    fn materialize_leaves_bytes_untouched() {
        let mut body = Body::from("fixed");
        assert_eq!(&body.materialize().unwrap()[..], b"fixed");
        assert!(!body.is_stream());
    }

    #[test]
    fn post_without_body_needs_one() {
        let mut env = RequestEnvironment::parse(HttpMethod::Post, "http://localhost/items").unwrap();
        assert!(env.needs_body());
        env.clear_body();
        assert!(!env.needs_body());
        assert_eq!(env.request_headers.get("content-length"), Some("0"));

        let env = RequestEnvironment::parse(HttpMethod::Get, "http://localhost/items").unwrap();
        assert!(!env.needs_body());
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(RequestEnvironment::parse(HttpMethod::Get, "not a url").is_err());
    }
}
