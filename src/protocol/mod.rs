//! Protocol bindings used to reach Things
//!
//! Each binding implements [Transport]; the [Endpoint] scheme decides which one handles a
//! request.

pub mod coap;
pub mod http;

use std::{borrow::Cow, fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::{
    auth::AuthHeader,
    config::ClientConfig,
    error::{Result, TransportError},
    form::{Endpoint, Protocol},
};

/// A payload received from a Thing
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Content {
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// A payload decoded opportunistically as JSON
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Json(Value),
    Text(String),
}

impl Content {
    pub fn new(content_type: Option<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type,
            body: body.into(),
        }
    }

    /// The body as text, replacing invalid UTF-8 sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Decodes the body as JSON, falling back to its raw text
    pub fn decode(&self) -> Decoded {
        match serde_json::from_slice(&self.body) {
            Ok(value) => Decoded::Json(value),
            Err(_) => Decoded::Text(self.text().into_owned()),
        }
    }
}

impl Decoded {
    pub fn into_value(self) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Text(text) => Value::String(text),
        }
    }
}

/// Updates pushed by an established observation.
///
/// Dropping the stream releases the underlying connection.
pub type Observation = BoxStream<'static, Result<Content, TransportError>>;

/// The operations a binding supports on a single endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Invokes an action, succeeding only on a success status
    async fn invoke(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthHeader>,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Reads the current value of a resource
    async fn read_once(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthHeader>,
    ) -> Result<Content, TransportError>;

    /// Establishes an observation.
    ///
    /// Returns once the remote accepted it; updates flow through the returned stream.
    async fn observe(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthHeader>,
    ) -> Result<Observation, TransportError>;
}

/// One [Transport] per [Protocol]
#[derive(Clone)]
pub struct Transports {
    http: Arc<dyn Transport>,
    coap: Arc<dyn Transport>,
}

impl Transports {
    /// The HTTP and CoAP bindings configured from `config`
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            http: Arc::new(http::HttpTransport::new(config)?),
            coap: Arc::new(coap::CoapTransport::new(config.coap.clone())),
        })
    }

    pub fn from_parts(http: Arc<dyn Transport>, coap: Arc<dyn Transport>) -> Self {
        Self { http, coap }
    }

    pub fn get(&self, protocol: Protocol) -> Arc<dyn Transport> {
        match protocol {
            Protocol::Http => Arc::clone(&self.http),
            Protocol::Coap => Arc::clone(&self.coap),
        }
    }
}

impl fmt::Debug for Transports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transports").finish_non_exhaustive()
    }
}
