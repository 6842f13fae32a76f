//! In-process servers and fixtures shared by unit tests

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use futures::{
    channel::mpsc::{self, UnboundedSender},
    StreamExt,
};
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

use crate::{
    auth::AuthHeader,
    client::ClientContext,
    directory::Directory,
    error::{Error, Result, TransportError},
    form::{Endpoint, FormSelector},
    protocol::{Content, Observation, Transport, Transports},
    repository::{InMemoryRepository, Repository},
    thing::{Form, ThingDescription},
};

/// The selected endpoint of a single form pointing to `href`
pub(crate) fn endpoint(href: &str) -> Endpoint {
    let form = Form {
        href: Some(href.to_string()),
        ..Default::default()
    };
    FormSelector::default().select(&[form]).remove(0)
}

#[derive(Debug, Clone)]
pub(crate) struct StubRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl StubRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StubResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl StubResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.into(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.into(),
        }
    }
}

/// Serves `responses` in order, one connection each, on a random local port.
///
/// Returns the base URL and a handle resolving to the received requests.
pub(crate) async fn serve_http(
    responses: Vec<StubResponse>,
) -> (String, JoinHandle<Vec<StubRequest>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();
        for response in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut stream).await);

            let head = format!(
                "HTTP/1.1 {} Stub\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                response.status,
                response.content_type,
                response.body.len(),
            );
            stream.write_all(head.as_bytes()).await.unwrap();
            stream.write_all(response.body.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        }
        requests
    });

    (base, handle)
}

async fn read_request(stream: &mut TcpStream) -> StubRequest {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let read = stream.read(&mut chunk).await.unwrap();
        assert_ne!(read, 0, "connection closed before the request head");
        buf.extend_from_slice(&chunk[..read]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8(buf[..head_end].to_vec()).unwrap();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap().split(' ');
    let method = request_line.next().unwrap().to_string();
    let path = request_line.next().unwrap().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| {
            (key.trim().to_string(), value.trim().to_string())
        })
        .collect();

    let length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| value.parse::<usize>().unwrap())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < length {
        let read = stream.read(&mut chunk).await.unwrap();
        assert_ne!(read, 0, "connection closed before the request body");
        body.extend_from_slice(&chunk[..read]);
    }

    StubRequest {
        method,
        path,
        headers,
        body,
    }
}

/// A base URL nobody listens on
pub(crate) async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    base
}

/// A Thing Description built from a JSON fixture
pub(crate) fn description(value: Value) -> ThingDescription {
    serde_json::from_value(value).unwrap()
}

pub(crate) type Feed = UnboundedSender<Result<Content, TransportError>>;

/// A single request received by a [MockTransport]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Attempt {
    pub operation: &'static str,
    pub url: String,
    pub auth: Option<String>,
    pub payload: Vec<u8>,
}

/// [Transport] recording every attempt, answering from fixed tables
#[derive(Default)]
pub(crate) struct MockTransport {
    failing: Mutex<HashSet<String>>,
    bodies: Mutex<HashMap<String, String>>,
    feeds: Mutex<HashMap<String, mpsc::UnboundedReceiver<Result<Content, TransportError>>>>,
    attempts: Mutex<Vec<Attempt>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every request to `url` times out
    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Reads of `url` return `body`
    pub fn respond(&self, url: &str, body: &str) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }

    /// The next observation of `url` is fed through the returned sender
    pub fn feed(&self, url: &str) -> Feed {
        let (sender, receiver) = mpsc::unbounded();
        self.feeds.lock().unwrap().insert(url.to_string(), receiver);
        sender
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.attempts().into_iter().map(|a| a.url).collect()
    }

    fn record(
        &self,
        operation: &'static str,
        endpoint: &Endpoint,
        auth: Option<&AuthHeader>,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let url = endpoint.url.to_string();
        self.attempts.lock().unwrap().push(Attempt {
            operation,
            url: url.clone(),
            auth: auth.map(|auth| auth.as_str().to_string()),
            payload: payload.to_vec(),
        });

        if self.failing.lock().unwrap().contains(&url) {
            return Err(TransportError::Timeout(std::time::Duration::from_secs(10)));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn invoke(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthHeader>,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        self.record("invoke", endpoint, auth, payload)
    }

    async fn read_once(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthHeader>,
    ) -> Result<Content, TransportError> {
        self.record("read", endpoint, auth, b"")?;
        let body = self
            .bodies
            .lock()
            .unwrap()
            .get(endpoint.url.as_str())
            .cloned()
            .unwrap_or_default();
        Ok(Content::new(None, body))
    }

    async fn observe(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthHeader>,
    ) -> Result<Observation, TransportError> {
        self.record("observe", endpoint, auth, b"")?;
        match self.feeds.lock().unwrap().remove(endpoint.url.as_str()) {
            Some(receiver) => Ok(receiver.boxed()),
            None => Err(TransportError::Status {
                status: 404,
                body: String::new(),
            }),
        }
    }
}

/// [Directory] serving fixed descriptions
#[derive(Default)]
pub(crate) struct MockDirectory {
    things: Mutex<HashMap<String, ThingDescription>>,
    deleted: Mutex<Vec<String>>,
    fail_deletes: bool,
}

impl MockDirectory {
    pub fn with(thing_id: &str, description: ThingDescription) -> Self {
        let directory = Self::default();
        directory.insert(thing_id, description);
        directory
    }

    /// A directory whose deletions always fail
    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn insert(&self, thing_id: &str, description: ThingDescription) {
        self.things
            .lock()
            .unwrap()
            .insert(thing_id.to_string(), description);
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Directory for MockDirectory {
    async fn fetch(&self, thing_id: &str) -> Result<ThingDescription> {
        self.things
            .lock()
            .unwrap()
            .get(thing_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(thing_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<ThingDescription>> {
        Ok(self.things.lock().unwrap().values().cloned().collect())
    }

    async fn register_url(&self, _url: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn delete(&self, thing_id: &str) -> Result<()> {
        if self.fail_deletes {
            return Err(TransportError::Status {
                status: 500,
                body: "directory unavailable".to_string(),
            }
            .into());
        }
        self.deleted.lock().unwrap().push(thing_id.to_string());
        self.things.lock().unwrap().remove(thing_id);
        Ok(())
    }
}

/// Mocks wired into a [ClientContext]
pub(crate) struct Fixture {
    pub context: ClientContext,
    pub directory: Arc<MockDirectory>,
    pub repository: Arc<InMemoryRepository>,
    pub transport: Arc<MockTransport>,
}

impl Fixture {
    /// Both protocols go through the same [MockTransport]
    pub fn new(directory: MockDirectory) -> Self {
        let directory = Arc::new(directory);
        let repository = Arc::new(InMemoryRepository::new());
        let transport = MockTransport::new();
        let transports = Transports::from_parts(transport.clone(), transport.clone());

        let context = ClientContext::from_parts(
            directory.clone(),
            repository.clone() as Arc<dyn Repository>,
            transports,
        );

        Self {
            context,
            directory,
            repository,
            transport,
        }
    }
}
