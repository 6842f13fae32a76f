//! CoAP Binding
//!
//! Requests are sent as confirmable messages over UDP, retransmitted with an exponential
//! back-off until acknowledged. Observations use the Observe option (RFC 7641).

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::atomic::{AtomicU16, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};
use futures::{stream, StreamExt};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use tokio::{
    net::{lookup_host, UdpSocket},
    time::{self, Instant},
};
use tracing::{debug, trace};
use url::Url;

use super::{Content, Observation, Transport};
use crate::{
    auth::AuthHeader,
    config::CoapConfig,
    error::TransportError,
    form::Endpoint,
};

const MAX_MESSAGE_SIZE: usize = 1152;
const TOKEN_LENGTH: usize = 8;

/// CoAP request method
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Patch,
    #[serde(rename = "iPATCH")]
    Ipatch,
}

impl From<Method> for RequestType {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Self::Get,
            Method::Put => Self::Put,
            Method::Post => Self::Post,
            Method::Delete => Self::Delete,
            Method::Patch => Self::Patch,
            Method::Ipatch => Self::IPatch,
        }
    }
}

/// Registered CoAP Content-Formats
const CONTENT_FORMATS: &[(u16, &str)] = &[
    (0, "text/plain"),
    (40, "application/link-format"),
    (41, "application/xml"),
    (42, "application/octet-stream"),
    (47, "application/exi"),
    (50, "application/json"),
    (60, "application/cbor"),
];

fn content_format(content_type: &str) -> Option<u16> {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    CONTENT_FORMATS
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(essence))
        .map(|&(id, _)| id)
}

fn content_type(packet: &Packet) -> Option<String> {
    let raw = packet.get_option(CoapOption::ContentFormat)?.front()?;
    let id = decode_uint(raw)?;
    CONTENT_FORMATS
        .iter()
        .find(|&&(known, _)| u32::from(known) == id)
        .map(|(_, name)| name.to_string())
}

fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    bytes[skip..].to_vec()
}

fn decode_uint(raw: &[u8]) -> Option<u32> {
    if raw.len() > 4 {
        return None;
    }
    Some(raw.iter().fold(0, |acc, &b| (acc << 8) | u32::from(b)))
}

fn is_success(response: &ResponseType) -> bool {
    matches!(
        response,
        ResponseType::Created
            | ResponseType::Deleted
            | ResponseType::Valid
            | ResponseType::Changed
            | ResponseType::Content
            | ResponseType::Continue
    )
}

/// The response code as a three digit number, i.e. 4.04 becomes 404
fn status_code(code: MessageClass) -> u16 {
    let raw = u8::from(code);
    u16::from(raw >> 5) * 100 + u16::from(raw & 0x1f)
}

fn has_token(packet: &Packet, token: &[u8]) -> bool {
    packet.get_token().iter().eq(token.iter())
}

fn into_content(packet: Packet) -> Result<Content, TransportError> {
    if matches!(&packet.header.code, MessageClass::Response(response) if is_success(response)) {
        return Ok(Content::new(content_type(&packet), packet.payload));
    }

    Err(TransportError::Status {
        status: status_code(packet.header.code),
        body: String::from_utf8_lossy(&packet.payload).into_owned(),
    })
}

fn encode(packet: &Packet) -> Result<Vec<u8>, TransportError> {
    packet
        .to_bytes()
        .map_err(|err| {
            TransportError::Coap(format!("cannot encode message: {err:?}"))
        })
}

async fn acknowledge(socket: &UdpSocket, message: &Packet) -> Result<(), TransportError> {
    let mut ack = Packet::new();
    ack.header.set_type(MessageType::Acknowledgement);
    ack.header.message_id = message.header.message_id;
    ack.header.code = MessageClass::Empty;
    socket.send(&encode(&ack)?).await?;
    Ok(())
}

/// [Transport] over CoAP
#[derive(Debug)]
pub struct CoapTransport {
    config: CoapConfig,
    message_id: AtomicU16,
}

impl CoapTransport {
    pub fn new(config: CoapConfig) -> Self {
        Self {
            config,
            message_id: AtomicU16::new(rand::random()),
        }
    }

    /// RFC 7252 MAX_TRANSMIT_WAIT, without the random factor
    fn max_transmit_wait(&self) -> Duration {
        let attempts = 2u32.saturating_pow(u32::from(self.config.max_retransmit) + 1) - 1;
        self.config.ack_timeout.saturating_mul(attempts)
    }

    async fn connect(&self, url: &Url) -> Result<UdpSocket, TransportError> {
        let invalid = || TransportError::InvalidEndpoint(url.to_string());

        let host = url.host_str().ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = url.port().unwrap_or(self.config.default_port);

        let peer = lookup_host((host, port)).await?.next().ok_or_else(invalid)?;
        let local: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        Ok(socket)
    }

    fn build(
        &self,
        method: Method,
        endpoint: &Endpoint,
        payload: Option<&[u8]>,
        observe: bool,
    ) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Confirmable);
        packet.header.code = MessageClass::Request(method.into());
        packet.header.message_id = self.message_id.fetch_add(1, Ordering::Relaxed);
        packet.set_token(rand::random::<[u8; TOKEN_LENGTH]>().to_vec());

        if observe {
            packet.add_option(CoapOption::Observe, encode_uint(0));
        }

        // Options carry the decoded bytes
        for segment in endpoint
            .url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|segment| !segment.is_empty())
        {
            let segment: Vec<u8> = percent_decode_str(segment).collect();
            packet.add_option(CoapOption::UriPath, segment);
        }

        for query in endpoint.url.query().into_iter().flat_map(|q| q.split('&')) {
            let query: Vec<u8> = percent_decode_str(query).collect();
            packet.add_option(CoapOption::UriQuery, query);
        }

        if let Some(payload) = payload {
            if let Some(format) = content_format(&endpoint.content_type) {
                packet.add_option(CoapOption::ContentFormat, encode_uint(u32::from(format)));
            }
            packet.payload = payload.to_vec();
        }

        packet
    }

    /// Sends `request` and waits for its response, piggybacked or separate
    async fn exchange(
        &self,
        socket: &UdpSocket,
        request: &Packet,
    ) -> Result<Packet, TransportError> {
        let bytes = encode(request)?;
        let message_id = request.header.message_id;
        let token = request.get_token().to_vec();

        let deadline = Instant::now() + self.max_transmit_wait();
        let mut retransmit_at = Instant::now() + self.config.ack_timeout;
        let mut backoff = self.config.ack_timeout;
        let mut retransmissions = 0;
        let mut acknowledged = false;

        socket.send(&bytes).await?;

        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        loop {
            let wake_at = if acknowledged {
                deadline
            } else {
                retransmit_at.min(deadline)
            };

            let read = match time::timeout_at(wake_at, socket.recv(&mut buf)).await {
                Ok(read) => read?,
                Err(_)
                    if !acknowledged
                        && wake_at < deadline
                        && retransmissions < self.config.max_retransmit =>
                {
                    retransmissions += 1;
                    backoff *= 2;
                    retransmit_at = Instant::now() + backoff;
                    trace!(message_id, retransmissions, "retransmitting");
                    socket.send(&bytes).await?;
                    continue;
                }
                Err(_) => return Err(TransportError::Timeout(self.max_transmit_wait())),
            };

            let reply = match Packet::from_bytes(&buf[..read]) {
                Ok(reply) => reply,
                Err(err) => {
                    trace!(?err, "ignoring malformed message");
                    continue;
                }
            };

            match reply.header.get_type() {
                MessageType::Acknowledgement if reply.header.message_id == message_id => {
                    if matches!(reply.header.code, MessageClass::Empty) {
                        trace!(message_id, "waiting for separate response");
                        acknowledged = true;
                    } else if has_token(&reply, &token) {
                        return Ok(reply);
                    }
                }
                MessageType::Reset if reply.header.message_id == message_id => {
                    return Err(TransportError::Reset);
                }
                MessageType::Confirmable | MessageType::NonConfirmable
                    if has_token(&reply, &token) =>
                {
                    if matches!(reply.header.get_type(), MessageType::Confirmable) {
                        acknowledge(socket, &reply).await?;
                    }
                    return Ok(reply);
                }
                _ => trace!(id = reply.header.message_id, "ignoring unrelated message"),
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &Endpoint,
        payload: Option<&[u8]>,
    ) -> Result<Content, TransportError> {
        let socket = self.connect(&endpoint.url).await?;
        let request = self.build(method, endpoint, payload, false);
        let response = self.exchange(&socket, &request).await?;

        into_content(response)
    }
}

struct Notifications {
    socket: UdpSocket,
    token: Vec<u8>,
    buf: Vec<u8>,
}

impl Notifications {
    async fn next(&mut self) -> Result<Content, TransportError> {
        loop {
            let read = self.socket.recv(&mut self.buf).await?;
            let notification = match Packet::from_bytes(&self.buf[..read]) {
                Ok(notification) => notification,
                Err(err) => {
                    trace!(?err, "ignoring malformed notification");
                    continue;
                }
            };

            if !has_token(&notification, &self.token) {
                trace!("ignoring notification for another token");
                continue;
            }

            if matches!(notification.header.get_type(), MessageType::Confirmable) {
                acknowledge(&self.socket, &notification).await?;
            }

            return into_content(notification);
        }
    }
}

#[async_trait]
impl Transport for CoapTransport {
    /// CoAP carries no `Authorization` header, `auth` is ignored
    async fn invoke(
        &self,
        endpoint: &Endpoint,
        _auth: Option<&AuthHeader>,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let method = endpoint.coap_method.unwrap_or(Method::Post);
        self.send(method, endpoint, Some(payload)).await.map(drop)
    }

    async fn read_once(
        &self,
        endpoint: &Endpoint,
        _auth: Option<&AuthHeader>,
    ) -> Result<Content, TransportError> {
        let method = endpoint.coap_method.unwrap_or(Method::Get);
        self.send(method, endpoint, None).await
    }

    async fn observe(
        &self,
        endpoint: &Endpoint,
        _auth: Option<&AuthHeader>,
    ) -> Result<Observation, TransportError> {
        let method = endpoint.coap_method.unwrap_or(Method::Get);
        let socket = self.connect(&endpoint.url).await?;
        let request = self.build(method, endpoint, None, true);

        let registration = self.exchange(&socket, &request).await?;
        if registration.get_option(CoapOption::Observe).is_none() {
            return Err(TransportError::Coap(format!(
                "{} is not observable",
                endpoint.url
            )));
        }
        into_content(registration)?;
        debug!(url = %endpoint.url, "coap observation registered");

        let notifications = Notifications {
            socket,
            token: request.get_token().to_vec(),
            buf: vec![0u8; MAX_MESSAGE_SIZE],
        };

        let updates = stream::unfold(Some(notifications), |notifications| async move {
            let Some(mut notifications) = notifications else {
                return None;
            };
            match notifications.next().await {
                Ok(content) => Some((Ok(content), Some(notifications))),
                Err(err) => Some((Err(err), None)),
            }
        });

        Ok(updates.boxed())
    }
}
