//! HTTP Binding
//!
//! Actions are invoked with `POST`, properties are read with `GET` and observed through
//! long-polling, unless the form declares a different `htv:methodName`.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    RequestBuilder, Response,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use super::{Content, Observation, Transport};
use crate::{
    auth::AuthHeader,
    config::ClientConfig,
    error::{Result, TransportError},
    form::Endpoint,
};

/// HTTP request method
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Patch,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Self::GET,
            Method::Put => Self::PUT,
            Method::Post => Self::POST,
            Method::Delete => Self::DELETE,
            Method::Patch => Self::PATCH,
        }
    }
}

/// [Transport] over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    // Long polls may legitimately outlive the request timeout
    observe_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(TransportError::from)?;
        let observe_client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(TransportError::from)?;

        Ok(Self {
            client,
            observe_client,
        })
    }
}

fn request(
    client: &reqwest::Client,
    method: Method,
    url: &Url,
    auth: Option<&AuthHeader>,
) -> RequestBuilder {
    let builder = client.request(method.into(), url.clone());
    match auth {
        Some(auth) => builder.header(AUTHORIZATION, auth.as_str()),
        None => builder,
    }
}

/// Fails on any non-success status, keeping the response body
pub(crate) async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn into_content(response: Response) -> Result<Content, TransportError> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let body = response.bytes().await?;

    Ok(Content { content_type, body })
}

struct LongPoll {
    request: RequestBuilder,
    pending: Option<Response>,
}

impl LongPoll {
    async fn next(&mut self) -> Result<Content, TransportError> {
        let response = match self.pending.take() {
            Some(response) => response,
            None => {
                let request = self.request.try_clone().ok_or_else(|| {
                    TransportError::InvalidEndpoint("request cannot be repeated".to_string())
                })?;
                check_status(request.send().await?).await?
            }
        };

        into_content(response).await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn invoke(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthHeader>,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let method = endpoint.http_method.unwrap_or(Method::Post);
        trace!(url = %endpoint.url, ?method, "invoking over http");

        let response = request(&self.client, method, &endpoint.url, auth)
            .header(CONTENT_TYPE, endpoint.content_type.as_str())
            .body(payload.to_vec())
            .send()
            .await?;
        check_status(response).await?;

        Ok(())
    }

    async fn read_once(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthHeader>,
    ) -> Result<Content, TransportError> {
        let method = endpoint.http_method.unwrap_or(Method::Get);
        trace!(url = %endpoint.url, ?method, "reading over http");

        let response = request(&self.client, method, &endpoint.url, auth)
            .send()
            .await?;

        into_content(check_status(response).await?).await
    }

    async fn observe(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthHeader>,
    ) -> Result<Observation, TransportError> {
        let method = endpoint.http_method.unwrap_or(Method::Get);
        let request = request(&self.observe_client, method, &endpoint.url, auth);

        let handshake = request
            .try_clone()
            .ok_or_else(|| TransportError::InvalidEndpoint(endpoint.url.to_string()))?;
        let first = check_status(handshake.send().await?).await?;
        debug!(url = %endpoint.url, "long poll established");

        let poll = LongPoll {
            request,
            pending: Some(first),
        };

        let updates = stream::unfold(Some(poll), |poll| async move {
            let Some(mut poll) = poll else {
                return None;
            };
            match poll.next().await {
                Ok(content) => Some((Ok(content), Some(poll))),
                Err(err) => Some((Err(err), None)),
            }
        });

        Ok(updates.boxed())
    }
}
