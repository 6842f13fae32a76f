//! Thing directory client
//!
//! The directory stores the Thing Descriptions. Every call carries the static directory
//! credential from [ClientConfig], distinct from the per-thing authorization records.

use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::{
    config::ClientConfig,
    error::{Error, Result, TransportError},
    protocol::http::check_status,
    thing::ThingDescription,
};

/// Operations offered by the thing directory
#[async_trait]
pub trait Directory: Send + Sync {
    /// Fetches the description of `thing_id`, failing with [Error::NotFound] if it is unknown
    async fn fetch(&self, thing_id: &str) -> Result<ThingDescription>;

    async fn list(&self) -> Result<Vec<ThingDescription>>;

    /// Asks the directory to register the descriptions found at `url`, returning their ids
    async fn register_url(&self, url: &str) -> Result<Vec<String>>;

    async fn delete(&self, thing_id: &str) -> Result<()>;
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    uuids: Vec<String>,
}

/// [Directory] reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: reqwest::Client,
    base: Url,
    key: String,
}

impl HttpDirectory {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(TransportError::from)?;

        let base = Url::parse(config.directory_base()).map_err(|err| {
            Error::Config(format!("invalid directory host: {err}"))
        })?;

        Ok(Self {
            client,
            base,
            key: config.directory_key.clone(),
        })
    }

    /// `segments` appended to the base path, each one percent-encoded as a whole
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // http(s) URLs always have a path
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn things_url(&self) -> Url {
        self.url(&["things"])
    }

    fn thing_url(&self, thing_id: &str) -> Url {
        self.url(&["things", thing_id])
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn fetch(&self, thing_id: &str) -> Result<ThingDescription> {
        debug!(thing_id, "fetching thing description");
        let response = self
            .client
            .get(self.thing_url(thing_id))
            .header(AUTHORIZATION, &self.key)
            .send()
            .await
            .map_err(TransportError::from)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(thing_id.to_string()));
        }

        let body = check_status(response)
            .await?
            .bytes()
            .await
            .map_err(TransportError::from)?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn list(&self) -> Result<Vec<ThingDescription>> {
        let response = self
            .client
            .get(self.things_url())
            .header(AUTHORIZATION, &self.key)
            .send()
            .await
            .map_err(TransportError::from)?;

        let body = check_status(response)
            .await?
            .bytes()
            .await
            .map_err(TransportError::from)?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn register_url(&self, url: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .post(self.url(&["things", "register_url"]))
            .header(AUTHORIZATION, &self.key)
            .json(&RegisterRequest { url })
            .send()
            .await
            .map_err(TransportError::from)?;

        let body = check_status(response)
            .await?
            .bytes()
            .await
            .map_err(TransportError::from)?;
        let RegisterResponse { uuids } = serde_json::from_slice(&body)?;
        debug!(url, registered = uuids.len(), "registered things");
        Ok(uuids)
    }

    async fn delete(&self, thing_id: &str) -> Result<()> {
        debug!(thing_id, "deleting thing from directory");
        let response = self
            .client
            .delete(self.thing_url(thing_id))
            .header(AUTHORIZATION, &self.key)
            .send()
            .await
            .map_err(TransportError::from)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(thing_id.to_string()));
        }
        check_status(response).await?;

        Ok(())
    }
}
