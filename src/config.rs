//! Client configuration
//!
//! The configuration is an explicit value handed to the directory client and to the
//! transports; nothing is read from global state after construction.

use std::{env, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use url::Url;

use crate::error::{Error, Result};

pub const DEFAULT_DIRECTORY_HOST: &str = "http://localhost:5002";
pub const DIRECTORY_HOST_VAR: &str = "THING_DIRECTORY_HOST";
pub const DIRECTORY_KEY_VAR: &str = "THING_DIRECTORY_KEY";

/// Settings shared by every [ThingClient](crate::client::ThingClient)
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Base URL of the thing directory
    #[serde(default = "default_directory_host")]
    pub directory_host: String,

    /// Value of the `Authorization` header sent to the directory
    pub directory_key: String,

    /// Upper bound for a single HTTP request
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,

    #[serde(default)]
    pub coap: CoapConfig,
}

/// CoAP message layer parameters
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoapConfig {
    /// Initial retransmission timeout of confirmable messages
    #[serde(default = "default_ack_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ack_timeout: Duration,

    #[serde(default = "default_max_retransmit")]
    pub max_retransmit: u8,

    #[serde(default = "default_coap_port")]
    pub default_port: u16,
}

fn default_directory_host() -> String {
    DEFAULT_DIRECTORY_HOST.to_string()
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_ack_timeout() -> Duration {
    Duration::from_secs(2)
}

const fn default_max_retransmit() -> u8 {
    4
}

const fn default_coap_port() -> u16 {
    5683
}

impl Default for CoapConfig {
    fn default() -> Self {
        Self {
            ack_timeout: default_ack_timeout(),
            max_retransmit: default_max_retransmit(),
            default_port: default_coap_port(),
        }
    }
}

impl ClientConfig {
    pub fn new(directory_host: impl Into<String>, directory_key: impl Into<String>) -> Self {
        Self {
            directory_host: directory_host.into(),
            directory_key: directory_key.into(),
            request_timeout: default_request_timeout(),
            coap: CoapConfig::default(),
        }
    }

    /// Reads `THING_DIRECTORY_HOST` and `THING_DIRECTORY_KEY`.
    ///
    /// The host falls back to [DEFAULT_DIRECTORY_HOST], the key is mandatory.
    pub fn from_env() -> Result<Self> {
        let directory_host =
            env::var(DIRECTORY_HOST_VAR).unwrap_or_else(|_| default_directory_host());
        let directory_key = env::var(DIRECTORY_KEY_VAR)
            .map_err(|_| Error::Config(format!("{DIRECTORY_KEY_VAR} is not set")))?;

        let config = Self::new(directory_host, directory_key);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let host = Url::parse(&self.directory_host).map_err(|err| {
            Error::Config(format!(
                "invalid directory host \"{}\": {err}",
                self.directory_host
            ))
        })?;

        if !matches!(host.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "directory host must be an http(s) URL, got \"{}\"",
                self.directory_host
            )));
        }

        if self.coap.max_retransmit == 0 || self.coap.ack_timeout.is_zero() {
            return Err(Error::Config(
                "CoAP retransmission needs a positive timeout and count".to_string(),
            ));
        }

        Ok(())
    }

    /// The directory host without trailing slashes
    pub(crate) fn directory_base(&self) -> &str {
        self.directory_host.trim_end_matches('/')
    }
}
