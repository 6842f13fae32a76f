//! Errors surfaced by the client runtime

use std::{fmt, time::Duration};

use crate::thing::AffordanceType;

/// Error type of the external stores behind a [Repository](crate::repository::Repository)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Client runtime errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The directory does not know the requested Thing
    #[error("Thing \"{0}\" does not exist in the directory")]
    NotFound(String),

    /// The Thing Description has no affordance with the requested name
    #[error("The thing has no {ty} named \"{name}\"")]
    UnknownInteraction { ty: AffordanceType, name: String },

    /// Every candidate form of an affordance failed.
    ///
    /// The individual failures are kept for diagnostics only.
    #[error("The {ty} \"{name}\" could not be reached through any form")]
    AllFormsFailed {
        ty: AffordanceType,
        name: String,
        failures: Vec<FormFailure>,
    },

    /// A single call to the directory failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The directory returned something that is not a Thing Description
    #[error("Invalid thing description")]
    InvalidDescription(#[from] serde_json::Error),

    #[error("Repository operation failed")]
    Repository(#[source] BoxError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Two flat form fields describe incompatible paths
    #[error("Field \"{0}\" conflicts with another field")]
    InvalidPayloadField(String),
}

/// Failure of a single request over HTTP or CoAP
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The remote answered with a non-success status
    #[error("Unexpected status {status}")]
    Status { status: u16, body: String },

    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("No response after {0:?}")]
    Timeout(Duration),

    /// The CoAP peer answered with an error code or a malformed message
    #[error("CoAP exchange failed: {0}")]
    Coap(String),

    /// The CoAP peer rejected the message
    #[error("CoAP message reset by peer")]
    Reset,

    #[error("Invalid endpoint \"{0}\"")]
    InvalidEndpoint(String),
}

impl TransportError {
    /// HTTP status or CoAP response code, when the remote answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

/// A form that was attempted and failed
#[derive(Debug)]
pub struct FormFailure {
    pub href: String,
    pub error: TransportError,
}

impl fmt::Display for FormFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.href, self.error)
    }
}
