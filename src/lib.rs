//! Web of Things client runtime
//!
//! Interact with remote [Things](https://www.w3.org/TR/wot-thing-description/) from their Thing
//! Description:
//! > A Thing Description describes the metadata and interfaces of Things,
//! > where a Thing is an abstraction of a physical or virtual entity that
//! > provides interactions to and participates in the Web of Things.
//!
//! A [ThingClient] fetches the description of a Thing from the thing directory and performs
//! actions, reads properties and observes properties and events over HTTP or CoAP. Each
//! interaction tries the [forms](thing::Form) of its affordance in declaration order until one
//! of them succeeds.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use wot_client::{repository::InMemoryRepository, ClientConfig, ClientContext, ThingClient};
//!
//! # async fn run() -> wot_client::Result<()> {
//! let config = ClientConfig::from_env()?;
//! let context = ClientContext::new(&config, Arc::new(InMemoryRepository::new()))?;
//!
//! let lamp = ThingClient::connect("urn:dev:ops:32473-lamp", &context).await?;
//! lamp.perform_action("toggle", b"").await?;
//! for token in lamp.read_property("status").await? {
//!     println!("{token}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod flatten;
pub mod form;
pub mod payload;
pub mod protocol;
pub mod repository;
pub mod subscription;
pub mod thing;
pub mod trigger;

#[cfg(test)]
mod test_support;

pub use client::{ClientContext, ThingClient};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use subscription::{SubscriptionId, SubscriptionManager, SubscriptionState};
pub use thing::ThingDescription;
