//! Client side representation of a Thing
//!
//! A [ThingClient] combines the Thing Description, the per-thing credential and the protocol
//! bindings. Every interaction tries the forms of its affordance in declaration order and
//! stops at the first one that works.

use std::{future::Future, sync::Arc};

use tracing::{debug, trace, warn};

use crate::{
    auth::{AuthHeader, AuthorizationResolver},
    config::ClientConfig,
    directory::{Directory, HttpDirectory},
    error::{Error, FormFailure, Result, TransportError},
    flatten::{flatten, FlatToken},
    form::{Endpoint, FormSelector},
    protocol::{Content, Observation, Transport, Transports},
    repository::Repository,
    subscription::{ObservationCallback, ObservationKind, SubscriptionId, SubscriptionManager},
    thing::{AffordanceType, ThingDescription},
};

/// Collaborators shared by every [ThingClient]
#[derive(Clone)]
pub struct ClientContext {
    directory: Arc<dyn Directory>,
    repository: Arc<dyn Repository>,
    transports: Transports,
    subscriptions: SubscriptionManager,
}

impl ClientContext {
    /// Reaches the directory and the Things as described by `config`
    pub fn new(config: &ClientConfig, repository: Arc<dyn Repository>) -> Result<Self> {
        let directory = Arc::new(HttpDirectory::new(config)?);
        let transports = Transports::new(config)?;

        Ok(Self::from_parts(directory, repository, transports))
    }

    pub fn from_parts(
        directory: Arc<dyn Directory>,
        repository: Arc<dyn Repository>,
        transports: Transports,
    ) -> Self {
        Self {
            directory,
            repository,
            transports,
            subscriptions: SubscriptionManager::new(),
        }
    }

    #[inline]
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    #[inline]
    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    #[inline]
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }
}

/// A remote Thing, described by its cached Thing Description
pub struct ThingClient {
    thing_id: String,
    description: Arc<ThingDescription>,
    selector: FormSelector,
    auth: AuthorizationResolver,
    context: ClientContext,
}

impl ThingClient {
    /// Fetches the description of `thing_id`, failing if the directory does not know it
    pub async fn connect(thing_id: &str, context: &ClientContext) -> Result<Self> {
        let description = context.directory.fetch(thing_id).await?;
        debug!(thing_id, title = %description.title, "thing description fetched");

        Ok(Self::from_description(thing_id, description, context))
    }

    /// A client for an already known description
    pub fn from_description(
        thing_id: &str,
        description: ThingDescription,
        context: &ClientContext,
    ) -> Self {
        Self {
            thing_id: thing_id.to_string(),
            selector: FormSelector::new(description.base.as_deref()),
            description: Arc::new(description),
            auth: AuthorizationResolver::new(Arc::clone(&context.repository)),
            context: context.clone(),
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.thing_id
    }

    #[inline]
    pub fn description(&self) -> &ThingDescription {
        &self.description
    }

    #[inline]
    pub fn has_action(&self, action_id: &str) -> bool {
        self.description.has_action(action_id)
    }

    #[inline]
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.context.subscriptions
    }

    pub(crate) fn repository(&self) -> &Arc<dyn Repository> {
        &self.context.repository
    }

    /// Runs `attempt` on each usable form of the affordance until one succeeds
    async fn with_fallback<T, F, Fut>(
        &self,
        ty: AffordanceType,
        name: &str,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut(Arc<dyn Transport>, Endpoint, Option<AuthHeader>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let affordance = self
            .description
            .interaction(ty, name)
            .ok_or_else(|| Error::UnknownInteraction {
                ty,
                name: name.to_string(),
            })?;
        let endpoints = self.selector.select(&affordance.forms);
        let auth = self.auth.resolve(&self.thing_id).await;

        let mut failures = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let href = endpoint.url.to_string();
            let transport = self.context.transports.get(endpoint.protocol);

            match attempt(transport, endpoint, auth.clone()).await {
                Ok(value) => {
                    trace!(
                        thing_id = %self.thing_id,
                        interaction = name,
                        %href,
                        "form succeeded"
                    );
                    return Ok(value);
                }
                Err(error) => {
                    debug!(
                        thing_id = %self.thing_id,
                        interaction = name,
                        %href,
                        %error,
                        "form failed, trying the next one"
                    );
                    failures.push(FormFailure { href, error });
                }
            }
        }

        warn!(
            thing_id = %self.thing_id,
            interaction = name,
            %ty,
            attempts = failures.len(),
            "no form succeeded"
        );
        Err(Error::AllFormsFailed {
            ty,
            name: name.to_string(),
            failures,
        })
    }

    /// Invokes the action `action_id` with the already serialized `payload`
    pub async fn perform_action(&self, action_id: &str, payload: &[u8]) -> Result<()> {
        self.with_fallback(
            AffordanceType::Action,
            action_id,
            move |transport, endpoint, auth| async move {
                transport.invoke(&endpoint, auth.as_ref(), payload).await
            },
        )
        .await
    }

    /// Reads the raw value of a property
    pub async fn read_property_content(&self, property_id: &str) -> Result<Content> {
        self.with_fallback(
            AffordanceType::Property,
            property_id,
            |transport, endpoint, auth| async move {
                transport.read_once(&endpoint, auth.as_ref()).await
            },
        )
        .await
    }

    /// Reads a property, flattened for display.
    ///
    /// JSON bodies are flattened as decoded, any other body becomes a single text token.
    pub async fn read_property(&self, property_id: &str) -> Result<Vec<FlatToken>> {
        let content = self.read_property_content(property_id).await?;

        Ok(flatten(&content.decode().into_value(), None))
    }

    /// Establishes an observation of a property or an event.
    ///
    /// The remaining forms are not tried once one of them accepted the observation.
    pub async fn open_observation(&self, ty: AffordanceType, name: &str) -> Result<Observation> {
        self.with_fallback(ty, name, |transport, endpoint, auth| async move {
            transport.observe(&endpoint, auth.as_ref()).await
        })
        .await
    }

    pub async fn observe_property<C>(
        &self,
        property_id: &str,
        callback: C,
    ) -> Result<SubscriptionId>
    where
        C: ObservationCallback,
    {
        self.context
            .subscriptions
            .subscribe(self, ObservationKind::Property, property_id, callback)
            .await
    }

    pub async fn observe_event<C>(&self, event_id: &str, callback: C) -> Result<SubscriptionId>
    where
        C: ObservationCallback,
    {
        self.context
            .subscriptions
            .subscribe(self, ObservationKind::Event, event_id, callback)
            .await
    }

    /// Removes the Thing.
    ///
    /// The local credential and saved actions are deleted before the directory entry, so they
    /// are gone even when the directory call fails.
    pub async fn delete(&self) -> Result<()> {
        let repository = &self.context.repository;
        repository
            .delete_authorization(&self.thing_id)
            .await
            .map_err(Error::Repository)?;
        repository
            .delete_custom_actions(&self.thing_id)
            .await
            .map_err(Error::Repository)?;
        debug!(thing_id = %self.thing_id, "local records deleted");

        self.context.directory.delete(&self.thing_id).await
    }
}
