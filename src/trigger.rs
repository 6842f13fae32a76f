//! Actions run when an observation fires

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    client::ThingClient,
    error::{BoxError, Error, Result},
    protocol::Content,
    subscription::ObservationCallback,
};

/// An [ObservationCallback] performing an action of `target`
///
/// Subscriptions fed to a trigger keep their manager alive, they end with
/// [SubscriptionManager::cancel](crate::subscription::SubscriptionManager::cancel) or
/// [SubscriptionManager::shutdown](crate::subscription::SubscriptionManager::shutdown).
#[derive(Clone)]
pub struct ActionTrigger {
    target: Arc<ThingClient>,
    action_id: String,
    payload: Vec<u8>,
    condition: Option<String>,
}

impl ActionTrigger {
    pub fn new(target: Arc<ThingClient>, action_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            target,
            action_id: action_id.into(),
            payload,
            condition: None,
        }
    }

    /// Looks up `name` as a custom action saved for `target`, then as a plain action of it.
    ///
    /// Plain actions run without payload. Returns `None` when `name` matches neither.
    pub async fn resolve(target: Arc<ThingClient>, name: &str) -> Result<Option<Self>> {
        let custom = target
            .repository()
            .get_custom_action(name, target.id())
            .await
            .map_err(Error::Repository)?;

        let trigger = match custom {
            Some(custom) => Some(Self::new(
                target,
                custom.action_id,
                custom.payload.into_bytes(),
            )),
            None if target.has_action(name) => Some(Self::new(target, name, Vec::new())),
            None => None,
        };
        Ok(trigger)
    }

    /// Only fires when the text of the update equals `condition`
    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    #[inline]
    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

#[async_trait]
impl ObservationCallback for ActionTrigger {
    async fn on_update(&self, update: Content) -> Result<(), BoxError> {
        if let Some(condition) = &self.condition {
            if update.text() != condition.as_str() {
                return Ok(());
            }
        }

        debug!(
            thing_id = self.target.id(),
            action = %self.action_id,
            "triggering action"
        );
        self.target
            .perform_action(&self.action_id, &self.payload)
            .await
            .map_err(BoxError::from)
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::{
        repository::{custom_action, Repository},
        subscription::SubscriptionState,
        test_support::{description, Fixture, MockDirectory},
    };

    fn fixture() -> Fixture {
        let directory = MockDirectory::with(
            "sensor",
            description(json!({
                "title": "Sensor",
                "properties": {
                    "motion": { "forms": [{ "href": "http://sensor/motion" }] }
                }
            })),
        );
        directory.insert(
            "lamp",
            description(json!({
                "title": "Lamp",
                "actions": {
                    "toggle": { "forms": [{ "href": "http://lamp/toggle" }] },
                    "dim": { "forms": [{ "href": "http://lamp/dim" }] }
                }
            })),
        );

        Fixture::new(directory)
    }

    async fn lamp(fixture: &Fixture) -> Arc<ThingClient> {
        let client = ThingClient::connect("lamp", &fixture.context)
            .await
            .unwrap();
        Arc::new(client)
    }

    #[tokio::test]
    async fn resolve_custom_action_first() {
        let fixture = fixture();
        fixture
            .repository
            .save_custom_action(custom_action("toggle", "lamp", "dim", r#"{"level":3}"#))
            .await
            .unwrap();
        fixture
            .repository
            .save_custom_action(custom_action("night", "sensor", "dim", "1"))
            .await
            .unwrap();
        let lamp = lamp(&fixture).await;

        let trigger = ActionTrigger::resolve(Arc::clone(&lamp), "toggle")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trigger.action_id(), "dim");
        assert_eq!(trigger.payload(), br#"{"level":3}"#);

        let trigger = ActionTrigger::resolve(Arc::clone(&lamp), "dim")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trigger.action_id(), "dim");
        assert!(trigger.payload().is_empty());

        // Saved for another thing
        assert!(ActionTrigger::resolve(lamp, "night")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn condition_filters_updates() {
        let fixture = fixture();
        let trigger = ActionTrigger::new(lamp(&fixture).await, "toggle", Vec::new()).when("on");

        trigger
            .on_update(Content::new(None, "off"))
            .await
            .unwrap();
        assert!(fixture.transport.attempts().is_empty());

        trigger.on_update(Content::new(None, "on")).await.unwrap();
        assert_eq!(fixture.transport.urls(), ["http://lamp/toggle"]);
    }

    #[tokio::test]
    async fn failed_action_is_a_callback_error() {
        let fixture = fixture();
        fixture.transport.fail("http://lamp/toggle");
        let trigger = ActionTrigger::new(lamp(&fixture).await, "toggle", Vec::new());

        let err = trigger.on_update(Content::new(None, "")).await.unwrap_err();

        assert!(err.downcast_ref::<Error>().is_some());
    }

    #[tokio::test]
    async fn property_change_triggers_action() {
        let fixture = fixture();
        let feed = fixture.transport.feed("http://sensor/motion");
        let sensor = ThingClient::connect("sensor", &fixture.context)
            .await
            .unwrap();
        let trigger = ActionTrigger::resolve(lamp(&fixture).await, "toggle")
            .await
            .unwrap()
            .unwrap()
            .when("detected");

        let id = sensor.observe_property("motion", trigger).await.unwrap();
        for update in ["idle", "detected"] {
            feed.unbounded_send(Ok(Content::new(None, update))).unwrap();
        }
        drop(feed);

        let manager = fixture.context.subscriptions();
        assert_eq!(manager.finished(id).await, Some(SubscriptionState::Failed));
        let invoked: Vec<_> = fixture
            .transport
            .attempts()
            .into_iter()
            .filter(|a| a.operation == "invoke")
            .map(|a| a.url)
            .collect();
        assert_eq!(invoked, ["http://lamp/toggle"]);
    }
}
