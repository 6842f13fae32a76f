//! Locally stored records related to Things
//!
//! Credentials and saved action invocations live in an external store. The client runtime
//! only reads them, except when a Thing is deleted.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::BoxError;

/// Credential used to reach a single Thing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRecord {
    pub thing_id: String,

    /// Authorization scheme, i.e. `Bearer`
    pub scheme: String,

    pub credentials: String,
}

/// A named, saved action invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomAction {
    /// Assigned by the store, `None` until saved
    pub id: Option<u64>,
    pub name: String,
    pub description: String,
    pub thing_id: String,
    pub action_id: String,
    pub payload: String,
}

/// Access to the external persistence layer
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_authorization(
        &self,
        thing_id: &str,
    ) -> Result<Option<AuthorizationRecord>, BoxError>;

    /// Creates or replaces the record of `record.thing_id`
    async fn save_authorization(&self, record: AuthorizationRecord) -> Result<(), BoxError>;

    async fn delete_authorization(&self, thing_id: &str) -> Result<(), BoxError>;

    /// Looks up a custom action by name for a given Thing
    async fn get_custom_action(
        &self,
        name: &str,
        thing_id: &str,
    ) -> Result<Option<CustomAction>, BoxError>;

    async fn get_custom_action_by_id(&self, id: u64) -> Result<Option<CustomAction>, BoxError>;

    /// Stores the action, returning it with its assigned id
    async fn save_custom_action(&self, action: CustomAction) -> Result<CustomAction, BoxError>;

    async fn list_custom_actions(&self, thing_id: &str) -> Result<Vec<CustomAction>, BoxError>;

    async fn delete_custom_actions(&self, thing_id: &str) -> Result<(), BoxError>;
}

/// Process-local [Repository]
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    authorizations: RwLock<HashMap<String, AuthorizationRecord>>,
    custom_actions: RwLock<Vec<CustomAction>>,
    next_id: AtomicU64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_authorization(
        &self,
        thing_id: &str,
    ) -> Result<Option<AuthorizationRecord>, BoxError> {
        Ok(self.authorizations.read().await.get(thing_id).cloned())
    }

    async fn save_authorization(&self, record: AuthorizationRecord) -> Result<(), BoxError> {
        self.authorizations
            .write()
            .await
            .insert(record.thing_id.clone(), record);
        Ok(())
    }

    async fn delete_authorization(&self, thing_id: &str) -> Result<(), BoxError> {
        self.authorizations.write().await.remove(thing_id);
        Ok(())
    }

    async fn get_custom_action(
        &self,
        name: &str,
        thing_id: &str,
    ) -> Result<Option<CustomAction>, BoxError> {
        Ok(self
            .custom_actions
            .read()
            .await
            .iter()
            .find(|action| action.name == name && action.thing_id == thing_id)
            .cloned())
    }

    async fn get_custom_action_by_id(&self, id: u64) -> Result<Option<CustomAction>, BoxError> {
        Ok(self
            .custom_actions
            .read()
            .await
            .iter()
            .find(|action| action.id == Some(id))
            .cloned())
    }

    async fn save_custom_action(&self, mut action: CustomAction) -> Result<CustomAction, BoxError> {
        let mut actions = self.custom_actions.write().await;

        match action.id {
            Some(id) => match actions.iter_mut().find(|saved| saved.id == Some(id)) {
                Some(saved) => *saved = action.clone(),
                None => actions.push(action.clone()),
            },
            None => {
                action.id = Some(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
                actions.push(action.clone());
            }
        }

        Ok(action)
    }

    async fn list_custom_actions(&self, thing_id: &str) -> Result<Vec<CustomAction>, BoxError> {
        Ok(self
            .custom_actions
            .read()
            .await
            .iter()
            .filter(|action| action.thing_id == thing_id)
            .cloned()
            .collect())
    }

    async fn delete_custom_actions(&self, thing_id: &str) -> Result<(), BoxError> {
        self.custom_actions
            .write()
            .await
            .retain(|action| action.thing_id != thing_id);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn custom_action(
    name: &str,
    thing_id: &str,
    action_id: &str,
    payload: &str,
) -> CustomAction {
    CustomAction {
        id: None,
        name: name.to_string(),
        description: String::new(),
        thing_id: thing_id.to_string(),
        action_id: action_id.to_string(),
        payload: payload.to_string(),
    }
}
