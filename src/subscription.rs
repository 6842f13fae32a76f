//! Long-lived observations
//!
//! Every subscription runs on its own tokio task, owning the [Observation] it consumes. The
//! caller only waits for the observation handshake; updates reach the [ObservationCallback]
//! from the subscription task.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use time::OffsetDateTime;
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

use crate::{
    client::ThingClient,
    error::{BoxError, Result},
    protocol::{Content, Observation},
    thing::AffordanceType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a subscription observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservationKind {
    Property,
    Event,
}

impl From<ObservationKind> for AffordanceType {
    fn from(kind: ObservationKind) -> Self {
        match kind {
            ObservationKind::Property => Self::Property,
            ObservationKind::Event => Self::Event,
        }
    }
}

/// Lifecycle of a subscription
///
/// `Starting` moves to `Active` once a form accepted the observation, or to `Failed` when
/// none did. An `Active` subscription ends as `Cancelled` when the caller stops it, or as
/// `Failed` when its observation stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    Starting,
    Active,
    Failed,
    Cancelled,
}

impl SubscriptionState {
    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub thing_id: String,
    pub interaction: String,
    pub kind: ObservationKind,
    pub state: SubscriptionState,
    pub started_at: OffsetDateTime,
}

/// Receiver of the updates of a subscription.
///
/// Errors and panics are logged and never end the subscription.
#[async_trait]
pub trait ObservationCallback: Send + Sync + 'static {
    async fn on_update(&self, update: Content) -> Result<(), BoxError>;
}

#[async_trait]
impl<F, Fut> ObservationCallback for F
where
    F: Fn(Content) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn on_update(&self, update: Content) -> Result<(), BoxError> {
        self(update).await
    }
}

struct Entry {
    info: SubscriptionInfo,
    state: watch::Receiver<SubscriptionState>,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Entry {
    fn is_finished(&self) -> bool {
        self.state.borrow().is_finished()
    }

    fn snapshot(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            state: *self.state.borrow(),
            ..self.info.clone()
        }
    }
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    entries: Mutex<HashMap<SubscriptionId, Entry>>,
}

/// Owner of all the subscriptions of a [ClientContext](crate::client::ClientContext)
///
/// Dropping the last handle stops the subscription tasks. A callback holding a
/// [ThingClient], like an [ActionTrigger](crate::trigger::ActionTrigger), keeps its own
/// manager alive: such subscriptions only stop through [cancel](Self::cancel) or
/// [shutdown](Self::shutdown).
///
/// Finished subscriptions stay listed until [remove](Self::remove) or [prune](Self::prune).
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("subscriptions", &self.entries().len())
            .finish()
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Observes the `kind` affordance `name` of `client`, feeding `callback`.
    ///
    /// Returns once the observation is established, or with the error of the last attempt.
    /// A subscription that could not start stays listed as [SubscriptionState::Failed].
    pub async fn subscribe<C>(
        &self,
        client: &ThingClient,
        kind: ObservationKind,
        name: &str,
        callback: C,
    ) -> Result<SubscriptionId>
    where
        C: ObservationCallback,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (state, state_rx) = watch::channel(SubscriptionState::Starting);
        let info = SubscriptionInfo {
            id,
            thing_id: client.id().to_string(),
            interaction: name.to_string(),
            kind,
            state: SubscriptionState::Starting,
            started_at: OffsetDateTime::now_utc(),
        };
        self.entries().insert(
            id,
            Entry {
                info,
                state: state_rx,
                cancel: None,
                task: None,
            },
        );

        let updates = match client.open_observation(kind.into(), name).await {
            Ok(updates) => updates,
            Err(err) => {
                state.send_replace(SubscriptionState::Failed);
                warn!(
                    subscription = %id,
                    thing_id = client.id(),
                    interaction = name,
                    "subscription failed to start"
                );
                return Err(err);
            }
        };

        let (cancel, cancelled) = oneshot::channel();
        let mut entries = self.entries();
        match entries.get_mut(&id) {
            Some(entry) => {
                state.send_replace(SubscriptionState::Active);
                entry.cancel = Some(cancel);
                entry.task = Some(tokio::spawn(run(id, updates, callback, cancelled, state)));
                debug!(
                    subscription = %id,
                    thing_id = client.id(),
                    interaction = name,
                    "subscription active"
                );
            }
            None => debug!(subscription = %id, "subscription removed while starting"),
        }

        Ok(id)
    }

    pub fn state(&self, id: SubscriptionId) -> Option<SubscriptionState> {
        self.entries().get(&id).map(|entry| *entry.state.borrow())
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<SubscriptionInfo> {
        self.entries().get(&id).map(Entry::snapshot)
    }

    /// All known subscriptions, ordered by id
    pub fn list(&self) -> Vec<SubscriptionInfo> {
        let mut subscriptions: Vec<_> = self.entries().values().map(Entry::snapshot).collect();
        subscriptions.sort_by_key(|info| info.id);
        subscriptions
    }

    /// Waits until the subscription is finished, returning its final state
    pub async fn finished(&self, id: SubscriptionId) -> Option<SubscriptionState> {
        let mut state = self.entries().get(&id)?.state.clone();
        let finished = state
            .wait_for(SubscriptionState::is_finished)
            .await
            .map(|state| *state);

        Some(finished.unwrap_or_else(|_| *state.borrow()))
    }

    /// Stops an active subscription.
    ///
    /// Once this returns the callback is not invoked anymore and the observation is released.
    /// Returns `true` if the subscription ended as [SubscriptionState::Cancelled].
    pub async fn cancel(&self, id: SubscriptionId) -> bool {
        let (cancel, task, state) = match self.entries().get_mut(&id) {
            Some(entry) => (entry.cancel.take(), entry.task.take(), entry.state.clone()),
            None => return false,
        };
        let Some(task) = task else {
            return false;
        };

        if let Some(cancel) = cancel {
            // Fails only if the task already stopped
            let _ = cancel.send(());
        }
        if let Err(err) = task.await {
            error!(subscription = %id, %err, "subscription task failed");
        }

        let state = *state.borrow();
        state == SubscriptionState::Cancelled
    }

    /// Cancels the subscription if needed and forgets it
    pub async fn remove(&self, id: SubscriptionId) -> Option<SubscriptionInfo> {
        self.cancel(id).await;
        self.entries().remove(&id).map(|entry| entry.snapshot())
    }

    /// Forgets the finished subscriptions, returning how many were dropped
    pub fn prune(&self) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_finished());
        before - entries.len()
    }

    /// Cancels every active subscription
    pub async fn shutdown(&self) {
        let ids: Vec<_> = self.entries().keys().copied().collect();
        debug!(subscriptions = ids.len(), "shutting down subscriptions");

        for id in ids {
            self.cancel(id).await;
        }
    }
}

async fn run<C>(
    id: SubscriptionId,
    mut updates: Observation,
    callback: C,
    mut cancelled: oneshot::Receiver<()>,
    state: watch::Sender<SubscriptionState>,
) where
    C: ObservationCallback,
{
    loop {
        tokio::select! {
            biased;

            _ = &mut cancelled => {
                state.send_replace(SubscriptionState::Cancelled);
                debug!(subscription = %id, "subscription cancelled");
                break;
            }
            update = updates.next() => match update {
                Some(Ok(update)) => deliver(id, &callback, update).await,
                Some(Err(err)) => {
                    state.send_replace(SubscriptionState::Failed);
                    warn!(subscription = %id, %err, "observation failed");
                    break;
                }
                None => {
                    state.send_replace(SubscriptionState::Failed);
                    debug!(subscription = %id, "observation ended");
                    break;
                }
            },
        }
    }
}

async fn deliver<C>(id: SubscriptionId, callback: &C, update: Content)
where
    C: ObservationCallback,
{
    match AssertUnwindSafe(callback.on_update(update))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(subscription = %id, %err, "callback failed"),
        Err(_) => error!(subscription = %id, "callback panicked"),
    }
}
