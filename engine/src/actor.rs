//! Actor-identity resolution.
//!
//! The authenticated actor may not be known yet when a calculation starts
//! (auth resolves concurrently with the first edits). Dispatches wait for it
//! with bounded polling and then proceed with a null identity rather than
//! dropping the request.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};

pub const ACTOR_POLL_INTERVAL: Duration = Duration::from_millis(150);
pub const ACTOR_POLL_CEILING: Duration = Duration::from_secs(5);

/// The authenticated actor attached to dispatch requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Shared slot for the actor identity, filled by the host when auth
/// completes. Cheap to clone; all clones observe the same slot.
#[derive(Debug, Clone, Default)]
pub struct ActorResolver {
    slot: Arc<RwLock<Option<ActorIdentity>>>,
    interval: Option<Duration>,
    ceiling: Option<Duration>,
}

impl ActorResolver {
    #[must_use]
    pub fn new(interval: Duration, ceiling: Duration) -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
            interval: Some(interval),
            ceiling: Some(ceiling),
        }
    }

    /// Publish the resolved identity. Later calls overwrite earlier ones.
    pub fn set(&self, identity: ActorIdentity) {
        if let Ok(mut slot) = self.slot.write() {
            *slot = Some(identity);
        }
    }

    #[must_use]
    pub fn get(&self) -> Option<ActorIdentity> {
        self.slot.read().ok().and_then(|slot| slot.clone())
    }

    /// Wait for the identity with bounded polling.
    ///
    /// Polls every `interval` until the identity is available or `ceiling`
    /// elapses, then returns `None` so the dispatch proceeds anonymously.
    pub async fn resolve(&self) -> Option<ActorIdentity> {
        let interval = self.interval.unwrap_or(ACTOR_POLL_INTERVAL);
        let ceiling = self.ceiling.unwrap_or(ACTOR_POLL_CEILING);
        let deadline = Instant::now() + ceiling;
        loop {
            if let Some(identity) = self.get() {
                return Some(identity);
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    ceiling_ms = ceiling.as_millis(),
                    "actor identity unresolved within ceiling; dispatching without one"
                );
                return None;
            }
            sleep(interval.min(deadline - Instant::now())).await;
        }
    }
}
