use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::actions::{apply, Action};

/// Name the detector reports when it cannot identify anyone.
pub const UNKNOWN_NAME: &str = "Unknown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatEntry {
    pub role: Role,
    pub message: String,
}

/// Result of one detection. Name and descriptive text travel together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Detection {
    pub name: String,
    pub info: String,
}

impl Detection {
    pub fn is_identified(&self) -> bool {
        !self.name.is_empty() && self.name != UNKNOWN_NAME
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Last time an action was stored. Idle sessions are pruned from this.
    pub last_active: DateTime<Utc>,
    pub chat_history: Vec<ChatEntry>,
    pub detection: Option<Detection>,
    pub selected_sample: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_active: now,
            chat_history: Vec::new(),
            detection: None,
            selected_sample: None,
        }
    }

    /// Name of the identified person, if chat is unlocked.
    pub fn chat_subject(&self) -> Option<&str> {
        self.detection
            .as_ref()
            .filter(|d| d.is_identified())
            .map(|d| d.name.as_str())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl SessionStore {
    pub async fn create(&self) -> Session {
        let session = Session::new();
        self.inner.write().await.insert(session.id, session.clone());
        session
    }

    pub async fn list(&self) -> Vec<Uuid> {
        let sessions = self.inner.read().await;
        let mut ids: Vec<(DateTime<Utc>, Uuid)> =
            sessions.values().map(|s| (s.created_at, s.id)).collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    pub async fn get(&self, id: Uuid) -> Option<Session> {
        self.inner.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.inner.write().await.remove(&id).is_some()
    }

    /// Applies `action` to the latest snapshot of session `id` and stores the result.
    pub async fn dispatch(&self, id: Uuid, action: Action) -> Option<Session> {
        self.dispatch_all(id, [action]).await
    }

    /// Applies `actions` in order under one write lock, storing only the final snapshot.
    pub async fn dispatch_all(&self, id: Uuid, actions: impl IntoIterator<Item = Action>) -> Option<Session> {
        let mut sessions = self.inner.write().await;
        let current = sessions.get(&id)?;
        let mut next = actions.into_iter().fold(current.clone(), |s, a| apply(&s, a));
        next.last_active = Utc::now();
        sessions.insert(id, next.clone());
        Some(next)
    }

    /// Drops sessions with no stored action since `cutoff`. Returns how many went.
    pub async fn prune_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.inner.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_active >= cutoff);
        before - sessions.len()
    }
}

/// Periodically prunes sessions idle for longer than `idle_ttl`.
pub fn spawn_idle_sweep(store: SessionStore, idle_ttl: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let Ok(ttl) = chrono::Duration::from_std(idle_ttl) else {
            tracing::warn!("session idle ttl out of range, sweep disabled");
            return;
        };
        let mut ticker = tokio::time::interval((idle_ttl / 4).max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            let removed = store.prune_idle(Utc::now() - ttl).await;
            if removed > 0 {
                tracing::info!(removed, "pruned idle sessions");
            }
        }
    })
}
