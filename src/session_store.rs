//! # Session Store Module
//!
//! Holds the in-progress bordering request of every user. The store is a plain keyed
//! container: it never touches the filesystem, the conversation owns the pending files.
//!
//! Sessions live in teloxide's dialogue storage, keyed by the user's id. Transitions for one
//! user are serialized with [`UserLocks`].

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::warn;
use teloxide::dispatching::dialogue::{InMemStorage, Storage};
use teloxide::types::ChatId;
use tokio::sync::OwnedMutexGuard;

use crate::dialogue::ConversationState;

/// Identifier of the user owning a session, as given by the messaging layer
pub type UserKey = u64;

/// One user's in-progress request
#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub state: ConversationState,
    /// Chat the replies go to
    pub chat_id: i64,
    pub aspect_ratio: Option<f64>,
    pub canvas_size: Option<f64>,
    /// Raw upload, owned by this session until delivered or discarded
    pub pending_image: PathBuf,
    /// File name of the upload, used to name the result
    pub source_name: Option<String>,
    pub language_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(chat_id: i64, pending_image: PathBuf) -> Self {
        Self {
            state: ConversationState::AwaitingAspect,
            chat_id,
            aspect_ratio: None,
            canvas_size: None,
            pending_image,
            source_name: None,
            language_code: None,
            created_at: Utc::now(),
        }
    }
}

/// Keyed storage for sessions, at most one per user
pub trait SessionStore: Send + Sync {
    fn get(&self, user: UserKey) -> impl Future<Output = Option<Session>> + Send;

    /// Insert or replace the session of `user`
    fn set(&self, user: UserKey, session: Session) -> impl Future<Output = ()> + Send;

    /// Remove and return the session of `user`
    fn delete(&self, user: UserKey) -> impl Future<Output = Option<Session>> + Send;

    /// Users whose session was created before `cutoff`
    fn expired(&self, cutoff: DateTime<Utc>) -> Vec<UserKey>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn dialogue_key(user: UserKey) -> ChatId {
    ChatId(user as i64)
}

/// Process-local session store backed by [`InMemStorage`]
///
/// Creation times are mirrored in a small index so expired sessions can be listed without
/// walking the dialogue storage.
pub struct InMemorySessionStore {
    dialogues: Arc<InMemStorage<Session>>,
    created: Mutex<HashMap<UserKey, DateTime<Utc>>>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self {
            dialogues: InMemStorage::new(),
            created: Mutex::new(HashMap::new()),
        }
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn created(&self) -> MutexGuard<'_, HashMap<UserKey, DateTime<Utc>>> {
        self.created.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStore for InMemorySessionStore {
    async fn get(&self, user: UserKey) -> Option<Session> {
        match Arc::clone(&self.dialogues)
            .get_dialogue(dialogue_key(user))
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!("Failed to read session of user {}: {}", user, e);
                None
            }
        }
    }

    async fn set(&self, user: UserKey, session: Session) {
        let created_at = session.created_at;
        match Arc::clone(&self.dialogues)
            .update_dialogue(dialogue_key(user), session)
            .await
        {
            Ok(()) => {
                self.created().insert(user, created_at);
            }
            Err(e) => warn!("Failed to store session of user {}: {}", user, e),
        }
    }

    async fn delete(&self, user: UserKey) -> Option<Session> {
        self.created().remove(&user);
        let session = self.get(user).await?;
        if let Err(e) = Arc::clone(&self.dialogues)
            .remove_dialogue(dialogue_key(user))
            .await
        {
            warn!("Failed to remove session of user {}: {}", user, e);
        }
        Some(session)
    }

    fn expired(&self, cutoff: DateTime<Utc>) -> Vec<UserKey> {
        self.created()
            .iter()
            .filter(|(_, created_at)| **created_at < cutoff)
            .map(|(user, _)| *user)
            .collect()
    }

    fn len(&self) -> usize {
        self.created().len()
    }
}

/// Per-user async locks serializing conversation transitions
///
/// Locks for different users are independent, so a slow composition for one user never
/// delays another user's events.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<UserKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<UserKey, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for exclusive access to `user`'s conversation
    pub async fn acquire(&self, user: UserKey) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks().entry(user).or_default());
        lock.lock_owned().await
    }

    /// Give back `user`'s lock, dropping its entry when nobody else holds or waits on it
    pub fn release(&self, user: UserKey, guard: OwnedMutexGuard<()>) {
        drop(guard);
        let mut locks = self.locks();
        // Only the map holds an idle lock; handing out a clone needs the map lock we hold
        if locks.get(&user).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&user);
        }
    }

    /// Drop locks nobody holds or waits on, returning how many were removed
    pub fn prune(&self) -> usize {
        let mut locks = self.locks();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
