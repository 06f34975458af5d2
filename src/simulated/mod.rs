//! Simulated Persistence Store
//!
//! Stands in for backend reads and writes while the client runs in a demo or
//! admin-bypass mode. State lives in two key/value stores:
//!
//! - **durable**: survives across sessions; holds the mode flags and every
//!   record written in elevated mode
//! - **session**: cleared when the session ends; holds records written in
//!   session mode plus user field overrides
//!
//! | Mode     | Readers                          | Writers          |
//! |----------|----------------------------------|------------------|
//! | Off      | empty                            | no-op            |
//! | Elevated | durable                          | durable          |
//! | Session  | durable overlaid with session    | session          |
//!
//! The mode is re-read from the durable flags on every call; the façade
//! itself holds no mode state.

pub mod mode;
pub mod records;

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::remote::RemoteUserClient;
use crate::storage::{KeyValueStore, MemoryStore};
use crate::types::{Result, VibeError};

pub use mode::{StoreMode, AUTH_BYPASS_KEY, MODE_TAG_KEY};
pub use records::{CancelledEvent, CancelledEvents, MemoryPost, MergeStrategy, Record};

/// What `update_simulated_user` did with a patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserUpdate {
    /// Stored as a session override
    Overridden,
    /// Sent to the remote user API
    Persisted,
    /// Simulation is off; nothing happened
    Ignored,
}

pub struct SimulatedStore {
    durable: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    merge: MergeStrategy,
}

impl SimulatedStore {
    pub fn new(durable: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self {
            durable,
            session,
            merge: MergeStrategy::default(),
        }
    }

    /// Store over two fresh in-memory backends
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    pub fn with_merge_strategy(mut self, merge: MergeStrategy) -> Self {
        self.merge = merge;
        self
    }

    pub fn merge_strategy(&self) -> MergeStrategy {
        self.merge
    }

    // =========================================================================
    // Mode
    // =========================================================================

    pub fn mode(&self) -> StoreMode {
        StoreMode::from_flags(
            self.is_auth_bypassed(),
            self.durable.get_item(MODE_TAG_KEY).as_deref(),
        )
    }

    pub fn is_auth_bypassed(&self) -> bool {
        self.durable.get_item(AUTH_BYPASS_KEY).as_deref() == Some("true")
    }

    pub fn is_elevated_mode(&self) -> bool {
        self.mode() == StoreMode::Elevated
    }

    pub fn is_session_mode(&self) -> bool {
        self.mode() == StoreMode::Session
    }

    /// Switch to elevated mode. Fails while session mode is active.
    pub fn enter_elevated(&self) -> Result<()> {
        self.enter(StoreMode::Elevated)
    }

    /// Switch to session mode. Fails while elevated mode is active.
    pub fn enter_session(&self) -> Result<()> {
        self.enter(StoreMode::Session)
    }

    /// Leave whichever mode is active
    pub fn exit(&self) -> Result<()> {
        self.clear_simulated_session()
    }

    fn enter(&self, to: StoreMode) -> Result<()> {
        let from = self.mode();
        if !from.can_transition_to(to) {
            return Err(VibeError::ModeTransition { from, to });
        }
        if from == to {
            return Ok(());
        }

        if let Some(tag) = to.tag() {
            self.durable.set_item(AUTH_BYPASS_KEY, "true")?;
            self.durable.set_item(MODE_TAG_KEY, tag)?;
        }
        info!(mode = %to, "Simulation mode entered");
        Ok(())
    }

    /// Remove the mode flags and every key in session storage.
    ///
    /// Durable records written in elevated mode are kept.
    pub fn clear_simulated_session(&self) -> Result<()> {
        self.durable.remove_item(AUTH_BYPASS_KEY)?;
        self.durable.remove_item(MODE_TAG_KEY)?;
        for key in self.session.keys() {
            self.session.remove_item(&key)?;
        }
        info!("Simulated session cleared");
        Ok(())
    }

    // =========================================================================
    // Record plumbing
    // =========================================================================

    fn writable(&self) -> Option<&dyn KeyValueStore> {
        match self.mode() {
            StoreMode::Off => None,
            StoreMode::Elevated => Some(self.durable.as_ref()),
            StoreMode::Session => Some(self.session.as_ref()),
        }
    }

    fn load<T: DeserializeOwned + Default>(store: &dyn KeyValueStore, record: Record) -> T {
        store
            .get_item(record.key())
            .and_then(|raw| records::decode(record, &raw))
            .unwrap_or_default()
    }

    fn read<T, M>(&self, record: Record, merge: M) -> T
    where
        T: DeserializeOwned + Default,
        M: FnOnce(T, T) -> T,
    {
        match (self.mode(), self.merge) {
            (StoreMode::Off, _) => T::default(),
            (StoreMode::Elevated, _) => Self::load(self.durable.as_ref(), record),
            (StoreMode::Session, MergeStrategy::ActiveOnly) => {
                Self::load(self.session.as_ref(), record)
            }
            (StoreMode::Session, MergeStrategy::Overlay) => merge(
                Self::load(self.durable.as_ref(), record),
                Self::load(self.session.as_ref(), record),
            ),
        }
    }

    /// Load the record from the active mode's store, let `change` edit it,
    /// and write it back if `change` reports a modification.
    fn modify<T, C>(&self, record: Record, change: C) -> Result<()>
    where
        T: DeserializeOwned + Serialize + Default,
        C: FnOnce(&mut T) -> bool,
    {
        let Some(store) = self.writable() else {
            debug!(key = record.key(), "Simulation off, write skipped");
            return Ok(());
        };

        let mut data: T = Self::load(store, record);
        if change(&mut data) {
            store.set_item(record.key(), &records::encode(&data)?)?;
        }
        Ok(())
    }

    fn read_ids(&self, record: Record) -> Vec<String> {
        self.read(record, records::union_ids)
    }

    fn insert_id(&self, record: Record, id: &str) -> Result<()> {
        self.modify(record, |ids: &mut Vec<String>| {
            if ids.iter().any(|existing| existing == id) {
                false
            } else {
                ids.push(id.to_string());
                true
            }
        })
    }

    fn remove_id(&self, record: Record, id: &str) -> Result<()> {
        self.modify(record, |ids: &mut Vec<String>| {
            let before = ids.len();
            ids.retain(|existing| existing != id);
            ids.len() != before
        })
    }

    // =========================================================================
    // Deleted events
    // =========================================================================

    pub fn get_deleted_event_ids(&self) -> Vec<String> {
        self.read_ids(Record::DeletedEvents)
    }

    pub fn delete_event(&self, event_id: &str) -> Result<()> {
        self.insert_id(Record::DeletedEvents, event_id)
    }

    pub fn is_event_deleted(&self, event_id: &str) -> bool {
        self.get_deleted_event_ids().iter().any(|id| id == event_id)
    }

    // =========================================================================
    // Groups
    // =========================================================================

    pub fn get_joined_groups(&self) -> Vec<String> {
        self.read_ids(Record::JoinedGroups)
    }

    pub fn join_group(&self, group_id: &str) -> Result<()> {
        self.insert_id(Record::JoinedGroups, group_id)
    }

    pub fn is_group_joined(&self, group_id: &str) -> bool {
        self.get_joined_groups().iter().any(|id| id == group_id)
    }

    pub fn get_pending_group_requests(&self) -> Vec<String> {
        self.read_ids(Record::PendingGroupRequests)
    }

    pub fn add_pending_group_request(&self, group_id: &str) -> Result<()> {
        self.insert_id(Record::PendingGroupRequests, group_id)
    }

    /// Withdraw a request. Only the active mode's list is touched.
    pub fn remove_pending_group_request(&self, group_id: &str) -> Result<()> {
        self.remove_id(Record::PendingGroupRequests, group_id)
    }

    // =========================================================================
    // Cancelled events
    // =========================================================================

    pub fn get_cancelled_events(&self) -> CancelledEvents {
        self.read(Record::CancelledEvents, |mut durable: CancelledEvents, session| {
            durable.extend(session);
            durable
        })
    }

    pub fn cancel_event(&self, event_id: &str, message: &str) -> Result<()> {
        let marker = CancelledEvent {
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        self.modify(Record::CancelledEvents, |events: &mut CancelledEvents| {
            events.insert(event_id.to_string(), marker);
            true
        })
    }

    // =========================================================================
    // Memory posts
    // =========================================================================

    /// Posts, most recent first, one per id
    pub fn get_memory_posts(&self) -> Vec<MemoryPost> {
        self.read(Record::MemoryPosts, records::concat_posts)
    }

    pub fn save_memory_post(&self, post: MemoryPost) -> Result<()> {
        self.modify(Record::MemoryPosts, |posts: &mut Vec<MemoryPost>| {
            posts.insert(0, post);
            true
        })
    }

    pub fn delete_memory_post(&self, post_id: &str) -> Result<()> {
        self.modify(Record::MemoryPosts, |posts: &mut Vec<MemoryPost>| {
            let before = posts.len();
            posts.retain(|post| post.id != post_id);
            posts.len() != before
        })
    }

    pub fn update_memory_post(&self, post_id: &str, patch: &Map<String, Value>) -> Result<()> {
        self.modify(Record::MemoryPosts, |posts: &mut Vec<MemoryPost>| {
            match posts.iter_mut().find(|post| post.id == post_id) {
                Some(post) => {
                    post.apply_patch(patch);
                    true
                }
                None => false,
            }
        })
    }

    // =========================================================================
    // User overrides
    // =========================================================================

    /// Field overrides for the current user; empty outside session mode
    pub fn get_temporary_user_updates(&self) -> Map<String, Value> {
        if !self.is_session_mode() {
            return Map::new();
        }
        Self::load(self.session.as_ref(), Record::UserUpdates)
    }

    /// Merge `patch` into the session overrides. No-op outside session mode.
    pub fn set_temporary_user_updates(&self, patch: &Map<String, Value>) -> Result<()> {
        if !self.is_session_mode() {
            return Ok(());
        }
        self.modify(Record::UserUpdates, |overrides: &mut Map<String, Value>| {
            for (field, value) in patch {
                overrides.insert(field.clone(), value.clone());
            }
            true
        })
    }

    /// Apply a profile edit the way the active mode dictates.
    ///
    /// Session mode records an override, elevated mode calls the remote API
    /// (whose errors are returned as-is), and off mode does nothing.
    pub async fn update_simulated_user(
        &self,
        patch: &Map<String, Value>,
        remote: &dyn RemoteUserClient,
    ) -> Result<UserUpdate> {
        match self.mode() {
            StoreMode::Session => {
                self.set_temporary_user_updates(patch)?;
                Ok(UserUpdate::Overridden)
            }
            StoreMode::Elevated => {
                remote.update_current_user(patch).await?;
                Ok(UserUpdate::Persisted)
            }
            StoreMode::Off => Ok(UserUpdate::Ignored),
        }
    }

    /// Overlay session overrides on `user`. Unchanged outside session mode.
    pub fn apply_demo_overrides(&self, user: Map<String, Value>) -> Map<String, Value> {
        if !self.is_session_mode() {
            return user;
        }

        let mut merged = user;
        merged.extend(self.get_temporary_user_updates());
        merged
    }
}

// =============================================================================
// Tests
// =============================================================================
