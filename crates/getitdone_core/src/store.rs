//! crates/getitdone_core/src/store.rs
//!
//! The entity store: one in-process collection per entity kind, guarded by a single
//! async read/write lock.
//!
//! Every mutating operation runs inside [`EntityStore::write`], which holds the
//! write lock for its whole duration. Collections record an undo journal while the
//! closure runs; the write commits only if the closure succeeds and the backend
//! persists the change set, otherwise the journal is replayed backwards and no
//! partial state is ever visible to readers.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::domain::{Application, Message, Notification, Rating, Task, UserAccount};
use crate::error::{WorkflowError, WorkflowResult};
use crate::ports::{PortResult, StoreBackend};

//=========================================================================================
// Entities and change records
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    User,
    Task,
    Application,
    Message,
    Notification,
    Rating,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::User => "User",
            Self::Task => "Task",
            Self::Application => "Application",
            Self::Message => "Message",
            Self::Notification => "Notification",
            Self::Rating => "Rating",
        };
        f.write_str(name)
    }
}

/// A full row of any kind, as handed to the backend.
#[derive(Debug, Clone)]
pub enum Record {
    User(UserAccount),
    Task(Task),
    Application(Application),
    Message(Message),
    Notification(Notification),
    Rating(Rating),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::User(_) => EntityKind::User,
            Self::Task(_) => EntityKind::Task,
            Self::Application(_) => EntityKind::Application,
            Self::Message(_) => EntityKind::Message,
            Self::Notification(_) => EntityKind::Notification,
            Self::Rating(_) => EntityKind::Rating,
        }
    }
}

/// Rows touched by one committed write: their current value, or their deletion.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub upserts: Vec<Record>,
    pub deletes: Vec<(EntityKind, i64)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

pub trait Entity: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> i64;
    fn assign_id(&mut self, id: i64);
    fn into_record(self) -> Record;
}

impl Entity for UserAccount {
    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> i64 {
        self.profile.id
    }
    fn assign_id(&mut self, id: i64) {
        self.profile.id = id;
    }
    fn into_record(self) -> Record {
        Record::User(self)
    }
}

impl Entity for Task {
    const KIND: EntityKind = EntityKind::Task;

    fn id(&self) -> i64 {
        self.id
    }
    fn assign_id(&mut self, id: i64) {
        self.id = id;
    }
    fn into_record(self) -> Record {
        Record::Task(self)
    }
}

impl Entity for Application {
    const KIND: EntityKind = EntityKind::Application;

    fn id(&self) -> i64 {
        self.id
    }
    fn assign_id(&mut self, id: i64) {
        self.id = id;
    }
    fn into_record(self) -> Record {
        Record::Application(self)
    }
}

impl Entity for Message {
    const KIND: EntityKind = EntityKind::Message;

    fn id(&self) -> i64 {
        self.id
    }
    fn assign_id(&mut self, id: i64) {
        self.id = id;
    }
    fn into_record(self) -> Record {
        Record::Message(self)
    }
}

impl Entity for Notification {
    const KIND: EntityKind = EntityKind::Notification;

    fn id(&self) -> i64 {
        self.id
    }
    fn assign_id(&mut self, id: i64) {
        self.id = id;
    }
    fn into_record(self) -> Record {
        Record::Notification(self)
    }
}

impl Entity for Rating {
    const KIND: EntityKind = EntityKind::Rating;

    fn id(&self) -> i64 {
        self.id
    }
    fn assign_id(&mut self, id: i64) {
        self.id = id;
    }
    fn into_record(self) -> Record {
        Record::Rating(self)
    }
}

//=========================================================================================
// Collection
//=========================================================================================

/// Rows of one kind keyed by id, iterated in ascending id order.
///
/// Lookups hand out clones; the only way to change a row is through
/// `create`, `update` or `delete`, each of which is journaled.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    rows: BTreeMap<i64, T>,
    // (id, value before the mutation)
    journal: Vec<(i64, Option<T>)>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            journal: Vec::new(),
        }
    }
}

impl<T: Entity> Collection<T> {
    pub fn from_rows(rows: impl IntoIterator<Item = T>) -> Self {
        Self {
            rows: rows.into_iter().map(|row| (row.id(), row)).collect(),
            journal: Vec::new(),
        }
    }

    /// The next unused id: one past the largest id present, or 1 when empty.
    pub fn next_id(&self) -> i64 {
        self.rows.keys().next_back().map_or(1, |max| max + 1)
    }

    /// Stores `entity` under a freshly allocated id and returns the stored copy.
    pub fn create(&mut self, mut entity: T) -> T {
        let id = self.next_id();
        entity.assign_id(id);
        self.journal.push((id, None));
        self.rows.insert(id, entity.clone());
        entity
    }

    pub fn get(&self, id: i64) -> Option<T> {
        self.rows.get(&id).cloned()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn all(&self) -> Vec<T> {
        self.rows.values().cloned().collect()
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows.values().filter(|row| predicate(row)).cloned().collect()
    }

    pub fn find_one(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.rows.values().find(|row| predicate(row)).cloned()
    }

    pub fn count(&self, predicate: impl Fn(&T) -> bool) -> usize {
        self.rows.values().filter(|row| predicate(row)).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Applies `change` to the row and returns the updated copy.
    /// The row keeps its id whatever `change` does.
    pub fn update(&mut self, id: i64, change: impl FnOnce(&mut T)) -> WorkflowResult<T> {
        let row = self
            .rows
            .get_mut(&id)
            .ok_or_else(|| WorkflowError::not_found(&T::KIND.to_string(), id))?;
        self.journal.push((id, Some(row.clone())));
        change(row);
        row.assign_id(id);
        Ok(row.clone())
    }

    /// Removes the row; `false` if it did not exist.
    pub fn delete(&mut self, id: i64) -> bool {
        match self.rows.remove(&id) {
            Some(before) => {
                self.journal.push((id, Some(before)));
                true
            }
            None => false,
        }
    }

    /// Removes every row matching `predicate` and returns how many went.
    pub fn delete_where(&mut self, predicate: impl Fn(&T) -> bool) -> usize {
        let ids: Vec<i64> = self
            .rows
            .values()
            .filter(|row| predicate(row))
            .map(|row| row.id())
            .collect();
        ids.into_iter().filter(|id| self.delete(*id)).count()
    }

    fn rollback(&mut self) {
        while let Some((id, before)) = self.journal.pop() {
            match before {
                Some(row) => {
                    self.rows.insert(id, row);
                }
                None => {
                    self.rows.remove(&id);
                }
            }
        }
    }

    fn collect_changes(&self, changes: &mut ChangeSet) {
        let touched: BTreeSet<i64> = self.journal.iter().map(|(id, _)| *id).collect();
        for id in touched {
            match self.rows.get(&id) {
                Some(row) => changes.upserts.push(row.clone().into_record()),
                None => changes.deletes.push((T::KIND, id)),
            }
        }
    }

    fn commit(&mut self) {
        self.journal.clear();
    }
}

//=========================================================================================
// Tables
//=========================================================================================

/// Every collection of the marketplace.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub users: Collection<UserAccount>,
    pub tasks: Collection<Task>,
    pub applications: Collection<Application>,
    pub messages: Collection<Message>,
    pub notifications: Collection<Notification>,
    pub ratings: Collection<Rating>,
}

impl Tables {
    fn rollback(&mut self) {
        self.users.rollback();
        self.tasks.rollback();
        self.applications.rollback();
        self.messages.rollback();
        self.notifications.rollback();
        self.ratings.rollback();
    }

    fn pending_changes(&self) -> ChangeSet {
        let mut changes = ChangeSet::default();
        self.users.collect_changes(&mut changes);
        self.tasks.collect_changes(&mut changes);
        self.applications.collect_changes(&mut changes);
        self.messages.collect_changes(&mut changes);
        self.notifications.collect_changes(&mut changes);
        self.ratings.collect_changes(&mut changes);
        changes
    }

    fn commit(&mut self) {
        self.users.commit();
        self.tasks.commit();
        self.applications.commit();
        self.messages.commit();
        self.notifications.commit();
        self.ratings.commit();
    }
}

//=========================================================================================
// EntityStore
//=========================================================================================

/// A backend that keeps nothing beyond the process lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryBackend;

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn load(&self) -> PortResult<Tables> {
        Ok(Tables::default())
    }

    async fn persist(&self, _changes: &ChangeSet) -> PortResult<()> {
        Ok(())
    }
}

pub struct EntityStore {
    tables: RwLock<Tables>,
    backend: Arc<dyn StoreBackend>,
}

impl EntityStore {
    /// An empty store with no durability.
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            backend: Arc::new(MemoryBackend),
        }
    }

    /// Loads every collection from `backend` and persists future writes to it.
    pub async fn open(backend: Arc<dyn StoreBackend>) -> PortResult<Self> {
        let tables = backend.load().await?;
        info!(
            users = tables.users.len(),
            tasks = tables.tasks.len(),
            applications = tables.applications.len(),
            messages = tables.messages.len(),
            notifications = tables.notifications.len(),
            "Entity store loaded."
        );
        Ok(Self {
            tables: RwLock::new(tables),
            backend,
        })
    }

    /// Runs `f` against a consistent snapshot.
    pub async fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        let tables = self.tables.read().await;
        f(&tables)
    }

    /// Runs `f` with exclusive access and commits its mutations atomically.
    pub async fn write<R>(
        &self,
        f: impl FnOnce(&mut Tables) -> WorkflowResult<R>,
    ) -> WorkflowResult<R> {
        let mut tables = self.tables.write().await;
        let value = match f(&mut tables) {
            Ok(value) => value,
            Err(e) => {
                tables.rollback();
                return Err(e);
            }
        };

        let changes = tables.pending_changes();
        if !changes.is_empty() {
            if let Err(e) = self.backend.persist(&changes).await {
                error!(error = %e, "Failed to persist change set; rolling back.");
                tables.rollback();
                return Err(e.into());
            }
            debug!(
                upserts = changes.upserts.len(),
                deletes = changes.deletes.len(),
                "Change set persisted."
            );
        }
        tables.commit();
        Ok(value)
    }
}
