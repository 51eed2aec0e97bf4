//! crates/getitdone_core/src/notifications.rs
//!
//! The notification center: an append-only event log per recipient, where only
//! the `read` flag ever changes.
//!
//! Other components fan out inside their own write transactions through
//! [`push_in`], so a notification is committed together with the state change
//! that caused it.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::{
    Application, Message, Notification, NotificationId, NotificationKind, Task, User, UserId,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::ports::Clock;
use crate::store::{EntityStore, Tables};

/// Longest message preview quoted in a `new_message` notification, in characters.
pub const MESSAGE_PREVIEW_CHARS: usize = 50;

/// A notification that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: Value,
}

impl NotificationDraft {
    pub fn new(
        user_id: UserId,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn task_created(task: &Task) -> Self {
        Self::new(
            task.poster_id,
            NotificationKind::TaskCreated,
            "Task Posted",
            format!("Your task \"{}\" has been posted successfully!", task.title),
        )
        .with_data(json!({ "taskId": task.id }))
    }

    pub fn new_application(task: &Task, helper: &User, application: &Application) -> Self {
        Self::new(
            task.poster_id,
            NotificationKind::NewApplication,
            "New Application",
            format!("{} applied to your task \"{}\"", helper.name, task.title),
        )
        .with_data(json!({
            "taskId": task.id,
            "applicationId": application.id,
            "helperId": helper.id,
            "helperEmail": helper.email,
        }))
    }

    pub fn application_accepted(task: &Task, application: &Application) -> Self {
        Self::new(
            application.helper_id,
            NotificationKind::ApplicationAccepted,
            "Application Accepted!",
            format!("Your application for \"{}\" has been accepted!", task.title),
        )
        .with_data(json!({ "taskId": task.id, "applicationId": application.id }))
    }

    pub fn application_rejected(task: &Task, application: &Application) -> Self {
        Self::new(
            application.helper_id,
            NotificationKind::ApplicationRejected,
            "Application Update",
            format!(
                "Your application for \"{}\" was not selected this time.",
                task.title
            ),
        )
        .with_data(json!({ "taskId": task.id, "applicationId": application.id }))
    }

    pub fn new_message(sender: &User, message: &Message) -> Self {
        Self::new(
            message.receiver_id,
            NotificationKind::NewMessage,
            "New Message",
            format!(
                "{} sent you a message: \"{}\"",
                sender.name,
                preview(&message.content)
            ),
        )
        .with_data(json!({
            "senderId": sender.id,
            "senderEmail": sender.email,
            "messageId": message.id,
        }))
    }

    pub fn task_completed(task: &Task) -> Self {
        Self::new(
            task.poster_id,
            NotificationKind::TaskCompleted,
            "Task Completed",
            format!("Your task \"{}\" has been marked as completed.", task.title),
        )
        .with_data(json!({ "taskId": task.id }))
    }
}

/// The first [`MESSAGE_PREVIEW_CHARS`] characters of `content`, with "…" appended when cut.
pub fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(MESSAGE_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

/// Appends a notification inside an open write transaction.
pub(crate) fn push_in(
    tables: &mut Tables,
    draft: NotificationDraft,
    now: DateTime<Utc>,
) -> Notification {
    let stored = tables.notifications.create(Notification {
        id: 0,
        user_id: draft.user_id,
        kind: draft.kind,
        title: draft.title,
        message: draft.message,
        data: draft.data,
        read: false,
        created_at: now,
    });
    debug!(
        notification_id = stored.id,
        user_id = stored.user_id,
        kind = %stored.kind,
        "Notification queued."
    );
    stored
}

/// Narrows a user's notification list.
#[derive(Debug, Clone, Default)]
pub struct NotificationQuery {
    pub unread_only: bool,
    pub kind: Option<NotificationKind>,
}

fn newest_first(a: &Notification, b: &Notification) -> std::cmp::Ordering {
    (b.created_at, b.id).cmp(&(a.created_at, a.id))
}

pub struct NotificationCenter {
    store: Arc<EntityStore>,
    clock: Arc<dyn Clock>,
}

impl NotificationCenter {
    pub fn new(store: Arc<EntityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Appends an unread notification for `user_id`.
    pub async fn push(
        &self,
        user_id: UserId,
        kind: NotificationKind,
        title: &str,
        message: &str,
        data: Option<Value>,
    ) -> WorkflowResult<Notification> {
        let now = self.clock.now();
        let draft = NotificationDraft::new(user_id, kind, title, message)
            .with_data(data.unwrap_or(Value::Null));
        self.store
            .write(|t| {
                if !t.users.contains(user_id) {
                    return Err(WorkflowError::not_found("User", user_id));
                }
                Ok(push_in(t, draft, now))
            })
            .await
    }

    pub async fn get(&self, notification_id: NotificationId) -> WorkflowResult<Notification> {
        self.store
            .read(|t| t.notifications.get(notification_id))
            .await
            .ok_or_else(|| WorkflowError::not_found("Notification", notification_id))
    }

    /// Every notification addressed to `user_id`, newest first.
    pub async fn for_user(&self, user_id: UserId) -> Vec<Notification> {
        self.query(user_id, &NotificationQuery::default()).await
    }

    pub async fn query(&self, user_id: UserId, query: &NotificationQuery) -> Vec<Notification> {
        let mut list = self
            .store
            .read(|t| {
                t.notifications.find(|n| {
                    n.user_id == user_id
                        && (!query.unread_only || !n.read)
                        && query.kind.map_or(true, |kind| n.kind == kind)
                })
            })
            .await;
        list.sort_by(newest_first);
        list
    }

    pub async fn unread_count(&self, user_id: UserId) -> usize {
        self.store
            .read(|t| t.notifications.count(|n| n.user_id == user_id && !n.read))
            .await
    }

    /// Marks one notification read. Marking an already-read notification is a no-op.
    pub async fn mark_read(&self, notification_id: NotificationId) -> WorkflowResult<Notification> {
        self.store
            .write(|t| {
                let current = t
                    .notifications
                    .get(notification_id)
                    .ok_or_else(|| WorkflowError::not_found("Notification", notification_id))?;
                if current.read {
                    return Ok(current);
                }
                t.notifications.update(notification_id, |n| n.read = true)
            })
            .await
    }

    /// Marks every notification of `user_id` read and returns how many changed.
    pub async fn mark_all_read(&self, user_id: UserId) -> WorkflowResult<usize> {
        let flipped = self
            .store
            .write(|t| {
                let unread: Vec<NotificationId> = t
                    .notifications
                    .iter()
                    .filter(|n| n.user_id == user_id && !n.read)
                    .map(|n| n.id)
                    .collect();
                for id in &unread {
                    t.notifications.update(*id, |n| n.read = true)?;
                }
                Ok(unread.len())
            })
            .await?;
        info!(user_id, flipped, "Notifications marked read.");
        Ok(flipped)
    }

    pub async fn delete(&self, notification_id: NotificationId) -> WorkflowResult<bool> {
        self.store
            .write(|t| Ok(t.notifications.delete(notification_id)))
            .await
    }
}
