//! crates/getitdone_core/src/messaging.rs
//!
//! Direct messages between two users and the per-user conversation summaries
//! derived from them.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::domain::{Conversation, Message, MessageId, UserId};
use crate::error::{WorkflowError, WorkflowResult};
use crate::notifications::{push_in, NotificationDraft};
use crate::ports::Clock;
use crate::store::EntityStore;

fn chronological(list: &mut [Message]) {
    list.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
}

/// Collapses `messages` into one conversation per partner of `user_id`,
/// most recently active first.
pub fn summarize(user_id: UserId, messages: &[Message]) -> Vec<Conversation> {
    let mut by_partner: HashMap<UserId, Conversation> = HashMap::new();
    for m in messages {
        let other = if m.sender_id == user_id {
            m.receiver_id
        } else if m.receiver_id == user_id {
            m.sender_id
        } else {
            continue;
        };
        let unread = usize::from(m.receiver_id == user_id && !m.read);
        by_partner
            .entry(other)
            .and_modify(|c| {
                if (m.created_at, m.id) > (c.last_message.created_at, c.last_message.id) {
                    c.last_message = m.clone();
                }
                c.unread_count += unread;
            })
            .or_insert_with(|| Conversation {
                other_user_id: other,
                last_message: m.clone(),
                unread_count: unread,
            });
    }

    let mut list: Vec<Conversation> = by_partner.into_values().collect();
    list.sort_by(|a, b| {
        (b.last_message.created_at, b.last_message.id)
            .cmp(&(a.last_message.created_at, a.last_message.id))
    });
    list
}

pub struct Messenger {
    store: Arc<EntityStore>,
    clock: Arc<dyn Clock>,
}

impl Messenger {
    pub fn new(store: Arc<EntityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Stores an unread message and notifies the receiver with a preview.
    pub async fn send(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> WorkflowResult<Message> {
        if content.trim().is_empty() {
            return Err(WorkflowError::validation("Message content cannot be empty"));
        }
        if sender_id == receiver_id {
            return Err(WorkflowError::InvalidOperation(
                "You cannot message yourself".to_string(),
            ));
        }
        let now = self.clock.now();

        let message = self
            .store
            .write(|t| {
                let sender = t
                    .users
                    .get(sender_id)
                    .map(|a| a.profile)
                    .ok_or_else(|| WorkflowError::not_found("User", sender_id))?;
                if !t.users.contains(receiver_id) {
                    return Err(WorkflowError::not_found("User", receiver_id));
                }
                let message = t.messages.create(Message {
                    id: 0,
                    sender_id,
                    receiver_id,
                    content: content.to_string(),
                    read: false,
                    created_at: now,
                });
                push_in(t, NotificationDraft::new_message(&sender, &message), now);
                Ok(message)
            })
            .await?;
        info!(message_id = message.id, sender_id, receiver_id, "Message sent.");
        Ok(message)
    }

    /// Every message exchanged by the two users, oldest first.
    pub async fn between(&self, user_a: UserId, user_b: UserId) -> Vec<Message> {
        let mut list = self
            .store
            .read(|t| {
                t.messages.find(|m| {
                    (m.sender_id == user_a && m.receiver_id == user_b)
                        || (m.sender_id == user_b && m.receiver_id == user_a)
                })
            })
            .await;
        chronological(&mut list);
        list
    }

    /// Marks everything `other_user_id` sent to `self_id` read and returns how many changed.
    pub async fn mark_read(&self, other_user_id: UserId, self_id: UserId) -> WorkflowResult<usize> {
        self.store
            .write(|t| {
                let unread: Vec<MessageId> = t
                    .messages
                    .iter()
                    .filter(|m| m.sender_id == other_user_id && m.receiver_id == self_id && !m.read)
                    .map(|m| m.id)
                    .collect();
                for id in &unread {
                    t.messages.update(*id, |m| m.read = true)?;
                }
                Ok(unread.len())
            })
            .await
    }

    pub async fn conversations_for(&self, user_id: UserId) -> Vec<Conversation> {
        self.store
            .read(|t| {
                let touching = t
                    .messages
                    .find(|m| m.sender_id == user_id || m.receiver_id == user_id);
                summarize(user_id, &touching)
            })
            .await
    }

    /// Deletes a message. Either participant may do so.
    pub async fn delete(&self, message_id: MessageId, acting_user_id: UserId) -> WorkflowResult<bool> {
        self.store
            .write(|t| {
                let message = t
                    .messages
                    .get(message_id)
                    .ok_or_else(|| WorkflowError::not_found("Message", message_id))?;
                if message.sender_id != acting_user_id && message.receiver_id != acting_user_id {
                    return Err(WorkflowError::forbidden(
                        "You can only delete your own messages",
                    ));
                }
                Ok(t.messages.delete(message_id))
            })
            .await
    }

    /// Unread messages addressed to `user_id` across all conversations.
    pub async fn unread_total(&self, user_id: UserId) -> usize {
        self.store
            .read(|t| t.messages.count(|m| m.receiver_id == user_id && !m.read))
            .await
    }
}
