//! crates/getitdone_core/src/tasks.rs
//!
//! Owner-side task writes: posting, editing and removing tasks.

use std::sync::Arc;
use tracing::info;

use crate::domain::{NewTask, Task, TaskId, TaskPatch, TaskStatus, UserId};
use crate::accounts::refresh_rating;
use crate::error::{WorkflowError, WorkflowResult};
use crate::notifications::{push_in, NotificationDraft};
use crate::ports::Clock;
use crate::store::EntityStore;

/// Lower-cases and trims tags, dropping blanks and later duplicates.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

fn require_text(value: &str, field: &str) -> WorkflowResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(WorkflowError::validation(format!(
            "Missing required field: {}",
            field
        )));
    }
    Ok(value.to_string())
}

fn check_pay(amount: f64) -> WorkflowResult<()> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(WorkflowError::validation(
            "Pay amount must be a non-negative number",
        ));
    }
    Ok(())
}

fn is_manual_status(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Open | TaskStatus::Review)
}

pub struct TaskBoard {
    store: Arc<EntityStore>,
    clock: Arc<dyn Clock>,
}

impl TaskBoard {
    pub fn new(store: Arc<EntityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Publishes a new open task and notifies its poster.
    pub async fn post(&self, poster_id: UserId, new_task: NewTask) -> WorkflowResult<Task> {
        let title = require_text(&new_task.title, "title")?;
        let description = require_text(&new_task.description, "description")?;
        let time_window = require_text(&new_task.time_window, "timeWindow")?;
        check_pay(new_task.pay_amount)?;

        let now = self.clock.now();
        let mut task = Task {
            id: 0,
            title,
            description,
            tags: normalize_tags(&new_task.tags),
            pay_type: new_task.pay_type,
            pay_amount: new_task.pay_amount,
            platform_fee: 0.0,
            helper_payment: 0.0,
            date: new_task.date,
            time_window,
            job_type: new_task.job_type,
            college: new_task.college,
            location_type: new_task.location_type,
            location_name: new_task.location_name,
            address: new_task.address,
            coordinates: new_task.coordinates,
            poster_id,
            status: TaskStatus::Open,
            created_at: now,
            completed_at: None,
            completion_notes: None,
            payment_confirmed: None,
        };
        task.reprice();

        let task = self
            .store
            .write(|t| {
                if !t.users.contains(poster_id) {
                    return Err(WorkflowError::not_found("User", poster_id));
                }
                let task = t.tasks.create(task);
                push_in(t, NotificationDraft::task_created(&task), now);
                Ok(task)
            })
            .await?;
        info!(task_id = task.id, poster_id, "Task posted.");
        Ok(task)
    }

    pub async fn get(&self, task_id: TaskId) -> WorkflowResult<Task> {
        self.store
            .read(|t| t.tasks.get(task_id))
            .await
            .ok_or_else(|| WorkflowError::not_found("Task", task_id))
    }

    /// Applies the poster's edits. Status may only move between open and review.
    pub async fn edit(
        &self,
        task_id: TaskId,
        acting_user_id: UserId,
        patch: TaskPatch,
    ) -> WorkflowResult<Task> {
        let title = patch.title.as_deref().map(|v| require_text(v, "title")).transpose()?;
        let description = patch
            .description
            .as_deref()
            .map(|v| require_text(v, "description"))
            .transpose()?;
        let time_window = patch
            .time_window
            .as_deref()
            .map(|v| require_text(v, "timeWindow"))
            .transpose()?;
        if let Some(amount) = patch.pay_amount {
            check_pay(amount)?;
        }

        let task = self
            .store
            .write(|t| {
                let current = t
                    .tasks
                    .get(task_id)
                    .ok_or_else(|| WorkflowError::not_found("Task", task_id))?;
                if current.poster_id != acting_user_id {
                    return Err(WorkflowError::forbidden(
                        "Only the task poster can edit this task",
                    ));
                }
                if let Some(status) = patch.status {
                    if status != current.status
                        && !(is_manual_status(status) && is_manual_status(current.status))
                    {
                        return Err(WorkflowError::conflict(format!(
                            "Cannot change task status from {} to {}",
                            current.status, status
                        )));
                    }
                }

                t.tasks.update(task_id, |task| {
                    if let Some(v) = title {
                        task.title = v;
                    }
                    if let Some(v) = description {
                        task.description = v;
                    }
                    if let Some(v) = patch.tags {
                        task.tags = normalize_tags(&v);
                    }
                    if let Some(v) = patch.pay_type {
                        task.pay_type = v;
                    }
                    if let Some(v) = patch.pay_amount {
                        task.pay_amount = v;
                        task.reprice();
                    }
                    if let Some(v) = patch.date {
                        task.date = v;
                    }
                    if let Some(v) = time_window {
                        task.time_window = v;
                    }
                    if let Some(v) = patch.job_type {
                        task.job_type = v;
                    }
                    if patch.college.is_some() {
                        task.college = patch.college;
                    }
                    if let Some(v) = patch.location_type {
                        task.location_type = v;
                    }
                    if let Some(v) = patch.location_name {
                        task.location_name = v;
                    }
                    if patch.address.is_some() {
                        task.address = patch.address;
                    }
                    if patch.coordinates.is_some() {
                        task.coordinates = patch.coordinates;
                    }
                    if let Some(v) = patch.status {
                        task.status = v;
                    }
                })
            })
            .await?;
        info!(task_id, status = %task.status, "Task updated.");
        Ok(task)
    }

    /// Deletes the task together with its applications and ratings, then
    /// recomputes the score of every user rated on it.
    pub async fn remove(&self, task_id: TaskId, acting_user_id: UserId) -> WorkflowResult<bool> {
        let (applications, ratings) = self
            .store
            .write(|t| {
                let Some(task) = t.tasks.get(task_id) else {
                    return Err(WorkflowError::not_found("Task", task_id));
                };
                if task.poster_id != acting_user_id {
                    return Err(WorkflowError::forbidden(
                        "Only the task poster can delete this task",
                    ));
                }
                let mut rated: Vec<UserId> = t
                    .ratings
                    .iter()
                    .filter(|r| r.task_id == task_id)
                    .map(|r| r.rated_user_id)
                    .collect();
                rated.sort_unstable();
                rated.dedup();

                let applications = t.applications.delete_where(|a| a.task_id == task_id);
                let ratings = t.ratings.delete_where(|r| r.task_id == task_id);
                t.tasks.delete(task_id);
                for user_id in rated {
                    refresh_rating(t, user_id)?;
                }
                Ok((applications, ratings))
            })
            .await?;
        info!(task_id, applications, ratings, "Task deleted.");
        Ok(true)
    }

    /// Tasks posted by `user_id`, newest first.
    pub async fn posted_by(&self, user_id: UserId) -> Vec<Task> {
        let mut tasks = self
            .store
            .read(|t| t.tasks.find(|task| task.poster_id == user_id))
            .await;
        tasks.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        tasks
    }
}
