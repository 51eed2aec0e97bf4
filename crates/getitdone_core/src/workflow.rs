//! crates/getitdone_core/src/workflow.rs
//!
//! The application workflow: helpers apply to open tasks, posters accept or reject
//! them, and assigned tasks are completed.
//!
//! Task:        open -> assigned -> completed   (review is owner-set only and
//!              closes the task to new applications)
//! Application: submitted -> accepted | rejected
//!
//! Every transition runs in one store write, so an accept, its sibling
//! rejections and their notifications commit together or not at all.

use std::sync::Arc;
use tracing::info;

use crate::domain::{
    Application, ApplicationId, ApplicationStatus, CompletionData, Task, TaskId, TaskStatus,
    UserId,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::notifications::{push_in, NotificationDraft};
use crate::ports::Clock;
use crate::store::{EntityStore, Tables};

fn load_task(tables: &Tables, task_id: TaskId) -> WorkflowResult<Task> {
    tables
        .tasks
        .get(task_id)
        .ok_or_else(|| WorkflowError::not_found("Task", task_id))
}

fn load_application(tables: &Tables, application_id: ApplicationId) -> WorkflowResult<Application> {
    tables
        .applications
        .get(application_id)
        .ok_or_else(|| WorkflowError::not_found("Application", application_id))
}

fn accepted_helper(tables: &Tables, task_id: TaskId) -> Option<UserId> {
    tables
        .applications
        .find_one(|a| a.task_id == task_id && a.status == ApplicationStatus::Accepted)
        .map(|a| a.helper_id)
}

fn newest_first(list: &mut [Application]) {
    list.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
}

pub struct ApplicationWorkflow {
    store: Arc<EntityStore>,
    clock: Arc<dyn Clock>,
}

impl ApplicationWorkflow {
    pub fn new(store: Arc<EntityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Submits `helper_id`'s application for a task and notifies the poster.
    pub async fn apply(
        &self,
        task_id: TaskId,
        helper_id: UserId,
        note: &str,
        phone: Option<String>,
    ) -> WorkflowResult<Application> {
        let note = note.trim();
        if note.is_empty() {
            return Err(WorkflowError::validation("Missing required field: note"));
        }
        let phone = phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        let now = self.clock.now();

        let application = self
            .store
            .write(|t| {
                let task = load_task(t, task_id)?;
                let helper = t
                    .users
                    .get(helper_id)
                    .map(|a| a.profile)
                    .ok_or_else(|| WorkflowError::not_found("User", helper_id))?;
                if task.poster_id == helper_id {
                    return Err(WorkflowError::InvalidOperation(
                        "You cannot apply to your own task".to_string(),
                    ));
                }
                if task.status != TaskStatus::Open {
                    return Err(WorkflowError::conflict(
                        "This task is no longer accepting applications",
                    ));
                }
                if t
                    .applications
                    .iter()
                    .any(|a| a.task_id == task_id && a.helper_id == helper_id)
                {
                    return Err(WorkflowError::conflict(
                        "You have already applied to this task",
                    ));
                }

                let application = t.applications.create(Application {
                    id: 0,
                    task_id,
                    helper_id,
                    note: note.to_string(),
                    phone,
                    status: ApplicationStatus::Submitted,
                    created_at: now,
                    accepted_at: None,
                    rejected_at: None,
                });
                push_in(
                    t,
                    NotificationDraft::new_application(&task, &helper, &application),
                    now,
                );
                Ok(application)
            })
            .await?;
        info!(
            application_id = application.id,
            task_id, helper_id, "Application submitted."
        );
        Ok(application)
    }

    /// Accepts one application, assigns the task and rejects every other
    /// submitted application on it.
    pub async fn accept(
        &self,
        application_id: ApplicationId,
        acting_user_id: UserId,
    ) -> WorkflowResult<Application> {
        let now = self.clock.now();
        let (accepted, rejected) = self
            .store
            .write(|t| {
                let application = load_application(t, application_id)?;
                let task = load_task(t, application.task_id)?;
                if task.poster_id != acting_user_id {
                    return Err(WorkflowError::forbidden(
                        "Only the task poster can accept applications",
                    ));
                }
                if task.status != TaskStatus::Open {
                    return Err(WorkflowError::conflict(
                        "This task is no longer open for acceptance",
                    ));
                }
                if application.status != ApplicationStatus::Submitted {
                    return Err(WorkflowError::conflict(format!(
                        "Application has already been {}",
                        application.status
                    )));
                }

                let accepted = t.applications.update(application_id, |a| {
                    a.status = ApplicationStatus::Accepted;
                    a.accepted_at = Some(now);
                })?;
                let task = t
                    .tasks
                    .update(task.id, |task| task.status = TaskStatus::Assigned)?;

                let siblings: Vec<ApplicationId> = t
                    .applications
                    .iter()
                    .filter(|a| {
                        a.task_id == task.id
                            && a.id != application_id
                            && a.status == ApplicationStatus::Submitted
                    })
                    .map(|a| a.id)
                    .collect();
                for sibling_id in &siblings {
                    let rejected = t.applications.update(*sibling_id, |a| {
                        a.status = ApplicationStatus::Rejected;
                        a.rejected_at = Some(now);
                    })?;
                    push_in(t, NotificationDraft::application_rejected(&task, &rejected), now);
                }
                push_in(t, NotificationDraft::application_accepted(&task, &accepted), now);
                Ok((accepted, siblings.len()))
            })
            .await?;
        info!(
            application_id,
            task_id = accepted.task_id,
            helper_id = accepted.helper_id,
            auto_rejected = rejected,
            "Application accepted."
        );
        Ok(accepted)
    }

    /// Rejects one submitted application. The task is left as it is.
    pub async fn reject(
        &self,
        application_id: ApplicationId,
        acting_user_id: UserId,
    ) -> WorkflowResult<Application> {
        let now = self.clock.now();
        let rejected = self
            .store
            .write(|t| {
                let application = load_application(t, application_id)?;
                let task = load_task(t, application.task_id)?;
                if task.poster_id != acting_user_id {
                    return Err(WorkflowError::forbidden(
                        "Only the task poster can reject applications",
                    ));
                }
                if application.status != ApplicationStatus::Submitted {
                    return Err(WorkflowError::conflict(format!(
                        "Application has already been {}",
                        application.status
                    )));
                }
                let rejected = t.applications.update(application_id, |a| {
                    a.status = ApplicationStatus::Rejected;
                    a.rejected_at = Some(now);
                })?;
                push_in(t, NotificationDraft::application_rejected(&task, &rejected), now);
                Ok(rejected)
            })
            .await?;
        info!(application_id, task_id = rejected.task_id, "Application rejected.");
        Ok(rejected)
    }

    /// Marks an assigned task completed. The poster or the accepted helper may call it.
    pub async fn complete(
        &self,
        task_id: TaskId,
        acting_user_id: UserId,
        completion: CompletionData,
    ) -> WorkflowResult<Task> {
        let now = self.clock.now();
        let task = self
            .store
            .write(|t| {
                let task = load_task(t, task_id)?;
                let helper = accepted_helper(t, task_id);
                if acting_user_id != task.poster_id && Some(acting_user_id) != helper {
                    return Err(WorkflowError::forbidden(
                        "Only the poster or the assigned helper can complete this task",
                    ));
                }
                if task.status != TaskStatus::Assigned {
                    return Err(WorkflowError::conflict(format!(
                        "Only assigned tasks can be completed; this task is {}",
                        task.status
                    )));
                }
                let notes = completion
                    .notes
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty());
                let task = t.tasks.update(task_id, |task| {
                    task.status = TaskStatus::Completed;
                    task.completed_at = Some(now);
                    task.completion_notes = notes;
                    task.payment_confirmed = Some(completion.payment_confirmed);
                })?;
                push_in(t, NotificationDraft::task_completed(&task), now);
                Ok(task)
            })
            .await?;
        info!(task_id, acting_user_id, "Task completed.");
        Ok(task)
    }

    /// Deletes the helper's own application unless it was already accepted.
    pub async fn withdraw(
        &self,
        application_id: ApplicationId,
        acting_user_id: UserId,
    ) -> WorkflowResult<bool> {
        let removed = self
            .store
            .write(|t| {
                let application = load_application(t, application_id)?;
                if application.helper_id != acting_user_id {
                    return Err(WorkflowError::forbidden(
                        "You can only withdraw your own applications",
                    ));
                }
                if application.status == ApplicationStatus::Accepted {
                    return Err(WorkflowError::conflict(
                        "An accepted application cannot be withdrawn",
                    ));
                }
                Ok(t.applications.delete(application_id))
            })
            .await?;
        info!(application_id, acting_user_id, "Application withdrawn.");
        Ok(removed)
    }

    pub async fn get(&self, application_id: ApplicationId) -> WorkflowResult<Application> {
        self.store
            .read(|t| load_application(t, application_id))
            .await
    }

    /// Applications on a task, newest first. Only the poster may list them.
    pub async fn for_task(
        &self,
        task_id: TaskId,
        acting_user_id: UserId,
        status: Option<ApplicationStatus>,
    ) -> WorkflowResult<Vec<Application>> {
        let mut list = self
            .store
            .read(|t| {
                let task = load_task(t, task_id)?;
                if task.poster_id != acting_user_id {
                    return Err(WorkflowError::forbidden(
                        "Only the task poster can view its applications",
                    ));
                }
                Ok(t.applications.find(|a| {
                    a.task_id == task_id && status.map_or(true, |s| a.status == s)
                }))
            })
            .await?;
        newest_first(&mut list);
        Ok(list)
    }

    /// The helper's own applications, newest first.
    pub async fn for_helper(
        &self,
        helper_id: UserId,
        status: Option<ApplicationStatus>,
    ) -> Vec<Application> {
        let mut list = self
            .store
            .read(|t| {
                t.applications.find(|a| {
                    a.helper_id == helper_id && status.map_or(true, |s| a.status == s)
                })
            })
            .await;
        newest_first(&mut list);
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NotificationKind, TaskPatch, User};
    use crate::testing::Fixture;

    struct Board {
        fx: Fixture,
        poster: User,
        task: Task,
    }

    async fn board() -> Board {
        let fx = Fixture::new();
        let poster = fx.user("poster").await;
        let task = fx.task(poster.id, "Move boxes", &["moving"], 30.0).await;
        Board { fx, poster, task }
    }

    async fn kinds_for(fx: &Fixture, user_id: UserId) -> Vec<NotificationKind> {
        fx.market
            .notifications
            .for_user(user_id)
            .await
            .into_iter()
            .map(|n| n.kind)
            .collect()
    }

    #[tokio::test]
    async fn accept_assigns_task_and_notifies_only_the_helper() {
        let Board { fx, poster, task } = board().await;
        let helper = fx.user("helper").await;
        let wf = &fx.market.workflow;

        let app = wf.apply(task.id, helper.id, "I can help", None).await.unwrap();
        assert_eq!(app.status, ApplicationStatus::Submitted);
        let poster_inbox_before = fx.market.notifications.for_user(poster.id).await.len();

        let accepted = wf.accept(app.id, poster.id).await.unwrap();
        assert_eq!(accepted.status, ApplicationStatus::Accepted);
        assert!(accepted.accepted_at.is_some());
        assert_eq!(
            fx.market.tasks.get(task.id).await.unwrap().status,
            TaskStatus::Assigned
        );
        assert_eq!(
            kinds_for(&fx, helper.id).await,
            vec![NotificationKind::ApplicationAccepted]
        );
        assert_eq!(
            fx.market.notifications.for_user(poster.id).await.len(),
            poster_inbox_before
        );
    }

    #[tokio::test]
    async fn apply_notifies_the_poster() {
        let Board { fx, poster, task } = board().await;
        let helper = fx.user("helper").await;
        let app = fx
            .market
            .workflow
            .apply(task.id, helper.id, "  On it ", Some(" ".into()))
            .await
            .unwrap();
        assert_eq!(app.note, "On it");
        assert_eq!(app.phone, None);

        let inbox = fx.market.notifications.for_user(poster.id).await;
        assert_eq!(inbox[0].kind, NotificationKind::NewApplication);
        assert_eq!(inbox[0].data["applicationId"], app.id);
        assert_eq!(inbox[0].data["helperEmail"], "helper@campus.edu");
    }

    #[tokio::test]
    async fn apply_rejects_duplicates_self_and_empty_notes() {
        let Board { fx, poster, task } = board().await;
        let helper = fx.user("helper").await;
        let wf = &fx.market.workflow;

        wf.apply(task.id, helper.id, "first", None).await.unwrap();
        assert!(matches!(
            wf.apply(task.id, helper.id, "second", None).await,
            Err(WorkflowError::Conflict(_))
        ));
        assert!(matches!(
            wf.apply(task.id, poster.id, "mine", None).await,
            Err(WorkflowError::InvalidOperation(_))
        ));
        assert!(matches!(
            wf.apply(task.id, helper.id, "   ", None).await,
            Err(WorkflowError::Validation(_))
        ));
        assert!(matches!(
            wf.apply(999, helper.id, "note", None).await,
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn tasks_under_review_take_no_applications_until_reopened() {
        let Board { fx, poster, task } = board().await;
        let helper = fx.user("helper").await;
        let wf = &fx.market.workflow;
        let set_status = |status| TaskPatch {
            status: Some(status),
            ..Default::default()
        };

        fx.market
            .tasks
            .edit(task.id, poster.id, set_status(TaskStatus::Review))
            .await
            .unwrap();
        let inbox_before = fx.market.notifications.for_user(poster.id).await.len();
        assert!(matches!(
            wf.apply(task.id, helper.id, "Pick me", None).await,
            Err(WorkflowError::Conflict(_))
        ));
        assert!(fx.store.read(|t| t.applications.is_empty()).await);
        assert_eq!(
            fx.market.notifications.for_user(poster.id).await.len(),
            inbox_before
        );

        fx.market
            .tasks
            .edit(task.id, poster.id, set_status(TaskStatus::Open))
            .await
            .unwrap();
        let app = wf.apply(task.id, helper.id, "Pick me", None).await.unwrap();
        wf.accept(app.id, poster.id).await.unwrap();
    }

    #[tokio::test]
    async fn accept_rejects_every_submitted_sibling() {
        let Board { fx, poster, task } = board().await;
        let h1 = fx.user("h1").await;
        let h2 = fx.user("h2").await;
        let h3 = fx.user("h3").await;
        let wf = &fx.market.workflow;

        let a1 = wf.apply(task.id, h1.id, "pick me", None).await.unwrap();
        let a2 = wf.apply(task.id, h2.id, "or me", None).await.unwrap();
        let a3 = wf.apply(task.id, h3.id, "me too", None).await.unwrap();
        wf.reject(a3.id, poster.id).await.unwrap();

        wf.accept(a1.id, poster.id).await.unwrap();

        let a2 = wf.get(a2.id).await.unwrap();
        assert_eq!(a2.status, ApplicationStatus::Rejected);
        assert!(a2.rejected_at.is_some());
        assert_eq!(
            kinds_for(&fx, h2.id).await,
            vec![NotificationKind::ApplicationRejected]
        );
        // Already rejected before the accept: no second notification.
        assert_eq!(
            kinds_for(&fx, h3.id).await,
            vec![NotificationKind::ApplicationRejected]
        );

        assert!(matches!(
            wf.accept(a2.id, poster.id).await,
            Err(WorkflowError::Conflict(_))
        ));
        let accepted = wf
            .for_task(task.id, poster.id, Some(ApplicationStatus::Accepted))
            .await
            .unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].helper_id, h1.id);
    }

    #[tokio::test]
    async fn only_the_poster_accepts_or_rejects() {
        let Board { fx, task, .. } = board().await;
        let helper = fx.user("helper").await;
        let wf = &fx.market.workflow;
        let app = wf.apply(task.id, helper.id, "hi", None).await.unwrap();

        assert!(matches!(
            wf.accept(app.id, helper.id).await,
            Err(WorkflowError::Forbidden(_))
        ));
        assert!(matches!(
            wf.reject(app.id, helper.id).await,
            Err(WorkflowError::Forbidden(_))
        ));
        assert!(matches!(
            wf.accept(404, helper.id).await,
            Err(WorkflowError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_accepts_on_one_task_have_a_single_winner() {
        let Board { fx, poster, task } = board().await;
        let h1 = fx.user("h1").await;
        let h2 = fx.user("h2").await;
        let wf = &fx.market.workflow;
        let a1 = wf.apply(task.id, h1.id, "one", None).await.unwrap();
        let a2 = wf.apply(task.id, h2.id, "two", None).await.unwrap();

        let (r1, r2) = tokio::join!(wf.accept(a1.id, poster.id), wf.accept(a2.id, poster.id));
        let wins = [r1.is_ok(), r2.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(wins, 1);
        let loser = if r1.is_ok() { r2 } else { r1 };
        assert!(matches!(loser, Err(WorkflowError::Conflict(_))));

        let accepted = fx
            .store
            .read(|t| t.applications.count(|a| a.status == ApplicationStatus::Accepted))
            .await;
        assert_eq!(accepted, 1);
        let accept_notes = fx
            .store
            .read(|t| {
                t.notifications
                    .count(|n| n.kind == NotificationKind::ApplicationAccepted)
            })
            .await;
        let reject_notes = fx
            .store
            .read(|t| {
                t.notifications
                    .count(|n| n.kind == NotificationKind::ApplicationRejected)
            })
            .await;
        assert_eq!((accept_notes, reject_notes), (1, 1));
    }

    #[tokio::test]
    async fn complete_requires_assignment_and_a_participant() {
        let Board { fx, poster, task } = board().await;
        let helper = fx.user("helper").await;
        let outsider = fx.user("outsider").await;
        let wf = &fx.market.workflow;

        assert!(matches!(
            wf.complete(task.id, poster.id, CompletionData::default()).await,
            Err(WorkflowError::Conflict(_))
        ));

        let app = wf.apply(task.id, helper.id, "hi", None).await.unwrap();
        wf.accept(app.id, poster.id).await.unwrap();
        assert!(matches!(
            wf.complete(task.id, outsider.id, CompletionData::default()).await,
            Err(WorkflowError::Forbidden(_))
        ));

        fx.tick();
        let done = wf
            .complete(
                task.id,
                helper.id,
                CompletionData {
                    notes: Some("All moved".into()),
                    payment_confirmed: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.completion_notes.as_deref(), Some("All moved"));
        assert_eq!(done.payment_confirmed, Some(true));
        assert_eq!(done.completed_at, Some(fx.clock.now()));
        assert_eq!(
            kinds_for(&fx, poster.id).await[0],
            NotificationKind::TaskCompleted
        );

        assert!(matches!(
            wf.complete(task.id, poster.id, CompletionData::default()).await,
            Err(WorkflowError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn withdraw_is_helper_only_and_blocked_once_accepted() {
        let Board { fx, poster, task } = board().await;
        let h1 = fx.user("h1").await;
        let h2 = fx.user("h2").await;
        let wf = &fx.market.workflow;
        let a1 = wf.apply(task.id, h1.id, "one", None).await.unwrap();
        let a2 = wf.apply(task.id, h2.id, "two", None).await.unwrap();

        assert!(matches!(
            wf.withdraw(a2.id, h1.id).await,
            Err(WorkflowError::Forbidden(_))
        ));
        assert!(wf.withdraw(a2.id, h2.id).await.unwrap());
        assert!(wf.for_helper(h2.id, None).await.is_empty());

        wf.accept(a1.id, poster.id).await.unwrap();
        assert!(matches!(
            wf.withdraw(a1.id, h1.id).await,
            Err(WorkflowError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn for_task_is_poster_only() {
        let Board { fx, poster, task } = board().await;
        let helper = fx.user("helper").await;
        let wf = &fx.market.workflow;
        wf.apply(task.id, helper.id, "hi", None).await.unwrap();

        assert!(matches!(
            wf.for_task(task.id, helper.id, None).await,
            Err(WorkflowError::Forbidden(_))
        ));
        assert_eq!(wf.for_task(task.id, poster.id, None).await.unwrap().len(), 1);
        assert_eq!(wf.for_helper(helper.id, None).await.len(), 1);
    }
}
