//! crates/getitdone_core/src/accounts.rs
//!
//! User accounts: registration, profile edits, credential lookup for login, and
//! rating aggregation after completed tasks.

use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::info;

use crate::domain::{
    ApplicationStatus, NewUser, ProfilePatch, Rating, TaskId, TaskStatus, User, UserAccount,
    UserCredentials, UserId,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::ports::Clock;
use crate::store::{EntityStore, Tables};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Narrows the user directory. Empty fields match everyone.
#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    /// Case-insensitive substring of name or email.
    pub search: Option<String>,
    pub college: Option<String>,
    pub min_rating: Option<f64>,
}

fn account_by_email(tables: &Tables, email: &str) -> Option<UserAccount> {
    let email = normalize_email(email);
    tables.users.find_one(|a| a.profile.email == email)
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Recomputes `user_id`'s mean score and rating count from the stored ratings.
/// A user with no ratings left goes back to 0.
pub(crate) fn refresh_rating(tables: &mut Tables, user_id: UserId) -> WorkflowResult<()> {
    let scores: Vec<f64> = tables
        .ratings
        .iter()
        .filter(|r| r.rated_user_id == user_id)
        .map(|r| f64::from(r.score))
        .collect();
    let mean = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };
    tables.users.update(user_id, |a| {
        a.profile.rating = (mean * 10.0).round() / 10.0;
        a.profile.total_ratings = scores.len() as u32;
    })?;
    Ok(())
}

pub struct AccountService {
    store: Arc<EntityStore>,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(store: Arc<EntityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Creates an account. Emails are unique ignoring case.
    pub async fn register(&self, new_user: NewUser) -> WorkflowResult<User> {
        let email = normalize_email(&new_user.email);
        if !is_valid_email(&email) {
            return Err(WorkflowError::validation("Invalid email format"));
        }
        let name = new_user.name.trim().to_string();
        if name.is_empty() {
            return Err(WorkflowError::validation("Missing required field: name"));
        }
        if new_user.hashed_password.is_empty() {
            return Err(WorkflowError::validation("Missing required field: password"));
        }

        let now = self.clock.now();
        let user = self
            .store
            .write(|t| {
                if account_by_email(t, &email).is_some() {
                    return Err(WorkflowError::conflict("User with this email already exists"));
                }
                let account = t.users.create(UserAccount {
                    profile: User {
                        id: 0,
                        email,
                        name,
                        phone: blank_to_none(new_user.phone),
                        bio: blank_to_none(new_user.bio),
                        college: blank_to_none(new_user.college),
                        year: blank_to_none(new_user.year),
                        major: blank_to_none(new_user.major),
                        skills: new_user.skills,
                        rating: 0.0,
                        total_ratings: 0,
                        profile_picture: None,
                        created_at: now,
                    },
                    hashed_password: new_user.hashed_password,
                });
                Ok(account.profile)
            })
            .await?;
        info!(user_id = user.id, "User registered.");
        Ok(user)
    }

    /// The stored credential for `email`, for the caller to verify a login against.
    pub async fn credentials(&self, email: &str) -> WorkflowResult<UserCredentials> {
        self.store
            .read(|t| account_by_email(t, email))
            .await
            .map(|a| UserCredentials {
                user_id: a.profile.id,
                email: a.profile.email,
                hashed_password: a.hashed_password,
            })
            .ok_or_else(|| WorkflowError::NotFound("User not found".to_string()))
    }

    pub async fn get(&self, user_id: UserId) -> WorkflowResult<User> {
        self.store
            .read(|t| t.users.get(user_id))
            .await
            .map(|a| a.profile)
            .ok_or_else(|| WorkflowError::not_found("User", user_id))
    }

    /// Users matching `query`, newest first.
    pub async fn list(&self, query: &UserQuery) -> Vec<User> {
        let needle = query.search.as_deref().map(str::to_lowercase);
        let mut users: Vec<User> = self
            .store
            .read(|t| {
                t.users
                    .iter()
                    .map(|a| &a.profile)
                    .filter(|u| {
                        needle.as_deref().map_or(true, |n| {
                            u.name.to_lowercase().contains(n) || u.email.contains(n)
                        })
                    })
                    .filter(|u| {
                        query
                            .college
                            .as_deref()
                            .map_or(true, |c| u.college.as_deref() == Some(c))
                    })
                    .filter(|u| query.min_rating.map_or(true, |min| u.rating >= min))
                    .cloned()
                    .collect()
            })
            .await;
        users.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        users
    }

    /// Edits the acting user's own profile.
    pub async fn update_profile(
        &self,
        user_id: UserId,
        acting_user_id: UserId,
        patch: ProfilePatch,
    ) -> WorkflowResult<User> {
        if user_id != acting_user_id {
            return Err(WorkflowError::forbidden("You can only edit your own profile"));
        }
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(WorkflowError::validation("Name cannot be empty"));
            }
        }

        self.store
            .write(|t| {
                let account = t.users.update(user_id, |a| {
                    let p = &mut a.profile;
                    if let Some(name) = patch.name {
                        p.name = name.trim().to_string();
                    }
                    if patch.phone.is_some() {
                        p.phone = blank_to_none(patch.phone);
                    }
                    if patch.bio.is_some() {
                        p.bio = blank_to_none(patch.bio);
                    }
                    if patch.college.is_some() {
                        p.college = blank_to_none(patch.college);
                    }
                    if patch.year.is_some() {
                        p.year = blank_to_none(patch.year);
                    }
                    if patch.major.is_some() {
                        p.major = blank_to_none(patch.major);
                    }
                    if let Some(skills) = patch.skills {
                        p.skills = skills;
                    }
                    if patch.profile_picture.is_some() {
                        p.profile_picture = blank_to_none(patch.profile_picture);
                    }
                })?;
                Ok(account.profile)
            })
            .await
    }

    /// Replaces the acting user's stored credential.
    pub async fn change_credential(
        &self,
        user_id: UserId,
        acting_user_id: UserId,
        hashed_password: String,
    ) -> WorkflowResult<()> {
        if user_id != acting_user_id {
            return Err(WorkflowError::forbidden("You can only change your own password"));
        }
        if hashed_password.is_empty() {
            return Err(WorkflowError::validation("Missing required field: password"));
        }
        self.store
            .write(|t| {
                t.users.update(user_id, |a| a.hashed_password = hashed_password)?;
                Ok(())
            })
            .await
    }

    /// Records the rater's score for the other party of a completed task and
    /// refreshes the rated user's average.
    pub async fn rate(&self, task_id: TaskId, rater_id: UserId, score: u8) -> WorkflowResult<Rating> {
        if !(1..=5).contains(&score) {
            return Err(WorkflowError::validation("Score must be between 1 and 5"));
        }
        let now = self.clock.now();
        let rating = self
            .store
            .write(|t| {
                let task = t
                    .tasks
                    .get(task_id)
                    .ok_or_else(|| WorkflowError::not_found("Task", task_id))?;
                if task.status != TaskStatus::Completed {
                    return Err(WorkflowError::conflict("Only completed tasks can be rated"));
                }
                let helper_id = t
                    .applications
                    .find_one(|a| a.task_id == task_id && a.status == ApplicationStatus::Accepted)
                    .map(|a| a.helper_id);

                let rated_user_id = if rater_id == task.poster_id {
                    helper_id.ok_or_else(|| {
                        WorkflowError::conflict("This task has no assigned helper to rate")
                    })?
                } else if Some(rater_id) == helper_id {
                    task.poster_id
                } else {
                    return Err(WorkflowError::forbidden(
                        "Only the poster or the assigned helper can rate this task",
                    ));
                };

                if t
                    .ratings
                    .iter()
                    .any(|r| r.task_id == task_id && r.rater_id == rater_id)
                {
                    return Err(WorkflowError::conflict("You have already rated this task"));
                }

                let rating = t.ratings.create(Rating {
                    id: 0,
                    task_id,
                    rater_id,
                    rated_user_id,
                    score,
                    created_at: now,
                });

                refresh_rating(t, rated_user_id)?;
                Ok(rating)
            })
            .await?;
        info!(
            task_id,
            rater_id,
            rated_user_id = rating.rated_user_id,
            score,
            "Rating recorded."
        );
        Ok(rating)
    }
}
