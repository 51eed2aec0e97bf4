//! crates/getitdone_core/src/domain.rs
//!
//! Defines the core data records of the marketplace: users, tasks, applications,
//! messages, notifications and ratings. Records are plain data; all rules about
//! how they change live in the component modules.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type UserId = i64;
pub type TaskId = i64;
pub type ApplicationId = i64;
pub type MessageId = i64;
pub type NotificationId = i64;
pub type RatingId = i64;

/// Share of a task's pay retained by the platform.
pub const PLATFORM_FEE_RATE: f64 = 0.05;

/// Rounds a money amount to cents.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Error returned when a string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// Lower-case string forms shared by serde, the query-string parser and the SQL adapter.
macro_rules! string_enum {
    ($name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

//=========================================================================================
// Users
//=========================================================================================

/// A user's public profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub college: Option<String>,
    pub year: Option<String>,
    pub major: Option<String>,
    pub skills: Vec<String>,
    /// Mean score of all ratings received, in [0, 5].
    pub rating: f64,
    pub total_ratings: u32,
    pub profile_picture: Option<String>,
    pub created_at: DateTime<Utc>,
}

// Only used internally for login - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: UserId,
    pub email: String,
    pub hashed_password: String,
}

/// The stored form of a user: the profile plus its opaque credential.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub profile: User,
    pub hashed_password: String,
}

/// Registration input. The password arrives already hashed.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub hashed_password: String,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub college: Option<String>,
    pub year: Option<String>,
    pub major: Option<String>,
    pub skills: Vec<String>,
}

/// Profile fields a user may edit. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub college: Option<String>,
    pub year: Option<String>,
    pub major: Option<String>,
    pub skills: Option<Vec<String>>,
    pub profile_picture: Option<String>,
}

//=========================================================================================
// Tasks
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayType {
    Flat,
    Hour,
}

string_enum!(PayType, "pay type" { Flat => "flat", Hour => "hour" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Local,
    Remote,
}

string_enum!(JobType, "job type" { Local => "local", Remote => "remote" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Open,
    /// Settable by the owner only; no transition enters or leaves it automatically.
    Review,
    Assigned,
    Completed,
}

string_enum!(TaskStatus, "task status" {
    Open => "open",
    Review => "review",
    Assigned => "assigned",
    Completed => "completed",
});

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    /// Lower-case, unique, in the order the poster entered them.
    pub tags: Vec<String>,
    pub pay_type: PayType,
    pub pay_amount: f64,
    pub platform_fee: f64,
    pub helper_payment: f64,
    pub date: NaiveDate,
    pub time_window: String,
    pub job_type: JobType,
    pub college: Option<String>,
    pub location_type: String,
    pub location_name: String,
    pub address: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub poster_id: UserId,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_notes: Option<String>,
    pub payment_confirmed: Option<bool>,
}

impl Task {
    /// Recomputes the derived fee split from `pay_amount`.
    pub fn reprice(&mut self) {
        self.platform_fee = round_cents(self.pay_amount * PLATFORM_FEE_RATE);
        self.helper_payment = round_cents(self.pay_amount - self.platform_fee);
    }
}

/// Input for posting a task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub pay_type: PayType,
    pub pay_amount: f64,
    pub date: NaiveDate,
    pub time_window: String,
    pub job_type: JobType,
    #[serde(default)]
    pub college: Option<String>,
    #[serde(default)]
    pub location_type: String,
    #[serde(default)]
    pub location_name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

/// Owner edits to a task. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub pay_type: Option<PayType>,
    pub pay_amount: Option<f64>,
    pub date: Option<NaiveDate>,
    pub time_window: Option<String>,
    pub job_type: Option<JobType>,
    pub college: Option<String>,
    pub location_type: Option<String>,
    pub location_name: Option<String>,
    pub address: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionData {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub payment_confirmed: bool,
}

//=========================================================================================
// Applications
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Submitted,
    Accepted,
    Rejected,
}

string_enum!(ApplicationStatus, "application status" {
    Submitted => "submitted",
    Accepted => "accepted",
    Rejected => "rejected",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: ApplicationId,
    pub task_id: TaskId,
    pub helper_id: UserId,
    pub note: String,
    pub phone: Option<String>,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
}

//=========================================================================================
// Messages
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// All messages between the viewer and one partner, collapsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub other_user_id: UserId,
    pub last_message: Message,
    pub unread_count: usize,
}

//=========================================================================================
// Notifications
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewApplication,
    ApplicationAccepted,
    ApplicationRejected,
    NewMessage,
    TaskCreated,
    TaskCompleted,
}

string_enum!(NotificationKind, "notification type" {
    NewApplication => "new_application",
    ApplicationAccepted => "application_accepted",
    ApplicationRejected => "application_rejected",
    NewMessage => "new_message",
    TaskCreated => "task_created",
    TaskCompleted => "task_completed",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Kind-specific payload, e.g. `{"taskId": 3}`.
    pub data: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Ratings
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub id: RatingId,
    pub task_id: TaskId,
    pub rater_id: UserId,
    pub rated_user_id: UserId,
    pub score: u8,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("open", TaskStatus::Open)]
    #[case(" Review ", TaskStatus::Review)]
    #[case("ASSIGNED", TaskStatus::Assigned)]
    #[case("completed", TaskStatus::Completed)]
    fn task_status_parses_case_insensitively(#[case] input: &str, #[case] expected: TaskStatus) {
        assert_eq!(input.parse::<TaskStatus>().unwrap(), expected);
    }

    #[test]
    fn unknown_variant_names_the_kind() {
        let err = "gig".parse::<JobType>().unwrap_err();
        assert_eq!(err.to_string(), "unknown job type 'gig'");
    }

    #[test]
    fn notification_kind_serializes_as_type_field() {
        let n = Notification {
            id: 1,
            user_id: 2,
            kind: NotificationKind::ApplicationAccepted,
            title: "t".into(),
            message: "m".into(),
            data: serde_json::json!({"taskId": 3}),
            read: false,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "application_accepted");
        assert_eq!(json["userId"], 2);
    }

    #[test]
    fn reprice_splits_fee_to_cents() {
        let mut task = Task {
            id: 1,
            title: "t".into(),
            description: "d".into(),
            tags: vec![],
            pay_type: PayType::Flat,
            pay_amount: 45.0,
            platform_fee: 0.0,
            helper_payment: 0.0,
            date: NaiveDate::from_ymd_opt(2024, 1, 19).unwrap(),
            time_window: "evening".into(),
            job_type: JobType::Local,
            college: None,
            location_type: String::new(),
            location_name: String::new(),
            address: None,
            coordinates: None,
            poster_id: 1,
            status: TaskStatus::Open,
            created_at: Utc::now(),
            completed_at: None,
            completion_notes: None,
            payment_confirmed: None,
        };
        task.reprice();
        assert_eq!(task.platform_fee, 2.25);
        assert_eq!(task.helper_payment, 42.75);
    }
}
