//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `StoreBackend` port from the `core` crate. It loads every table into the
//! entity store at startup and writes each committed change set back to
//! PostgreSQL using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use getitdone_core::domain::{
    Application, Coordinates, Message, Notification, Rating, Task, User, UserAccount,
};
use getitdone_core::ports::{PortError, PortResult, StoreBackend};
use getitdone_core::store::{ChangeSet, Collection, EntityKind, Record, Tables};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `StoreBackend` port.
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    /// Creates a new `PgBackend`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: impl std::fmt::Display) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn parse_column<T: FromStr>(value: &str) -> PortResult<T>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(unexpected)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: i64,
    email: String,
    name: String,
    hashed_password: String,
    phone: Option<String>,
    bio: Option<String>,
    college: Option<String>,
    year: Option<String>,
    major: Option<String>,
    skills: Vec<String>,
    rating: f64,
    total_ratings: i32,
    profile_picture: Option<String>,
    created_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> UserAccount {
        UserAccount {
            profile: User {
                id: self.id,
                email: self.email,
                name: self.name,
                phone: self.phone,
                bio: self.bio,
                college: self.college,
                year: self.year,
                major: self.major,
                skills: self.skills,
                rating: self.rating,
                total_ratings: self.total_ratings.max(0) as u32,
                profile_picture: self.profile_picture,
                created_at: self.created_at,
            },
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct TaskRecord {
    id: i64,
    title: String,
    description: String,
    tags: Vec<String>,
    pay_type: String,
    pay_amount: f64,
    platform_fee: f64,
    helper_payment: f64,
    date: NaiveDate,
    time_window: String,
    job_type: String,
    college: Option<String>,
    location_type: String,
    location_name: String,
    address: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    poster_id: i64,
    status: String,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    completion_notes: Option<String>,
    payment_confirmed: Option<bool>,
}
impl TaskRecord {
    fn to_domain(self) -> PortResult<Task> {
        Ok(Task {
            id: self.id,
            title: self.title,
            description: self.description,
            tags: self.tags,
            pay_type: parse_column(&self.pay_type)?,
            pay_amount: self.pay_amount,
            platform_fee: self.platform_fee,
            helper_payment: self.helper_payment,
            date: self.date,
            time_window: self.time_window,
            job_type: parse_column(&self.job_type)?,
            college: self.college,
            location_type: self.location_type,
            location_name: self.location_name,
            address: self.address,
            coordinates: match (self.lat, self.lng) {
                (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
                _ => None,
            },
            poster_id: self.poster_id,
            status: parse_column(&self.status)?,
            created_at: self.created_at,
            completed_at: self.completed_at,
            completion_notes: self.completion_notes,
            payment_confirmed: self.payment_confirmed,
        })
    }
}

#[derive(FromRow)]
struct ApplicationRecord {
    id: i64,
    task_id: i64,
    helper_id: i64,
    note: String,
    phone: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
}
impl ApplicationRecord {
    fn to_domain(self) -> PortResult<Application> {
        Ok(Application {
            id: self.id,
            task_id: self.task_id,
            helper_id: self.helper_id,
            note: self.note,
            phone: self.phone,
            status: parse_column(&self.status)?,
            created_at: self.created_at,
            accepted_at: self.accepted_at,
            rejected_at: self.rejected_at,
        })
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: i64,
    sender_id: i64,
    receiver_id: i64,
    content: String,
    read: bool,
    created_at: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> Message {
        Message {
            id: self.id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content: self.content,
            read: self.read,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct NotificationRecord {
    id: i64,
    user_id: i64,
    #[sqlx(rename = "type")]
    kind: String,
    title: String,
    message: String,
    data: serde_json::Value,
    read: bool,
    created_at: DateTime<Utc>,
}
impl NotificationRecord {
    fn to_domain(self) -> PortResult<Notification> {
        Ok(Notification {
            id: self.id,
            user_id: self.user_id,
            kind: parse_column(&self.kind)?,
            title: self.title,
            message: self.message,
            data: self.data,
            read: self.read,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct RatingRecord {
    id: i64,
    task_id: i64,
    rater_id: i64,
    rated_user_id: i64,
    score: i16,
    created_at: DateTime<Utc>,
}
impl RatingRecord {
    fn to_domain(self) -> PortResult<Rating> {
        Ok(Rating {
            id: self.id,
            task_id: self.task_id,
            rater_id: self.rater_id,
            rated_user_id: self.rated_user_id,
            score: u8::try_from(self.score)
                .ok()
                .filter(|s| (1..=5).contains(s))
                .ok_or_else(|| unexpected(format!("rating score {} out of range", self.score)))?,
            created_at: self.created_at,
        })
    }
}

//=========================================================================================
// Upserts
//=========================================================================================

async fn upsert_user(tx: &mut Transaction<'_, Postgres>, a: &UserAccount) -> sqlx::Result<()> {
    let u = &a.profile;
    sqlx::query(
        "INSERT INTO users (id, email, name, hashed_password, phone, bio, college, year, major, \
         skills, rating, total_ratings, profile_picture, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
         ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, name = EXCLUDED.name, \
         hashed_password = EXCLUDED.hashed_password, phone = EXCLUDED.phone, bio = EXCLUDED.bio, \
         college = EXCLUDED.college, year = EXCLUDED.year, major = EXCLUDED.major, \
         skills = EXCLUDED.skills, rating = EXCLUDED.rating, \
         total_ratings = EXCLUDED.total_ratings, profile_picture = EXCLUDED.profile_picture",
    )
    .bind(u.id)
    .bind(&u.email)
    .bind(&u.name)
    .bind(&a.hashed_password)
    .bind(&u.phone)
    .bind(&u.bio)
    .bind(&u.college)
    .bind(&u.year)
    .bind(&u.major)
    .bind(&u.skills)
    .bind(u.rating)
    .bind(i32::try_from(u.total_ratings).unwrap_or(i32::MAX))
    .bind(&u.profile_picture)
    .bind(u.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_task(tx: &mut Transaction<'_, Postgres>, t: &Task) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO tasks (id, title, description, tags, pay_type, pay_amount, platform_fee, \
         helper_payment, date, time_window, job_type, college, location_type, location_name, \
         address, lat, lng, poster_id, status, created_at, completed_at, completion_notes, \
         payment_confirmed) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
         $18, $19, $20, $21, $22, $23) \
         ON CONFLICT (id) DO UPDATE SET title = EXCLUDED.title, \
         description = EXCLUDED.description, tags = EXCLUDED.tags, pay_type = EXCLUDED.pay_type, \
         pay_amount = EXCLUDED.pay_amount, platform_fee = EXCLUDED.platform_fee, \
         helper_payment = EXCLUDED.helper_payment, date = EXCLUDED.date, \
         time_window = EXCLUDED.time_window, job_type = EXCLUDED.job_type, \
         college = EXCLUDED.college, location_type = EXCLUDED.location_type, \
         location_name = EXCLUDED.location_name, address = EXCLUDED.address, \
         lat = EXCLUDED.lat, lng = EXCLUDED.lng, status = EXCLUDED.status, \
         completed_at = EXCLUDED.completed_at, completion_notes = EXCLUDED.completion_notes, \
         payment_confirmed = EXCLUDED.payment_confirmed",
    )
    .bind(t.id)
    .bind(&t.title)
    .bind(&t.description)
    .bind(&t.tags)
    .bind(t.pay_type.as_str())
    .bind(t.pay_amount)
    .bind(t.platform_fee)
    .bind(t.helper_payment)
    .bind(t.date)
    .bind(&t.time_window)
    .bind(t.job_type.as_str())
    .bind(&t.college)
    .bind(&t.location_type)
    .bind(&t.location_name)
    .bind(&t.address)
    .bind(t.coordinates.map(|c| c.lat))
    .bind(t.coordinates.map(|c| c.lng))
    .bind(t.poster_id)
    .bind(t.status.as_str())
    .bind(t.created_at)
    .bind(t.completed_at)
    .bind(&t.completion_notes)
    .bind(t.payment_confirmed)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_application(
    tx: &mut Transaction<'_, Postgres>,
    a: &Application,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO applications (id, task_id, helper_id, note, phone, status, created_at, \
         accepted_at, rejected_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (id) DO UPDATE SET note = EXCLUDED.note, phone = EXCLUDED.phone, \
         status = EXCLUDED.status, accepted_at = EXCLUDED.accepted_at, \
         rejected_at = EXCLUDED.rejected_at",
    )
    .bind(a.id)
    .bind(a.task_id)
    .bind(a.helper_id)
    .bind(&a.note)
    .bind(&a.phone)
    .bind(a.status.as_str())
    .bind(a.created_at)
    .bind(a.accepted_at)
    .bind(a.rejected_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_message(tx: &mut Transaction<'_, Postgres>, m: &Message) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO messages (id, sender_id, receiver_id, content, read, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (id) DO UPDATE SET read = EXCLUDED.read",
    )
    .bind(m.id)
    .bind(m.sender_id)
    .bind(m.receiver_id)
    .bind(&m.content)
    .bind(m.read)
    .bind(m.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_notification(
    tx: &mut Transaction<'_, Postgres>,
    n: &Notification,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO notifications (id, user_id, type, title, message, data, read, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (id) DO UPDATE SET read = EXCLUDED.read",
    )
    .bind(n.id)
    .bind(n.user_id)
    .bind(n.kind.as_str())
    .bind(&n.title)
    .bind(&n.message)
    .bind(&n.data)
    .bind(n.read)
    .bind(n.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_rating(tx: &mut Transaction<'_, Postgres>, r: &Rating) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO ratings (id, task_id, rater_id, rated_user_id, score, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (id) DO UPDATE SET score = EXCLUDED.score",
    )
    .bind(r.id)
    .bind(r.task_id)
    .bind(r.rater_id)
    .bind(r.rated_user_id)
    .bind(i16::from(r.score))
    .bind(r.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Deletes of a change set, children before parents so foreign keys hold.
/// Rows of the same kind keep their journal order.
fn delete_order(changes: &ChangeSet) -> Vec<(EntityKind, i64)> {
    let mut deletes = changes.deletes.clone();
    deletes.sort_by(|a, b| b.0.cmp(&a.0));
    deletes
}

fn table_name(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::User => "users",
        EntityKind::Task => "tasks",
        EntityKind::Application => "applications",
        EntityKind::Message => "messages",
        EntityKind::Notification => "notifications",
        EntityKind::Rating => "ratings",
    }
}

//=========================================================================================
// `StoreBackend` Trait Implementation
//=========================================================================================

#[async_trait]
impl StoreBackend for PgBackend {
    async fn load(&self) -> PortResult<Tables> {
        let users = sqlx::query_as::<_, UserRecord>("SELECT * FROM users")
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        let tasks = sqlx::query_as::<_, TaskRecord>("SELECT * FROM tasks")
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        let applications = sqlx::query_as::<_, ApplicationRecord>("SELECT * FROM applications")
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        let messages = sqlx::query_as::<_, MessageRecord>("SELECT * FROM messages")
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        let notifications = sqlx::query_as::<_, NotificationRecord>("SELECT * FROM notifications")
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        let ratings = sqlx::query_as::<_, RatingRecord>("SELECT * FROM ratings")
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        Ok(Tables {
            users: Collection::from_rows(users.into_iter().map(UserRecord::to_domain)),
            tasks: Collection::from_rows(
                tasks
                    .into_iter()
                    .map(TaskRecord::to_domain)
                    .collect::<PortResult<Vec<_>>>()?,
            ),
            applications: Collection::from_rows(
                applications
                    .into_iter()
                    .map(ApplicationRecord::to_domain)
                    .collect::<PortResult<Vec<_>>>()?,
            ),
            messages: Collection::from_rows(messages.into_iter().map(MessageRecord::to_domain)),
            notifications: Collection::from_rows(
                notifications
                    .into_iter()
                    .map(NotificationRecord::to_domain)
                    .collect::<PortResult<Vec<_>>>()?,
            ),
            ratings: Collection::from_rows(
                ratings
                    .into_iter()
                    .map(RatingRecord::to_domain)
                    .collect::<PortResult<Vec<_>>>()?,
            ),
        })
    }

    async fn persist(&self, changes: &ChangeSet) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let deletes = delete_order(changes);
        for (kind, id) in &deletes {
            let sql = format!("DELETE FROM {} WHERE id = $1", table_name(*kind));
            sqlx::query(&sql)
                .bind(*id)
                .execute(&mut *tx)
                .await
                .map_err(unexpected)?;
        }

        // Upserts arrive parents first.
        for record in &changes.upserts {
            let result = match record {
                Record::User(a) => upsert_user(&mut tx, a).await,
                Record::Task(t) => upsert_task(&mut tx, t).await,
                Record::Application(a) => upsert_application(&mut tx, a).await,
                Record::Message(m) => upsert_message(&mut tx, m).await,
                Record::Notification(n) => upsert_notification(&mut tx, n).await,
                Record::Rating(r) => upsert_rating(&mut tx, r).await,
            };
            result.map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)?;
        debug!(
            upserts = changes.upserts.len(),
            deletes = deletes.len(),
            "Change set written to PostgreSQL."
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use getitdone_core::domain::{JobType, PayType, TaskStatus};
    use rstest::rstest;

    fn task_row(lat: Option<f64>, lng: Option<f64>, status: &str) -> TaskRecord {
        TaskRecord {
            id: 7,
            title: "Move couch".into(),
            description: "Two flights of stairs".into(),
            tags: vec!["moving".into()],
            pay_type: "flat".into(),
            pay_amount: 40.0,
            platform_fee: 2.0,
            helper_payment: 38.0,
            date: NaiveDate::from_ymd_opt(2024, 1, 18).unwrap(),
            time_window: "afternoon".into(),
            job_type: "local".into(),
            college: Some("State U".into()),
            location_type: "dorm".into(),
            location_name: "North Hall".into(),
            address: None,
            lat,
            lng,
            poster_id: 1,
            status: status.into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
            completed_at: None,
            completion_notes: None,
            payment_confirmed: None,
        }
    }

    fn rating_row(score: i16) -> RatingRecord {
        RatingRecord {
            id: 1,
            task_id: 7,
            rater_id: 1,
            rated_user_id: 2,
            score,
            created_at: Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 0).unwrap(),
        }
    }

    #[rstest]
    #[case(Some(42.36), Some(-71.06), Some(Coordinates { lat: 42.36, lng: -71.06 }))]
    #[case(Some(42.36), None, None)]
    #[case(None, Some(-71.06), None)]
    #[case(None, None, None)]
    fn task_coordinates_need_both_columns(
        #[case] lat: Option<f64>,
        #[case] lng: Option<f64>,
        #[case] expected: Option<Coordinates>,
    ) {
        let task = task_row(lat, lng, "open").to_domain().unwrap();
        assert_eq!(task.coordinates, expected);
    }

    #[test]
    fn task_row_maps_its_enum_columns() {
        let task = task_row(None, None, "assigned").to_domain().unwrap();
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.pay_type, PayType::Flat);
        assert_eq!(task.job_type, JobType::Local);
    }

    #[test]
    fn unknown_task_status_is_an_unexpected_port_error() {
        let err = task_row(None, None, "archived").to_domain().unwrap_err();
        assert!(matches!(err, PortError::Unexpected(_)));
    }

    #[rstest]
    #[case(1, Some(1))]
    #[case(5, Some(5))]
    #[case(0, None)]
    #[case(6, None)]
    #[case(-3, None)]
    #[case(300, None)]
    fn rating_scores_outside_one_to_five_are_rejected(
        #[case] score: i16,
        #[case] expected: Option<u8>,
    ) {
        match (rating_row(score).to_domain(), expected) {
            (Ok(rating), Some(want)) => assert_eq!(rating.score, want),
            (Err(PortError::Unexpected(_)), None) => {}
            (other, _) => panic!("score {}: unexpected {:?}", score, other),
        }
    }

    #[test]
    fn deletes_run_children_before_parents() {
        let changes = ChangeSet {
            upserts: Vec::new(),
            deletes: vec![
                (EntityKind::Task, 7),
                (EntityKind::Application, 3),
                (EntityKind::User, 1),
                (EntityKind::Rating, 5),
                (EntityKind::Application, 2),
                (EntityKind::Notification, 9),
                (EntityKind::Message, 4),
            ],
        };
        assert_eq!(
            delete_order(&changes),
            vec![
                (EntityKind::Rating, 5),
                (EntityKind::Notification, 9),
                (EntityKind::Message, 4),
                (EntityKind::Application, 3),
                (EntityKind::Application, 2),
                (EntityKind::Task, 7),
                (EntityKind::User, 1),
            ]
        );
    }
}
