//! Shared fixtures for component tests: an in-memory marketplace on a fixed clock.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;

use crate::domain::{JobType, NewTask, NewUser, PayType, Task, User, UserId};
use crate::ports::FixedClock;
use crate::store::EntityStore;
use crate::Marketplace;

pub(crate) struct Fixture {
    pub store: Arc<EntityStore>,
    pub clock: Arc<FixedClock>,
    pub market: Marketplace,
}

impl Fixture {
    /// Starts on Monday 2024-01-15, 12:00 UTC.
    pub fn new() -> Self {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(EntityStore::in_memory());
        let market = Marketplace::new(store.clone(), clock.clone());
        Self {
            store,
            clock,
            market,
        }
    }

    pub fn today(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    /// Moves the clock forward one minute.
    pub fn tick(&self) {
        self.clock.advance(Duration::minutes(1));
    }

    /// Registers `<name>@campus.edu`.
    pub async fn user(&self, name: &str) -> User {
        self.market
            .accounts
            .register(NewUser {
                email: format!("{}@campus.edu", name),
                name: name.to_string(),
                hashed_password: format!("hashed-{}", name),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    pub fn new_task(&self, title: &str, tags: &[&str], pay: f64) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: format!("{} description", title),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            pay_type: PayType::Flat,
            pay_amount: pay,
            date: self.today() + Duration::days(3),
            time_window: "afternoon".to_string(),
            job_type: JobType::Local,
            college: None,
            location_type: "campus".to_string(),
            location_name: "Library".to_string(),
            address: None,
            coordinates: None,
        }
    }

    pub async fn task(&self, poster: UserId, title: &str, tags: &[&str], pay: f64) -> Task {
        let new_task = self.new_task(title, tags, pay);
        self.market.tasks.post(poster, new_task).await.unwrap()
    }
}
