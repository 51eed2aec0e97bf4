//! crates/getitdone_core/src/catalog.rs
//!
//! Read-side projections over tasks: text search, structured filters, sorting and
//! tag popularity. Nothing here writes to the store.

use chrono::{Datelike, Duration, NaiveDate};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::{Coordinates, JobType, Task, TaskStatus, UnknownVariant, UserId};
use crate::error::{WorkflowError, WorkflowResult};
use crate::ports::Clock;
use crate::store::{EntityStore, Tables};

/// Mean Earth radius in miles.
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

pub const DEFAULT_NEAR_RADIUS_MILES: f64 = 5.0;

pub const DEFAULT_POPULAR_TAGS: usize = 10;

/// Great-circle distance between two points, in miles.
pub fn haversine_miles(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * h.sqrt().atan2((1.0 - h).sqrt())
}

//=========================================================================================
// Filters and sort keys
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFilter {
    Today,
    Tomorrow,
    /// From the coming Saturday onwards.
    Weekend,
}

impl TimeFilter {
    pub fn matches(&self, date: NaiveDate, today: NaiveDate) -> bool {
        match self {
            Self::Today => date == today,
            Self::Tomorrow => date == today + Duration::days(1),
            Self::Weekend => {
                let to_saturday = 6 - i64::from(today.weekday().num_days_from_sunday());
                date >= today + Duration::days(to_saturday)
            }
        }
    }
}

impl FromStr for TimeFilter {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "tomorrow" => Ok(Self::Tomorrow),
            "weekend" => Ok(Self::Weekend),
            other => Err(UnknownVariant {
                kind: "time filter",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Newest,
    Oldest,
    /// Highest pay first.
    Pay,
    /// Lowest pay first.
    PriceLow,
    /// Earliest task date first.
    Deadline,
    /// Best-rated poster first.
    Rating,
    College,
    JobType,
}

impl FromStr for SortKey {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            "pay" | "price_high" => Ok(Self::Pay),
            "price_low" => Ok(Self::PriceLow),
            "deadline" => Ok(Self::Deadline),
            "rating" => Ok(Self::Rating),
            "college" => Ok(Self::College),
            "job_type" => Ok(Self::JobType),
            other => Err(UnknownVariant {
                kind: "sort key",
                value: other.to_string(),
            }),
        }
    }
}

/// Inclusive bounds on `pay_amount`. A missing bound is open.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PriceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl PriceRange {
    fn contains(&self, amount: f64) -> bool {
        self.min.map_or(true, |min| amount >= min) && self.max.map_or(true, |max| amount <= max)
    }
}

/// Optional predicates, combined with AND. Set-valued fields match any member;
/// an empty set places no constraint.
#[derive(Debug, Clone, Default)]
pub struct TaskFilters {
    pub tags: Vec<String>,
    pub status: Vec<TaskStatus>,
    pub job_type: Vec<JobType>,
    pub college: Vec<String>,
    pub price_range: Option<PriceRange>,
    /// Minimum poster rating.
    pub min_rating: Option<f64>,
    /// Miles from `user_location`. Ignored unless both are set.
    pub max_distance: Option<f64>,
    pub user_location: Option<Coordinates>,
    pub time_filter: Option<TimeFilter>,
    /// Case-insensitive substring of location name, location type or college.
    pub location: Option<String>,
}

impl TaskFilters {
    fn validate(&self) -> WorkflowResult<()> {
        if let Some(range) = self.price_range {
            if [range.min, range.max].into_iter().flatten().any(|b| !b.is_finite()) {
                return Err(WorkflowError::validation("Price bounds must be finite numbers"));
            }
        }
        if self.min_rating.is_some_and(|r| !r.is_finite()) {
            return Err(WorkflowError::validation("Minimum rating must be a finite number"));
        }
        if let Some(PriceRange {
            min: Some(min),
            max: Some(max),
        }) = self.price_range
        {
            if min > max {
                return Err(WorkflowError::validation(
                    "Minimum price cannot exceed maximum price",
                ));
            }
        }
        if self.max_distance.is_some_and(|d| !d.is_finite() || d < 0.0) {
            return Err(WorkflowError::validation(
                "Maximum distance must be a non-negative number",
            ));
        }
        Ok(())
    }
}

fn matches_query(task: &Task, needle: &str) -> bool {
    needle.is_empty()
        || task.title.to_lowercase().contains(needle)
        || task.description.to_lowercase().contains(needle)
        || task.tags.iter().any(|tag| tag.contains(needle))
}

struct Matcher<'a> {
    filters: &'a TaskFilters,
    tags: Vec<String>,
    location: Option<String>,
    ratings: &'a HashMap<UserId, f64>,
    today: NaiveDate,
}

impl Matcher<'_> {
    fn matches(&self, task: &Task) -> bool {
        let f = self.filters;

        if !self.tags.is_empty() && !task.tags.iter().any(|t| self.tags.contains(t)) {
            return false;
        }
        if !f.status.is_empty() && !f.status.contains(&task.status) {
            return false;
        }
        if !f.job_type.is_empty() && !f.job_type.contains(&task.job_type) {
            return false;
        }
        if !f.college.is_empty()
            && !task
                .college
                .as_ref()
                .is_some_and(|c| f.college.iter().any(|wanted| wanted == c))
        {
            return false;
        }
        if let Some(range) = f.price_range {
            if !range.contains(task.pay_amount) {
                return false;
            }
        }
        if let Some(min) = f.min_rating {
            let rating = self.ratings.get(&task.poster_id).copied().unwrap_or(0.0);
            if rating < min {
                return false;
            }
        }
        if let (Some(max), Some(origin)) = (f.max_distance, f.user_location) {
            if task.job_type != JobType::Remote {
                match task.coordinates {
                    Some(at) if haversine_miles(origin, at) <= max => {}
                    _ => return false,
                }
            }
        }
        if let Some(time) = f.time_filter {
            if !time.matches(task.date, self.today) {
                return false;
            }
        }
        if let Some(needle) = &self.location {
            let hit = task.location_name.to_lowercase().contains(needle)
                || task.location_type.to_lowercase().contains(needle)
                || task
                    .college
                    .as_ref()
                    .is_some_and(|c| c.to_lowercase().contains(needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

fn poster_ratings(tables: &Tables) -> HashMap<UserId, f64> {
    tables
        .users
        .iter()
        .map(|a| (a.profile.id, a.profile.rating))
        .collect()
}

/// Stable sort of `tasks` by `key`, using `ratings` for poster lookups.
fn sort_with(tasks: &mut [Task], key: SortKey, ratings: &HashMap<UserId, f64>) {
    let rating = |t: &Task| ratings.get(&t.poster_id).copied().unwrap_or(0.0);
    match key {
        SortKey::Newest => tasks.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id))),
        SortKey::Oldest => tasks.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id))),
        SortKey::Pay => tasks.sort_by(|a, b| b.pay_amount.total_cmp(&a.pay_amount)),
        SortKey::PriceLow => tasks.sort_by(|a, b| a.pay_amount.total_cmp(&b.pay_amount)),
        SortKey::Deadline => tasks.sort_by_key(|t| t.date),
        SortKey::Rating => tasks.sort_by(|a, b| rating(b).total_cmp(&rating(a))),
        SortKey::College => tasks.sort_by(|a, b| {
            let a = a.college.as_deref().unwrap_or("");
            let b = b.college.as_deref().unwrap_or("");
            a.cmp(b)
        }),
        SortKey::JobType => tasks.sort_by(|a, b| a.job_type.as_str().cmp(b.job_type.as_str())),
    }
}

/// Counts tag usage and returns the `top_n` most used, ties in first-seen order.
pub fn rank_tags<'a>(tasks: impl IntoIterator<Item = &'a Task>, top_n: usize) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for task in tasks {
        for tag in &task.tags {
            match index.get(tag) {
                Some(&i) => counts[i].1 += 1,
                None => {
                    index.insert(tag.clone(), counts.len());
                    counts.push((tag.clone(), 1));
                }
            }
        }
    }
    // sort_by is stable, so equal counts keep first-seen order.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(top_n).map(|(tag, _)| tag).collect()
}

//=========================================================================================
// TaskCatalog
//=========================================================================================

pub struct TaskCatalog {
    store: Arc<EntityStore>,
    clock: Arc<dyn Clock>,
}

impl TaskCatalog {
    pub fn new(store: Arc<EntityStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Tasks matching `query` and `filters`, newest first.
    pub async fn search(&self, query: &str, filters: &TaskFilters) -> WorkflowResult<Vec<Task>> {
        self.browse(query, filters, SortKey::default()).await
    }

    /// Like [`search`](Self::search), ordered by `sort`.
    pub async fn browse(
        &self,
        query: &str,
        filters: &TaskFilters,
        sort: SortKey,
    ) -> WorkflowResult<Vec<Task>> {
        filters.validate()?;
        let needle = query.trim().to_lowercase();
        let today = self.clock.today();

        let tasks = self
            .store
            .read(|t| {
                let ratings = poster_ratings(t);
                let matcher = Matcher {
                    filters,
                    tags: filters
                        .tags
                        .iter()
                        .map(|tag| tag.trim().to_lowercase())
                        .filter(|tag| !tag.is_empty())
                        .collect(),
                    location: filters
                        .location
                        .as_deref()
                        .map(|l| l.trim().to_lowercase())
                        .filter(|l| !l.is_empty()),
                    ratings: &ratings,
                    today,
                };
                let mut hits: Vec<Task> = t
                    .tasks
                    .iter()
                    .filter(|task| matches_query(task, &needle) && matcher.matches(task))
                    .cloned()
                    .collect();
                sort_with(&mut hits, sort, &ratings);
                hits
            })
            .await;
        Ok(tasks)
    }

    /// Re-orders an already fetched list. Stable: equal keys keep their input order.
    pub async fn sort(&self, mut tasks: Vec<Task>, key: SortKey) -> Vec<Task> {
        let ratings = self.store.read(poster_ratings).await;
        sort_with(&mut tasks, key, &ratings);
        tasks
    }

    pub async fn popular_tags(&self, top_n: usize) -> Vec<String> {
        self.store
            .read(|t| rank_tags(t.tasks.iter(), top_n))
            .await
    }

    /// Tasks with coordinates within `radius_miles` of the point, nearest first.
    pub async fn near(&self, lat: f64, lng: f64, radius_miles: f64) -> Vec<Task> {
        let origin = Coordinates { lat, lng };
        let mut hits: Vec<(f64, Task)> = self
            .store
            .read(|t| {
                t.tasks
                    .iter()
                    .filter_map(|task| {
                        let distance = haversine_miles(origin, task.coordinates?);
                        (distance <= radius_miles).then(|| (distance, task.clone()))
                    })
                    .collect()
            })
            .await;
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.into_iter().map(|(_, task)| task).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use rstest::rstest;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn haversine_matches_known_distance() {
        // Boston to New York is roughly 190 miles.
        let boston = Coordinates { lat: 42.3601, lng: -71.0589 };
        let nyc = Coordinates { lat: 40.7128, lng: -74.0060 };
        let d = haversine_miles(boston, nyc);
        assert!((185.0..195.0).contains(&d), "got {}", d);
        assert_eq!(haversine_miles(boston, boston), 0.0);
    }

    #[rstest]
    // 2024-01-15 is a Monday.
    #[case(TimeFilter::Today, date(2024, 1, 15), true)]
    #[case(TimeFilter::Today, date(2024, 1, 16), false)]
    #[case(TimeFilter::Tomorrow, date(2024, 1, 16), true)]
    #[case(TimeFilter::Weekend, date(2024, 1, 19), false)]
    #[case(TimeFilter::Weekend, date(2024, 1, 20), true)]
    #[case(TimeFilter::Weekend, date(2024, 1, 21), true)]
    fn time_filter_against_monday(
        #[case] filter: TimeFilter,
        #[case] task_date: NaiveDate,
        #[case] expected: bool,
    ) {
        assert_eq!(filter.matches(task_date, date(2024, 1, 15)), expected);
    }

    #[rstest]
    #[case("newest", SortKey::Newest)]
    #[case("PAY", SortKey::Pay)]
    #[case("price_low", SortKey::PriceLow)]
    #[case("deadline", SortKey::Deadline)]
    #[case("job_type", SortKey::JobType)]
    fn sort_keys_parse(#[case] input: &str, #[case] expected: SortKey) {
        assert_eq!(input.parse::<SortKey>().unwrap(), expected);
    }

    #[tokio::test]
    async fn rank_tags_orders_by_count_then_first_seen() {
        let fx = Fixture::new();
        let p = fx.user("p").await;
        for tags in [&["a", "b"][..], &["a"], &["b"], &["a"]] {
            fx.task(p.id, "t", tags, 1.0).await;
        }
        let tasks = fx.store.read(|t| t.tasks.all()).await;

        assert_eq!(rank_tags(&tasks, 2), vec!["a", "b"]);
        assert_eq!(rank_tags(&tasks, 1), vec!["a"]);
        assert_eq!(rank_tags(&tasks[2..3], 10), vec!["b"]);
    }

    #[tokio::test]
    async fn popular_tags_over_the_store() {
        let fx = Fixture::new();
        let p = fx.user("p").await;
        fx.task(p.id, "one", &["b"], 1.0).await;
        fx.task(p.id, "two", &["a", "b"], 1.0).await;
        fx.task(p.id, "three", &["a"], 1.0).await;
        fx.task(p.id, "four", &["c"], 1.0).await;

        assert_eq!(fx.market.catalog.popular_tags(2).await, vec!["b", "a"]);
        assert_eq!(fx.market.catalog.popular_tags(10).await.len(), 3);
    }

    #[tokio::test]
    async fn empty_search_returns_every_task_newest_first() {
        let fx = Fixture::new();
        let p = fx.user("p").await;
        let first = fx.task(p.id, "Laundry", &["chores"], 10.0).await;
        fx.tick();
        let second = fx.task(p.id, "Essay review", &["writing"], 25.0).await;

        let all = fx
            .market
            .catalog
            .search("", &TaskFilters::default())
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn query_matches_title_description_and_tags() {
        let fx = Fixture::new();
        let p = fx.user("p").await;
        fx.task(p.id, "Laundry", &["chores"], 10.0).await;
        fx.task(p.id, "Essay review", &["writing"], 25.0).await;
        let catalog = &fx.market.catalog;
        let none = TaskFilters::default();

        assert_eq!(catalog.search("LAUND", &none).await.unwrap().len(), 1);
        assert_eq!(catalog.search("writ", &none).await.unwrap().len(), 1);
        assert_eq!(catalog.search("description", &none).await.unwrap().len(), 2);
        // No subsequence matching: "lry" appears in order in "Laundry" but not contiguously.
        assert!(catalog.search("lry", &none).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn filters_combine_with_and() {
        let fx = Fixture::new();
        let p = fx.user("p").await;
        fx.task(p.id, "Cheap chores", &["chores"], 10.0).await;
        fx.task(p.id, "Pricey chores", &["chores", "cleaning"], 60.0).await;
        fx.task(p.id, "Pricey writing", &["writing"], 60.0).await;

        let filters = TaskFilters {
            tags: vec!["Chores".into(), "nothing".into()],
            price_range: Some(PriceRange { min: Some(50.0), max: Some(60.0) }),
            ..Default::default()
        };
        let hits = fx.market.catalog.search("", &filters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Pricey chores");

        let bad = TaskFilters {
            price_range: Some(PriceRange { min: Some(10.0), max: Some(5.0) }),
            ..Default::default()
        };
        assert!(matches!(
            fx.market.catalog.search("", &bad).await,
            Err(WorkflowError::Validation(_))
        ));
    }

    #[rstest]
    #[case(TaskFilters { price_range: Some(PriceRange { min: Some(f64::NAN), max: None }), ..Default::default() })]
    #[case(TaskFilters { price_range: Some(PriceRange { min: None, max: Some(f64::NAN) }), ..Default::default() })]
    #[case(TaskFilters { price_range: Some(PriceRange { min: Some(f64::NEG_INFINITY), max: Some(5.0) }), ..Default::default() })]
    #[case(TaskFilters { min_rating: Some(f64::NAN), ..Default::default() })]
    #[tokio::test]
    async fn non_finite_bounds_are_rejected(#[case] filters: TaskFilters) {
        let fx = Fixture::new();
        let p = fx.user("p").await;
        fx.task(p.id, "Cheap chores", &["chores"], 10.0).await;
        assert!(matches!(
            fx.market.catalog.search("", &filters).await,
            Err(WorkflowError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn distance_filter_passes_remote_and_drops_unplaced_local() {
        let fx = Fixture::new();
        let p = fx.user("p").await;
        let origin = Coordinates { lat: 42.3601, lng: -71.0589 };

        let mut close = fx.new_task("close", &[], 1.0);
        close.coordinates = Some(Coordinates { lat: 42.3650, lng: -71.0600 });
        let mut far = fx.new_task("far", &[], 1.0);
        far.coordinates = Some(Coordinates { lat: 40.7128, lng: -74.0060 });
        let unplaced = fx.new_task("unplaced", &[], 1.0);
        let mut remote = fx.new_task("remote", &[], 1.0);
        remote.job_type = JobType::Remote;
        for t in [close, far, unplaced, remote] {
            fx.market.tasks.post(p.id, t).await.unwrap();
        }

        let filters = TaskFilters {
            max_distance: Some(10.0),
            user_location: Some(origin),
            ..Default::default()
        };
        let mut titles: Vec<_> = fx
            .market
            .catalog
            .search("", &filters)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        titles.sort();
        assert_eq!(titles, vec!["close", "remote"]);

        let near = fx.market.catalog.near(origin.lat, origin.lng, 5.0).await;
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].title, "close");
    }

    #[tokio::test]
    async fn min_rating_and_rating_sort_use_the_poster() {
        let fx = Fixture::new();
        let low = fx.user("low").await;
        let high = fx.user("high").await;
        fx.task(low.id, "from low", &[], 1.0).await;
        fx.task(high.id, "from high", &[], 1.0).await;
        fx.store
            .write(|t| t.users.update(high.id, |a| a.profile.rating = 4.5))
            .await
            .unwrap();

        let filters = TaskFilters { min_rating: Some(4.0), ..Default::default() };
        let hits = fx.market.catalog.search("", &filters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].poster_id, high.id);

        let all = fx
            .market
            .catalog
            .browse("", &TaskFilters::default(), SortKey::Oldest)
            .await
            .unwrap();
        let sorted = fx.market.catalog.sort(all, SortKey::Rating).await;
        assert_eq!(sorted[0].poster_id, high.id);
    }

    #[tokio::test]
    async fn pay_sort_is_stable_for_ties() {
        let fx = Fixture::new();
        let p = fx.user("p").await;
        let a = fx.task(p.id, "a", &[], 20.0).await;
        let b = fx.task(p.id, "b", &[], 50.0).await;
        let c = fx.task(p.id, "c", &[], 20.0).await;

        let input = vec![a.clone(), b.clone(), c.clone()];
        let sorted = fx.market.catalog.sort(input, SortKey::Pay).await;
        let ids: Vec<_> = sorted.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b.id, a.id, c.id]);

        let cheap = fx.market.catalog.sort(vec![b, c, a.clone()], SortKey::PriceLow).await;
        assert_eq!(cheap[0].title, "c");
        assert_eq!(cheap[1].title, "a");
    }

    #[tokio::test]
    async fn time_and_location_filters() {
        let fx = Fixture::new();
        let p = fx.user("p").await;
        let mut today = fx.new_task("today", &[], 1.0);
        today.date = fx.today();
        today.location_name = "Science Hall".into();
        let mut saturday = fx.new_task("saturday", &[], 1.0);
        saturday.date = date(2024, 1, 20);
        for t in [today, saturday] {
            fx.market.tasks.post(p.id, t).await.unwrap();
        }
        let catalog = &fx.market.catalog;

        let weekend = TaskFilters { time_filter: Some(TimeFilter::Weekend), ..Default::default() };
        let hits = catalog.search("", &weekend).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "saturday");

        let hall = TaskFilters { location: Some("science".into()), ..Default::default() };
        let hits = catalog.search("", &hall).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "today");
    }
}
