//! services/api/src/web/tasks.rs
//!
//! Task endpoints: browsing and searching the catalog, posting and editing tasks,
//! completion, ratings, and the per-task application list.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use getitdone_core::catalog::{DEFAULT_NEAR_RADIUS_MILES, DEFAULT_POPULAR_TAGS};
use getitdone_core::{
    Application, ApplicationStatus, CompletionData, Coordinates, NewTask, PriceRange, Rating,
    SortKey, Task, TaskFilters, TaskId, TaskPatch, TimeFilter,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::error::ApiError;
use crate::web::middleware::CurrentUser;
use crate::web::state::AppState;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;

//=========================================================================================
// Query and Payload Types
//=========================================================================================

/// Catalog query string. List-valued fields are comma separated.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TaskQuery {
    /// Free-text search over title, description and tags.
    pub q: Option<String>,
    pub tags: Option<String>,
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub college: Option<String>,
    pub location: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_rating: Option<f64>,
    /// Miles from (`lat`, `lng`).
    pub max_distance: Option<f64>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// today, tomorrow or weekend.
    pub time: Option<String>,
    /// newest, oldest, pay, price_low, deadline, rating, college or job_type.
    pub sort: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn csv(value: &Option<String>) -> impl Iterator<Item = &str> {
    value
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
}

fn parse_list<T: FromStr>(value: &Option<String>) -> Result<Vec<T>, ApiError>
where
    T::Err: std::fmt::Display,
{
    csv(value)
        .map(|part| part.parse::<T>().map_err(|e| ApiError::BadRequest(e.to_string())))
        .collect()
}

fn parse_opt<T: FromStr>(value: &Option<String>) -> Result<Option<T>, ApiError>
where
    T::Err: std::fmt::Display,
{
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| v.parse::<T>().map_err(|e| ApiError::BadRequest(e.to_string())))
        .transpose()
}

impl TaskQuery {
    pub fn filters(&self) -> Result<TaskFilters, ApiError> {
        let user_location = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            (None, None) => None,
            _ => {
                return Err(ApiError::BadRequest(
                    "lat and lng must be given together".to_string(),
                ))
            }
        };
        let price_range = (self.min_price.is_some() || self.max_price.is_some()).then_some(
            PriceRange {
                min: self.min_price,
                max: self.max_price,
            },
        );

        Ok(TaskFilters {
            tags: csv(&self.tags).map(str::to_string).collect(),
            status: parse_list(&self.status)?,
            job_type: parse_list(&self.job_type)?,
            college: csv(&self.college).map(str::to_string).collect(),
            price_range,
            min_rating: self.min_rating,
            max_distance: self.max_distance,
            user_location,
            time_filter: parse_opt::<TimeFilter>(&self.time)?,
            location: self.location.clone(),
        })
    }

    pub fn sort_key(&self) -> Result<SortKey, ApiError> {
        Ok(parse_opt::<SortKey>(&self.sort)?.unwrap_or_default())
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskPage {
    #[schema(value_type = Vec<Object>)]
    pub tasks: Vec<Task>,
    /// Matches before paging.
    pub total: usize,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TagsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NearQuery {
    pub lat: f64,
    pub lng: f64,
    /// Miles; defaults to 5.
    pub radius: Option<f64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatusQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RateRequest {
    pub score: u8,
}

//=========================================================================================
// Public Handlers
//=========================================================================================

/// GET /tasks - Search, filter, sort and page the task catalog
#[utoipa::path(
    get,
    path = "/tasks",
    params(TaskQuery),
    responses(
        (status = 200, description = "Matching tasks", body = TaskPage),
        (status = 400, description = "Malformed filter")
    )
)]
pub async fn list_tasks_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<TaskPage>, ApiError> {
    let filters = query.filters()?;
    let sort = query.sort_key()?;
    let all = state
        .market
        .catalog
        .browse(query.q.as_deref().unwrap_or(""), &filters, sort)
        .await?;

    let total = all.len();
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let tasks = all
        .into_iter()
        .skip(query.offset.unwrap_or(0))
        .take(limit)
        .collect();
    Ok(Json(TaskPage { tasks, total }))
}

/// GET /tasks/popular-tags - Most used tags, most popular first
#[utoipa::path(
    get,
    path = "/tasks/popular-tags",
    params(TagsQuery),
    responses((status = 200, description = "Tag names", body = Vec<String>))
)]
pub async fn popular_tags_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TagsQuery>,
) -> Json<Vec<String>> {
    let top_n = query.limit.unwrap_or(DEFAULT_POPULAR_TAGS);
    Json(state.market.catalog.popular_tags(top_n).await)
}

/// GET /tasks/near - Tasks with coordinates within a radius, nearest first
#[utoipa::path(
    get,
    path = "/tasks/near",
    params(NearQuery),
    responses((status = 200, description = "Nearby tasks"))
)]
pub async fn near_tasks_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let radius = query.radius.unwrap_or(DEFAULT_NEAR_RADIUS_MILES);
    if !radius.is_finite() || radius < 0.0 {
        return Err(ApiError::BadRequest("radius must be non-negative".to_string()));
    }
    Ok(Json(
        state.market.catalog.near(query.lat, query.lng, radius).await,
    ))
}

/// GET /tasks/{id} - One task
#[utoipa::path(
    get,
    path = "/tasks/{id}",
    params(("id" = i64, Path, description = "Task id")),
    responses(
        (status = 200, description = "The task"),
        (status = 404, description = "No such task")
    )
)]
pub async fn get_task_handler(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.market.tasks.get(task_id).await?))
}

//=========================================================================================
// Protected Handlers
//=========================================================================================

/// POST /tasks - Post a new task
#[utoipa::path(
    post,
    path = "/tasks",
    request_body(content_type = "application/json", description = "The task to post."),
    responses(
        (status = 201, description = "Task posted"),
        (status = 400, description = "Missing or invalid field")
    ),
    security(("bearer" = []))
)]
pub async fn create_task_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(new_task): Json<NewTask>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.market.tasks.post(user_id, new_task).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// PUT /tasks/{id} - Edit one of the caller's tasks
#[utoipa::path(
    put,
    path = "/tasks/{id}",
    params(("id" = i64, Path, description = "Task id")),
    request_body(content_type = "application/json", description = "Fields to change."),
    responses(
        (status = 200, description = "Updated task"),
        (status = 403, description = "Not the poster"),
        (status = 409, description = "Status change not allowed")
    ),
    security(("bearer" = []))
)]
pub async fn update_task_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(task_id): Path<TaskId>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.market.tasks.edit(task_id, user_id, patch).await?))
}

/// DELETE /tasks/{id} - Delete one of the caller's tasks and its applications
#[utoipa::path(
    delete,
    path = "/tasks/{id}",
    params(("id" = i64, Path, description = "Task id")),
    responses(
        (status = 204, description = "Task deleted"),
        (status = 403, description = "Not the poster")
    ),
    security(("bearer" = []))
)]
pub async fn delete_task_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(task_id): Path<TaskId>,
) -> Result<StatusCode, ApiError> {
    state.market.tasks.remove(task_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /tasks/{id}/complete - Mark an assigned task completed
#[utoipa::path(
    post,
    path = "/tasks/{id}/complete",
    params(("id" = i64, Path, description = "Task id")),
    request_body(content_type = "application/json", description = "Completion notes and payment confirmation."),
    responses(
        (status = 200, description = "Completed task"),
        (status = 403, description = "Neither poster nor assigned helper"),
        (status = 409, description = "Task is not assigned")
    ),
    security(("bearer" = []))
)]
pub async fn complete_task_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(task_id): Path<TaskId>,
    Json(completion): Json<CompletionData>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(
        state
            .market
            .workflow
            .complete(task_id, user_id, completion)
            .await?,
    ))
}

/// POST /tasks/{id}/ratings - Rate the other party of a completed task
#[utoipa::path(
    post,
    path = "/tasks/{id}/ratings",
    params(("id" = i64, Path, description = "Task id")),
    request_body = RateRequest,
    responses(
        (status = 201, description = "Rating recorded"),
        (status = 409, description = "Task not completed or already rated")
    ),
    security(("bearer" = []))
)]
pub async fn rate_task_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(task_id): Path<TaskId>,
    Json(req): Json<RateRequest>,
) -> Result<(StatusCode, Json<Rating>), ApiError> {
    let rating = state.market.accounts.rate(task_id, user_id, req.score).await?;
    Ok((StatusCode::CREATED, Json(rating)))
}

/// GET /tasks/{id}/applications - Applications on one of the caller's tasks
#[utoipa::path(
    get,
    path = "/tasks/{id}/applications",
    params(("id" = i64, Path, description = "Task id"), StatusQuery),
    responses(
        (status = 200, description = "Applications, newest first"),
        (status = 403, description = "Not the poster")
    ),
    security(("bearer" = []))
)]
pub async fn task_applications_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(task_id): Path<TaskId>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<Application>>, ApiError> {
    let status = parse_opt::<ApplicationStatus>(&query.status)?;
    Ok(Json(
        state
            .market
            .workflow
            .for_task(task_id, user_id, status)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::{Duration, Utc};
    use getitdone_core::{JobType, NewUser, PayType, TaskStatus, UserId};

    fn state() -> Arc<AppState> {
        Arc::new(AppState::in_memory(Arc::new(Config::default())))
    }

    async fn register(state: &AppState, name: &str) -> UserId {
        state
            .market
            .accounts
            .register(NewUser {
                email: format!("{}@campus.edu", name),
                name: name.to_string(),
                hashed_password: "x".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    fn new_task(title: &str, tags: &[&str], pay: f64) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: "details".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            pay_type: PayType::Flat,
            pay_amount: pay,
            date: Utc::now().date_naive() + Duration::days(2),
            time_window: "morning".to_string(),
            job_type: JobType::Local,
            college: None,
            location_type: String::new(),
            location_name: String::new(),
            address: None,
            coordinates: None,
        }
    }

    #[test]
    fn query_string_becomes_filters() {
        let query = TaskQuery {
            tags: Some("moving, heavy,".into()),
            status: Some("open,review".into()),
            job_type: Some("remote".into()),
            min_price: Some(10.0),
            time: Some("weekend".into()),
            sort: Some("price_low".into()),
            ..Default::default()
        };
        let filters = query.filters().unwrap();
        assert_eq!(filters.tags, vec!["moving", "heavy"]);
        assert_eq!(filters.status, vec![TaskStatus::Open, TaskStatus::Review]);
        assert_eq!(filters.job_type, vec![JobType::Remote]);
        assert_eq!(filters.price_range, Some(PriceRange { min: Some(10.0), max: None }));
        assert_eq!(filters.time_filter, Some(TimeFilter::Weekend));
        assert_eq!(query.sort_key().unwrap(), SortKey::PriceLow);
    }

    #[test]
    fn unknown_values_are_bad_requests() {
        let bad_status = TaskQuery { status: Some("pending".into()), ..Default::default() };
        assert!(matches!(bad_status.filters(), Err(ApiError::BadRequest(_))));

        let half_point = TaskQuery { lat: Some(1.0), ..Default::default() };
        assert!(matches!(half_point.filters(), Err(ApiError::BadRequest(_))));

        let bad_sort = TaskQuery { sort: Some("random".into()), ..Default::default() };
        assert!(matches!(bad_sort.sort_key(), Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn list_pages_the_catalog() {
        let state = state();
        let poster = register(&state, "poster").await;
        for (title, pay) in [("a", 10.0), ("b", 30.0), ("c", 20.0)] {
            create_task_handler(
                State(state.clone()),
                Extension(CurrentUser(poster)),
                Json(new_task(title, &["chores"], pay)),
            )
            .await
            .unwrap();
        }

        let query = TaskQuery {
            sort: Some("pay".into()),
            limit: Some(2),
            offset: Some(1),
            ..Default::default()
        };
        let Json(page) = list_tasks_handler(State(state.clone()), Query(query))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        let titles: Vec<_> = page.tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["c", "a"]);

        let Json(tags) =
            popular_tags_handler(State(state), Query(TagsQuery { limit: None })).await;
        assert_eq!(tags, vec!["chores"]);
    }

    #[tokio::test]
    async fn non_posters_cannot_edit_or_list_applications() {
        let state = state();
        let poster = register(&state, "poster").await;
        let other = register(&state, "other").await;
        let task = state.market.tasks.post(poster, new_task("t", &[], 5.0)).await.unwrap();

        let err = update_task_handler(
            State(state.clone()),
            Extension(CurrentUser(other)),
            Path(task.id),
            Json(TaskPatch { title: Some("mine now".into()), ..Default::default() }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = task_applications_handler(
            State(state.clone()),
            Extension(CurrentUser(other)),
            Path(task.id),
            Query(StatusQuery { status: None }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = get_task_handler(State(state), Path(task.id + 100))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
