//! services/api/src/web/users.rs
//!
//! User directory and profile endpoints.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use getitdone_core::{ProfilePatch, Task, User, UserId, UserQuery};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;

use crate::error::ApiError;
use crate::web::middleware::CurrentUser;
use crate::web::state::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DirectoryQuery {
    /// Substring of name or email.
    pub search: Option<String>,
    pub college: Option<String>,
    pub min_rating: Option<f64>,
}

/// GET /users - Search the user directory
#[utoipa::path(
    get,
    path = "/users",
    params(DirectoryQuery),
    responses((status = 200, description = "Matching users"))
)]
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DirectoryQuery>,
) -> Json<Vec<User>> {
    let query = UserQuery {
        search: query.search,
        college: query.college,
        min_rating: query.min_rating,
    };
    Json(state.market.accounts.list(&query).await)
}

/// GET /users/{id}
#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "The user's public profile"),
        (status = 404, description = "No such user")
    )
)]
pub async fn get_user_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.market.accounts.get(user_id).await?))
}

/// PUT /users/{id} - Edit the caller's own profile
#[utoipa::path(
    put,
    path = "/users/{id}",
    params(("id" = i64, Path, description = "User id")),
    request_body(content_type = "application/json", description = "Profile fields to change"),
    responses(
        (status = 200, description = "The updated profile"),
        (status = 403, description = "Not the caller's profile")
    ),
    security(("bearer" = []))
)]
pub async fn update_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(current)): Extension<CurrentUser>,
    Path(user_id): Path<UserId>,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(
        state
            .market
            .accounts
            .update_profile(user_id, current, patch)
            .await?,
    ))
}

/// GET /users/{id}/tasks - Tasks posted by a user
#[utoipa::path(
    get,
    path = "/users/{id}/tasks",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Tasks, newest first"),
        (status = 404, description = "No such user")
    )
)]
pub async fn user_tasks_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Vec<Task>>, ApiError> {
    state.market.accounts.get(user_id).await?;
    Ok(Json(state.market.tasks.posted_by(user_id).await))
}
