//! services/api/src/web/applications.rs
//!
//! Application endpoints: helpers apply and withdraw, posters accept or reject.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use getitdone_core::{Application, ApplicationId, ApplicationStatus, TaskId};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::web::middleware::CurrentUser;
use crate::web::state::AppState;
use crate::web::tasks::StatusQuery;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    pub task_id: TaskId,
    pub note: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// The poster's decision on an application: `accepted` or `rejected`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DecisionRequest {
    pub status: String,
}

/// POST /applications - Apply to a task
#[utoipa::path(
    post,
    path = "/applications",
    request_body = ApplyRequest,
    responses(
        (status = 201, description = "Application submitted"),
        (status = 400, description = "Empty note or own task"),
        (status = 404, description = "No such task"),
        (status = 409, description = "Already applied or task closed")
    ),
    security(("bearer" = []))
)]
pub async fn apply_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(req): Json<ApplyRequest>,
) -> Result<(StatusCode, Json<Application>), ApiError> {
    let application = state
        .market
        .workflow
        .apply(req.task_id, user_id, &req.note, req.phone)
        .await?;
    Ok((StatusCode::CREATED, Json(application)))
}

/// GET /applications - The caller's own applications
#[utoipa::path(
    get,
    path = "/applications",
    params(StatusQuery),
    responses((status = 200, description = "Applications, newest first")),
    security(("bearer" = []))
)]
pub async fn my_applications_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<Application>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<ApplicationStatus>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(state.market.workflow.for_helper(user_id, status).await))
}

/// PUT /applications/{id} - Accept or reject an application on the caller's task
#[utoipa::path(
    put,
    path = "/applications/{id}",
    params(("id" = i64, Path, description = "Application id")),
    request_body = DecisionRequest,
    responses(
        (status = 200, description = "The decided application"),
        (status = 403, description = "Not the poster"),
        (status = 409, description = "Already decided or task no longer open")
    ),
    security(("bearer" = []))
)]
pub async fn decide_application_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(application_id): Path<ApplicationId>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<Application>, ApiError> {
    let decision = req
        .status
        .parse::<ApplicationStatus>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let workflow = &state.market.workflow;
    let application = match decision {
        ApplicationStatus::Accepted => workflow.accept(application_id, user_id).await?,
        ApplicationStatus::Rejected => workflow.reject(application_id, user_id).await?,
        ApplicationStatus::Submitted => {
            return Err(ApiError::BadRequest(
                "status must be 'accepted' or 'rejected'".to_string(),
            ))
        }
    };
    Ok(Json(application))
}

/// DELETE /applications/{id} - Withdraw the caller's own application
#[utoipa::path(
    delete,
    path = "/applications/{id}",
    params(("id" = i64, Path, description = "Application id")),
    responses(
        (status = 204, description = "Application withdrawn"),
        (status = 403, description = "Not the applicant"),
        (status = 409, description = "Already accepted")
    ),
    security(("bearer" = []))
)]
pub async fn withdraw_application_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(application_id): Path<ApplicationId>,
) -> Result<StatusCode, ApiError> {
    state
        .market
        .workflow
        .withdraw(application_id, user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::{Duration, Utc};
    use getitdone_core::{JobType, NewTask, NewUser, PayType, TaskStatus, UserId};

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

    async fn post_task(state: &AppState, poster: UserId) -> TaskId {
        state
            .market
            .tasks
            .post(
                poster,
                NewTask {
                    title: "Assemble desk".into(),
                    description: "IKEA desk".into(),
                    tags: vec!["furniture".into()],
                    pay_type: PayType::Flat,
                    pay_amount: 30.0,
                    date: Utc::now().date_naive() + Duration::days(1),
                    time_window: "evening".into(),
                    job_type: JobType::Local,
                    college: None,
                    location_type: String::new(),
                    location_name: String::new(),
                    address: None,
                    coordinates: None,
                },
            )
            .await
            .unwrap()
            .id
    }

    fn apply_request(task_id: TaskId) -> Json<ApplyRequest> {
        Json(ApplyRequest {
            task_id,
            note: "I can help".into(),
            phone: None,
        })
    }

    #[tokio::test]
    async fn apply_then_accept_over_http_handlers() {
        let state = Arc::new(AppState::in_memory(Arc::new(Config::default())));
        let poster = register(&state, "poster").await;
        let h1 = register(&state, "h1").await;
        let h2 = register(&state, "h2").await;
        let task_id = post_task(&state, poster).await;

        let (status, Json(a1)) =
            apply_handler(State(state.clone()), Extension(CurrentUser(h1)), apply_request(task_id))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        let (_, Json(a2)) =
            apply_handler(State(state.clone()), Extension(CurrentUser(h2)), apply_request(task_id))
                .await
                .unwrap();

        let dup = apply_handler(State(state.clone()), Extension(CurrentUser(h1)), apply_request(task_id))
            .await
            .unwrap_err();
        assert_eq!(dup.status(), StatusCode::CONFLICT);

        let Json(accepted) = decide_application_handler(
            State(state.clone()),
            Extension(CurrentUser(poster)),
            Path(a1.id),
            Json(DecisionRequest { status: "accepted".into() }),
        )
        .await
        .unwrap();
        assert_eq!(accepted.status, ApplicationStatus::Accepted);
        assert_eq!(
            state.market.tasks.get(task_id).await.unwrap().status,
            TaskStatus::Assigned
        );

        let late = decide_application_handler(
            State(state.clone()),
            Extension(CurrentUser(poster)),
            Path(a2.id),
            Json(DecisionRequest { status: "accepted".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(late.status(), StatusCode::CONFLICT);

        let Json(mine) = my_applications_handler(
            State(state),
            Extension(CurrentUser(h2)),
            Query(StatusQuery { status: Some("rejected".into()) }),
        )
        .await
        .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, a2.id);
    }

    #[tokio::test]
    async fn submitted_is_not_a_decision() {
        let state = Arc::new(AppState::in_memory(Arc::new(Config::default())));
        let err = decide_application_handler(
            State(state),
            Extension(CurrentUser(1)),
            Path(1),
            Json(DecisionRequest { status: "submitted".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
