//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for registration, login, logout and password changes.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use getitdone_core::{Clock, NewUser, User, WorkflowError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::web::middleware::{bearer_token, CurrentUser};
use crate::web::state::AppState;

pub const MIN_PASSWORD_LEN: usize = 6;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub college: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    #[schema(value_type = Object)]
    pub user: User,
}

//=========================================================================================
// Password Hashing
//=========================================================================================

fn check_password_rules(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(WorkflowError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ))
        .into());
    }
    Ok(())
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            ApiError::Internal("Failed to hash password".to_string())
        })
}

pub fn verify_password(password: &str, hashed: &str) -> Result<bool, ApiError> {
    let parsed_hash = PasswordHash::new(hashed).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        ApiError::Internal("Authentication error".to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

async fn issue_session(state: &AppState, user: User) -> AuthResponse {
    let expires_at = state.clock.now() + state.session_ttl();
    let token = state.sessions.create(user.id, expires_at).await;
    AuthResponse {
        token,
        expires_at,
        user,
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/register - Create a new user account and start a session
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created successfully", body = AuthResponse),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_password_rules(&req.password)?;
    let hashed_password = hash_password(&req.password)?;

    let user = state
        .market
        .accounts
        .register(NewUser {
            email: req.email,
            name: req.name,
            hashed_password,
            phone: req.phone,
            bio: req.bio,
            college: req.college,
            year: req.year,
            major: req.major,
            skills: req.skills,
        })
        .await?;

    let response = issue_session(&state, user).await;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let creds = match state.market.accounts.credentials(&req.email).await {
        Ok(creds) => creds,
        Err(WorkflowError::NotFound(_)) => return Err(ApiError::InvalidCredentials),
        Err(e) => return Err(e.into()),
    };
    if !verify_password(&req.password, &creds.hashed_password)? {
        return Err(ApiError::InvalidCredentials);
    }

    let user = state.market.accounts.get(creds.user_id).await?;
    info!(user_id = user.id, "User logged in.");
    Ok(Json(issue_session(&state, user).await))
}

/// POST /auth/logout - Invalidate the presented bearer token
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Logout successful"),
        (status = 401, description = "No active session")
    ),
    security(("bearer" = []))
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::Unauthenticated)?;
    if !state.sessions.revoke(token).await {
        return Err(ApiError::Unauthenticated);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// GET /me - The caller's own profile
#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "The authenticated user"),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = []))
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.market.accounts.get(user_id).await?))
}

/// PUT /me/password - Replace the caller's password
#[utoipa::path(
    put,
    path = "/me/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "New password too short"),
        (status = 401, description = "Current password is wrong")
    ),
    security(("bearer" = []))
)]
pub async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    check_password_rules(&req.new_password)?;
    let user = state.market.accounts.get(user_id).await?;
    let creds = state.market.accounts.credentials(&user.email).await?;
    if !verify_password(&req.current_password, &creds.hashed_password)? {
        return Err(ApiError::InvalidCredentials);
    }
    let hashed = hash_password(&req.new_password)?;
    state
        .market
        .accounts
        .change_credential(user_id, user_id, hashed)
        .await?;
    info!(user_id, "Password changed.");
    Ok(StatusCode::NO_CONTENT)
}
