//! services/api/src/web/rest.rs
//!
//! Contains the health handler and the master definition for the OpenAPI specification.

use axum::Json;
use serde::Serialize;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi, ToSchema,
};

use crate::web::{applications, auth, messages, notifications, tasks, users};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        auth::register_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::me_handler,
        auth::change_password_handler,
        users::list_users_handler,
        users::get_user_handler,
        users::update_user_handler,
        users::user_tasks_handler,
        tasks::list_tasks_handler,
        tasks::popular_tags_handler,
        tasks::near_tasks_handler,
        tasks::get_task_handler,
        tasks::create_task_handler,
        tasks::update_task_handler,
        tasks::delete_task_handler,
        tasks::complete_task_handler,
        tasks::rate_task_handler,
        tasks::task_applications_handler,
        applications::apply_handler,
        applications::my_applications_handler,
        applications::decide_application_handler,
        applications::withdraw_application_handler,
        messages::send_message_handler,
        messages::conversations_handler,
        messages::thread_handler,
        messages::unread_messages_handler,
        messages::delete_message_handler,
        notifications::list_notifications_handler,
        notifications::unread_notifications_handler,
        notifications::mark_read_handler,
        notifications::mark_all_read_handler,
        notifications::delete_notification_handler,
    ),
    components(
        schemas(
            HealthResponse,
            auth::RegisterRequest,
            auth::LoginRequest,
            auth::ChangePasswordRequest,
            auth::AuthResponse,
            tasks::TaskPage,
            tasks::RateRequest,
            applications::ApplyRequest,
            applications::DecisionRequest,
            messages::SendMessageRequest,
            messages::UnreadCount,
            notifications::MarkedRead,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "GetItDone API", description = "Campus task marketplace: post tasks, apply, message and rate.")
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` scheme referenced by protected paths.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

//=========================================================================================
// Health
//=========================================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health - Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
