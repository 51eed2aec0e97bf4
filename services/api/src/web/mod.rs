pub mod applications;
pub mod auth;
pub mod messages;
pub mod middleware;
pub mod notifications;
pub mod rest;
pub mod state;
pub mod tasks;
pub mod users;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use middleware::require_auth;
use rest::ApiDoc;
use state::AppState;

/// Builds the full router: public routes, bearer-protected routes and the Swagger UI.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required). Static task paths sit beside `{id}`;
    // the router prefers the static segment.
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/tasks", get(tasks::list_tasks_handler))
        .route("/tasks/popular-tags", get(tasks::popular_tags_handler))
        .route("/tasks/near", get(tasks::near_tasks_handler))
        .route("/tasks/{id}", get(tasks::get_task_handler))
        .route("/users", get(users::list_users_handler))
        .route("/users/{id}", get(users::get_user_handler))
        .route("/users/{id}/tasks", get(users::user_tasks_handler));

    // Protected routes (auth required). Paths shared with the public router
    // are merged per method.
    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout_handler))
        .route("/me", get(auth::me_handler))
        .route("/me/password", put(auth::change_password_handler))
        .route("/users/{id}", put(users::update_user_handler))
        .route("/tasks", post(tasks::create_task_handler))
        .route(
            "/tasks/{id}",
            put(tasks::update_task_handler).delete(tasks::delete_task_handler),
        )
        .route("/tasks/{id}/complete", post(tasks::complete_task_handler))
        .route("/tasks/{id}/ratings", post(tasks::rate_task_handler))
        .route(
            "/tasks/{id}/applications",
            get(tasks::task_applications_handler),
        )
        .route(
            "/applications",
            get(applications::my_applications_handler).post(applications::apply_handler),
        )
        .route(
            "/applications/{id}",
            put(applications::decide_application_handler)
                .delete(applications::withdraw_application_handler),
        )
        .route("/messages", post(messages::send_message_handler))
        .route("/messages/conversations", get(messages::conversations_handler))
        .route("/messages/unread-count", get(messages::unread_messages_handler))
        .route("/messages/with/{user_id}", get(messages::thread_handler))
        .route("/messages/{id}", delete(messages::delete_message_handler))
        .route("/notifications", get(notifications::list_notifications_handler))
        .route(
            "/notifications/unread-count",
            get(notifications::unread_notifications_handler),
        )
        .route(
            "/notifications/read-all",
            put(notifications::mark_all_read_handler),
        )
        .route(
            "/notifications/{id}/read",
            put(notifications::mark_read_handler),
        )
        .route(
            "/notifications/{id}",
            delete(notifications::delete_notification_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(app_state);

    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
