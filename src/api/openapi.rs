//! OpenAPI document for the auth core's HTTP surface.

use utoipa::OpenApi;

use crate::api::handlers::auth::{store, types};
use crate::api::handlers::health;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::handlers::health::livez,
        crate::api::handlers::health::readyz,
        crate::api::handlers::auth::session::register,
        crate::api::handlers::auth::session::login,
        crate::api::handlers::auth::session::logout,
        crate::api::handlers::auth::session::session_status,
        crate::api::handlers::auth::session::session_refresh,
        crate::api::handlers::auth::roles::raise,
        crate::api::handlers::auth::roles::list_requests,
        crate::api::handlers::auth::roles::approve_request,
        crate::api::handlers::auth::roles::reject_request,
    ),
    components(schemas(
        health::HealthResponse,
        types::Creds,
        types::RegisterRequest,
        types::RegisterResponse,
        types::LoginResponse,
        types::LogoutResponse,
        types::StatusResponse,
        types::ErrorResponse,
        types::Permissions,
        store::RoleRequestRow,
        store::RoleRequestView,
    )),
    tags(
        (name = "auth", description = "Sessions, credentials, and role escalation"),
        (name = "health", description = "Liveness and readiness probes")
    )
)]
pub struct ApiDoc;
