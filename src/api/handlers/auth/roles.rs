//! Role-escalation workflow: raise, review, and the admin request list.
//!
//! A request moves `PENDING -> APPROVED | REJECTED` and records its reviewer.
//! Approval grants the requested role; rejection removes it from the
//! requester even when it was never held. The configured bootstrap admin
//! email skips the queue entirely and is granted the role directly.

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::middleware::AuthedUser;
use super::state::AuthState;
use super::store::{self, RoleRequestRow, RoleRequestView};

pub(crate) const ROLE_ADMIN: &str = "ADMIN";

/// Terminal and initial states of a role request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RoleRequestStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/raise",
    responses(
        (status = 201, description = "Bootstrap admin; role granted directly"),
        (status = 202, description = "Request recorded for admin review"),
        (status = 401, description = "Missing or invalid session")
    ),
    tag = "auth"
)]
pub async fn raise(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    caller: Extension<AuthedUser>,
) -> impl IntoResponse {
    let admin_role_id = match store::get_role_by_name(&pool.0, ROLE_ADMIN).await {
        Ok(Some(role_id)) => role_id,
        Ok(None) => {
            error!("Role {ROLE_ADMIN} is not seeded");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(err) => {
            error!("Failed to lookup role {ROLE_ADMIN}: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // The bootstrap admin bypasses review; re-raising once the role is held
    // is harmless because the grant is idempotent.
    if auth_state.config().initial_admin_email() == Some(caller.email.as_str()) {
        if let Err(err) = store::assign_role_to_user(&pool.0, caller.user_id, admin_role_id).await
        {
            error!("Failed to grant bootstrap admin role: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        return StatusCode::CREATED.into_response();
    }

    // Duplicate pending requests are not deduplicated; the review queue
    // shows them all.
    match store::create_role_request(&pool.0, caller.user_id, admin_role_id).await {
        Ok(_) => StatusCode::ACCEPTED.into_response(),
        Err(err) => {
            error!("Failed to create role request: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/auth/requests",
    responses(
        (status = 200, description = "All role requests with their requesters", body = [RoleRequestView]),
        (status = 401, description = "Missing or invalid session, or caller is not an admin")
    ),
    tag = "auth"
)]
pub async fn list_requests(pool: Extension<PgPool>) -> impl IntoResponse {
    match store::list_role_requests(&pool.0).await {
        Ok(requests) => (StatusCode::OK, Json(requests)).into_response(),
        Err(err) => {
            error!("Failed to list role requests: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/request/approve/{request_id}",
    params(("request_id" = i32, Path, description = "Role request to approve")),
    responses(
        (status = 200, description = "Request approved and role granted", body = RoleRequestRow),
        (status = 401, description = "Missing or invalid session, or caller is not an admin"),
        (status = 404, description = "Unknown request id")
    ),
    tag = "auth"
)]
pub async fn approve_request(
    Path(request_id): Path<i32>,
    pool: Extension<PgPool>,
    caller: Extension<AuthedUser>,
) -> impl IntoResponse {
    review(&pool, &caller, request_id, RoleRequestStatus::Approved).await
}

#[utoipa::path(
    post,
    path = "/auth/request/reject/{request_id}",
    params(("request_id" = i32, Path, description = "Role request to reject")),
    responses(
        (status = 200, description = "Request rejected and role removed from the requester", body = RoleRequestRow),
        (status = 401, description = "Missing or invalid session, or caller is not an admin"),
        (status = 404, description = "Unknown request id")
    ),
    tag = "auth"
)]
pub async fn reject_request(
    Path(request_id): Path<i32>,
    pool: Extension<PgPool>,
    caller: Extension<AuthedUser>,
) -> impl IntoResponse {
    review(&pool, &caller, request_id, RoleRequestStatus::Rejected).await
}

/// Resolve a request and apply the matching role mutation in one
/// transaction: approval grants the role, rejection removes it whether or
/// not it was held.
async fn review(
    pool: &PgPool,
    caller: &AuthedUser,
    request_id: i32,
    status: RoleRequestStatus,
) -> Response {
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin review transaction: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let reviewed = match store::review_role_request(
        &mut *tx,
        request_id,
        status.as_str(),
        caller.user_id,
    )
    .await
    {
        Ok(Some(row)) => row,
        Ok(None) => {
            let _ = tx.rollback().await;
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(err) => {
            error!("Failed to update role request {request_id}: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let admin_role_id = match store::get_role_by_name(&mut *tx, ROLE_ADMIN).await {
        Ok(Some(role_id)) => role_id,
        Ok(None) => {
            error!("Role {ROLE_ADMIN} is not seeded");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(err) => {
            error!("Failed to lookup role {ROLE_ADMIN}: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mutation = match status {
        RoleRequestStatus::Approved => {
            store::assign_role_to_user(&mut *tx, reviewed.user_id, admin_role_id).await
        }
        RoleRequestStatus::Rejected => {
            store::remove_role_from_user(&mut *tx, reviewed.user_id, admin_role_id).await
        }
        RoleRequestStatus::Pending => Ok(()),
    };
    if let Err(err) = mutation {
        error!("Failed to apply role mutation for request {request_id}: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit review transaction: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (StatusCode::OK, Json(reviewed)).into_response()
}
