//! Per-request authorization gate.
//!
//! The wrapped handler only runs after the session cookie decodes, the
//! session verifies against the store, and the caller holds the required
//! role. Verification and the sliding-expiry extension happen inside one
//! transaction per request, so two concurrent requests on the same token
//! cannot resurrect an already-expired session; the refreshed cookie is
//! built only after that transaction commits.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::session;
use super::state::AuthState;
use super::store;
use super::types::ErrorResponse;

/// Role names the authorization gate recognizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleName {
    User,
    Admin,
}

impl RoleName {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
        }
    }
}

/// State handed to [`require_role`] when a route group is wrapped.
#[derive(Clone)]
pub struct RoleGuard {
    pub pool: PgPool,
    pub state: Arc<AuthState>,
    pub role: RoleName,
}

/// Authenticated caller context inserted into request extensions for the
/// wrapped handler.
#[derive(Clone, Debug)]
pub struct AuthedUser {
    pub user_id: i32,
    pub email: String,
    pub roles: Vec<String>,
}

/// Gate a request on a verified session holding `guard.role`.
pub async fn require_role(
    State(guard): State<RoleGuard>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match session::read_auth_cookie(&guard.state, request.headers()) {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to read session cookie: {err}");
            return unauthorized(Some(&guard.state));
        }
    };

    let mut tx = match guard.pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin auth transaction: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let session_row = match session::verify_session(&mut *tx, &token).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            // Stale or unknown token: drop the row, clear the cookie, and
            // send the caller back to login.
            if let Err(err) = store::delete_session_by_token(&mut *tx, &token).await {
                error!("Failed to delete stale session: {err}");
            }
            if let Err(err) = tx.commit().await {
                error!("Failed to commit stale-session delete: {err}");
            }
            return unauthorized(Some(&guard.state));
        }
        Err(err) => {
            error!("Failed to verify session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let user = match store::get_user_by_id(&mut *tx, session_row.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            error!("Session {} references a missing user", session_row.user_id);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(err) => {
            error!("Failed to lookup user: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let roles = match store::get_roles_for_user(&mut *tx, user.id).await {
        Ok(roles) => roles,
        Err(err) => {
            error!("Failed to lookup roles: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if !roles.iter().any(|role| role == guard.role.as_str()) {
        // The session stays valid; only this action is denied, so neither
        // the cookie nor the row is touched.
        return unauthorized(None);
    }

    let new_expiry = Utc::now()
        + Duration::hours(i64::from(guard.state.config().session_duration_hours()));
    if let Err(err) = store::update_session_expiry(&mut *tx, &token, new_expiry).await {
        error!("Failed to extend session expiry: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit auth transaction: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    // Only a committed expiry gets a matching cookie; an inconsistent
    // cookie/row pair is worse than a hard failure.
    let cookie = match session::serve_auth_cookie(&guard.state, &token) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to seal refreshed cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    request.extensions_mut().insert(AuthedUser {
        user_id: user.id,
        email: user.email,
        roles,
    });

    let mut response = next.run(request).await;
    response.headers_mut().append(SET_COOKIE, cookie);
    response
}

/// 401 with the opaque body shared by authentication and role failures.
/// A cleared cookie is attached only for invalid sessions, never for a role
/// check that failed on an otherwise-valid session.
fn unauthorized(clear_cookie_for: Option<&AuthState>) -> Response {
    let mut headers = HeaderMap::new();
    if let Some(state) = clear_cookie_for {
        if let Ok(cookie) = session::clear_auth_cookie(state) {
            headers.insert(SET_COOKIE, cookie);
        }
    }
    (
        StatusCode::UNAUTHORIZED,
        headers,
        Json(ErrorResponse {
            message: "Invalid session".to_string(),
        }),
    )
        .into_response()
}
