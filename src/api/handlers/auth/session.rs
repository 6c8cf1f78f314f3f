//! Session lifecycle: issue, verify, refresh, and the public auth endpoints.
//!
//! Tokens are high-entropy URL-safe values; the browser carries them inside
//! an encrypted cookie and the database stores them with a UTC expiry. A
//! session is current iff `now < expires_at`. Missing and expired sessions
//! collapse into the same outcome so callers cannot distinguish the two.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

use super::cookies::{self, Cookie, CookieError};
use super::hasher::{self, generate_random_bytes};
use super::state::AuthState;
use super::store::{self, CreateUserOutcome, SessionLookup, SessionRow};
use super::types::{
    Creds, ErrorResponse, LoginResponse, LogoutResponse, Permissions, RegisterRequest,
    RegisterResponse, StatusResponse,
};

pub(crate) const ROLE_USER: &str = "USER";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid token length")]
    InvalidTokenLength,
    #[error("invalid expiry timestamp")]
    InvalidExpiry,
}

/// Generate a URL-safe session token from `length` random bytes.
///
/// # Errors
/// Returns [`SessionError::InvalidTokenLength`] for a zero length, or an
/// entropy-source error.
pub fn generate_session_token(length: u32) -> anyhow::Result<String> {
    if length == 0 {
        return Err(SessionError::InvalidTokenLength.into());
    }
    let bytes = generate_random_bytes(length)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Whether a session expiry is still in the future, compared in UTC.
///
/// # Errors
/// Returns [`SessionError::InvalidExpiry`] when the expiry is unset; an
/// unreadable expiry must never resolve to "expired" or "current".
pub fn is_session_current(expires_at: Option<DateTime<Utc>>) -> Result<bool, SessionError> {
    let Some(expires_at) = expires_at else {
        return Err(SessionError::InvalidExpiry);
    };
    Ok(Utc::now() < expires_at)
}

/// Issue a fresh session for the user inside the caller's transaction and
/// return the raw token.
pub(crate) async fn open_session(
    tx: &mut Transaction<'_, Postgres>,
    state: &AuthState,
    user_id: i32,
) -> anyhow::Result<String> {
    let config = state.config();
    let token = generate_session_token(config.token_length())?;
    let expires_at = Utc::now() + Duration::hours(i64::from(config.session_duration_hours()));
    store::create_session(&mut **tx, user_id, &token, expires_at).await?;
    Ok(token)
}

/// Build the sealed session cookie for a token, with a full-lifetime max-age.
pub(crate) fn serve_auth_cookie(state: &AuthState, token: &str) -> anyhow::Result<HeaderValue> {
    let config = state.config();
    let sealed = cookies::encode_encrypted(&config.cookie().name, token, config.secret_key())?;
    let max_age = i64::from(config.session_duration_hours()) * 60 * 60;
    Ok(Cookie::bake(config.cookie(), sealed, max_age).to_header_value()?)
}

/// Build the cookie that clears any previous session value.
pub(crate) fn clear_auth_cookie(state: &AuthState) -> anyhow::Result<HeaderValue> {
    Ok(Cookie::expired(state.config().cookie()).to_header_value()?)
}

/// Read and open the session cookie from request headers.
pub(crate) fn read_auth_cookie(
    state: &AuthState,
    headers: &HeaderMap,
) -> Result<String, CookieError> {
    let config = state.config();
    let raw =
        cookies::read_cookie_header(headers, &config.cookie().name).ok_or(CookieError::Missing)?;
    cookies::decode_encrypted(&config.cookie().name, &raw, config.secret_key())
}

/// Resolve a token to its session row if one exists and is still current.
///
/// Unknown tokens and expired sessions both come back as `None`; an unset
/// expiry propagates as an error.
pub(crate) async fn verify_session(
    executor: impl PgExecutor<'_>,
    token: &str,
) -> anyhow::Result<Option<SessionRow>> {
    match store::get_session_by_token(executor, token).await? {
        SessionLookup::Missing => Ok(None),
        SessionLookup::Found(row) => {
            if is_session_current(row.expires_at)? {
                Ok(Some(row))
            } else {
                Ok(None)
            }
        }
    }
}

/// Normalize an email for lookup/uniqueness checks.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
fn valid_email(email_normalized: &str) -> bool {
    regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
        .is_ok_and(|regex| regex.is_match(email_normalized))
}

fn invalid_session_response() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            message: "Invalid session".to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = RegisterResponse),
        (status = 400, description = "Invalid body or email already registered", body = String)
    ),
    tag = "auth"
)]
pub async fn register(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let request: RegisterRequest = match payload {
        Some(Json(payload)) => payload,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                "Invalid body, expects name, surname, email and password".to_string(),
            )
                .into_response();
        }
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    let hashed_password = match hasher::hash_password(&request.password, auth_state.config().hash())
    {
        Ok(hashed) => hashed,
        Err(err) => {
            error!("Failed to hash password: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // User creation and the USER role grant commit together.
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin register transaction: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let user_id = match store::create_user(
        &mut *tx,
        &request.name,
        &request.surname,
        &email,
        &hashed_password,
    )
    .await
    {
        Ok(CreateUserOutcome::Created(user_id)) => user_id,
        Ok(CreateUserOutcome::DuplicateEmail) => {
            let _ = tx.rollback().await;
            return (
                StatusCode::BAD_REQUEST,
                "Registration unsuccessful. Please check your details and try again.".to_string(),
            )
                .into_response();
        }
        Err(err) => {
            error!("Failed to create user: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let role_id = match store::get_role_by_name(&mut *tx, ROLE_USER).await {
        Ok(Some(role_id)) => role_id,
        Ok(None) => {
            error!("Role {ROLE_USER} is not seeded");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(err) => {
            error!("Failed to lookup role {ROLE_USER}: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(err) = store::assign_role_to_user(&mut *tx, user_id, role_id).await {
        error!("Failed to assign role to user: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit register transaction: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = Creds,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Invalid body", body = String),
        (status = 401, description = "Invalid credentials", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<Creds>>,
) -> impl IntoResponse {
    let creds: Creds = match payload {
        Some(Json(payload)) => payload,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                "Invalid body, expects email and password".to_string(),
            )
                .into_response();
        }
    };

    let email = normalize_email(&creds.email);
    let user = match store::get_user_by_email(&pool.0, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => return invalid_credentials_response(&auth_state),
        Err(err) => {
            error!("Failed to lookup user for login: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match hasher::verify_password(&creds.password, &user.hashed_password) {
        Ok(true) => {}
        Ok(false) => return invalid_credentials_response(&auth_state),
        Err(err) => {
            error!("Failed to verify password: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    // Session reuse or issuance commits as one unit.
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin login transaction: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let current_token = match store::get_latest_session(&mut *tx, user.id).await {
        Ok(SessionLookup::Missing) => None,
        Ok(SessionLookup::Found(row)) => match is_session_current(row.expires_at) {
            Ok(true) => Some(row.session_token),
            Ok(false) => None,
            Err(err) => {
                error!("Failed to check session currency: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        },
        Err(err) => {
            error!("Failed to lookup latest session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let token = match current_token {
        Some(token) => token,
        None => match open_session(&mut tx, &auth_state, user.id).await {
            Ok(token) => token,
            Err(err) => {
                error!("Failed to open session: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        },
    };

    let roles = match store::get_roles_for_user(&mut *tx, user.id).await {
        Ok(roles) => roles,
        Err(err) => {
            error!("Failed to lookup roles for login: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(err) = tx.commit().await {
        error!("Failed to commit login transaction: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    // The cookie is only written once the session row is durable.
    let cookie = match serve_auth_cookie(&auth_state, &token) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to seal session cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);

    (
        StatusCode::OK,
        response_headers,
        Json(LoginResponse {
            message: "Login successful".to_string(),
            email: user.email,
            id: user.id,
            permissions: Permissions { roles },
        }),
    )
        .into_response()
}

fn invalid_credentials_response(auth_state: &AuthState) -> axum::response::Response {
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_auth_cookie(auth_state) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::UNAUTHORIZED,
        response_headers,
        "Invalid credentials".to_string(),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logged out; also answers 200 when no session cookie was present", body = LogoutResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Ok(token) = read_auth_cookie(&auth_state, &headers) {
        if let Err(err) = store::delete_session_by_token(&pool.0, &token).await {
            error!("Failed to delete session on logout: {err}");
        }
    }

    // Always clear the cookie, even if it was missing or unreadable.
    let mut response_headers = HeaderMap::new();
    match clear_auth_cookie(&auth_state) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build clearing cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    (
        StatusCode::OK,
        response_headers,
        Json(LogoutResponse {
            message: "Logged out successfully".to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/auth/session/status",
    responses(
        (status = 200, description = "Session is active", body = StatusResponse),
        (status = 401, description = "Missing, invalid, or expired session", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn session_status(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let Ok(token) = read_auth_cookie(&auth_state, &headers) else {
        return invalid_session_response();
    };

    let session = match verify_session(&pool.0, &token).await {
        Ok(Some(session)) => session,
        Ok(None) => return invalid_session_response(),
        Err(err) => {
            error!("Failed to verify session for status: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let user = match store::get_user_by_id(&pool.0, session.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            error!("Session {} references a missing user", session.user_id);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(err) => {
            error!("Failed to lookup user for status: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let roles = match store::get_roles_for_user(&pool.0, user.id).await {
        Ok(roles) => roles,
        Err(err) => {
            error!("Failed to lookup roles for status: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    (
        StatusCode::OK,
        Json(StatusResponse {
            user_id: user.id,
            email: user.email,
            permissions: Permissions { roles },
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/auth/session/refresh",
    responses(
        (status = 200, description = "Session rotated; a new token replaces the old cookie"),
        (status = 401, description = "Missing, invalid, or expired session", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn session_refresh(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let Ok(token) = read_auth_cookie(&auth_state, &headers) else {
        return invalid_session_response();
    };

    let session = match verify_session(&pool.0, &token).await {
        Ok(Some(session)) => session,
        Ok(None) => return invalid_session_response(),
        Err(err) => {
            error!("Failed to verify session for refresh: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin refresh transaction: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // TODO: delete the superseded session row here instead of leaving it for
    // the stale-row sweep.
    let new_token = match open_session(&mut tx, &auth_state, session.user_id).await {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to rotate session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(err) = tx.commit().await {
        error!("Failed to commit refresh transaction: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let cookie = match serve_auth_cookie(&auth_state, &new_token) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to seal rotated session cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);

    (StatusCode::OK, response_headers).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::state::AuthConfig;

    fn auth_state() -> AuthState {
        let config = AuthConfig::new(b"32_byte_valid_secret_key_1234567".to_vec())
            .expect("key long enough");
        AuthState::new(config)
    }

    #[test]
    fn generated_token_is_url_safe_and_sized() {
        let token = generate_session_token(32).expect("token generates");
        // 32 random bytes encode to 43 unpadded base64url characters.
        assert_eq!(token.len(), 43);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn zero_length_token_is_rejected() {
        let err = generate_session_token(0).expect_err("zero length must fail");
        assert_eq!(
            err.downcast_ref::<SessionError>(),
            Some(&SessionError::InvalidTokenLength)
        );
    }

    #[test]
    fn future_expiry_is_current() {
        let expires_at = Some(Utc::now() + Duration::hours(1));
        assert_eq!(is_session_current(expires_at), Ok(true));
    }

    #[test]
    fn past_expiry_is_not_current() {
        let expires_at = Some(Utc::now() - Duration::hours(1));
        assert_eq!(is_session_current(expires_at), Ok(false));
    }

    #[test]
    fn unset_expiry_is_an_error() {
        assert_eq!(is_session_current(None), Err(SessionError::InvalidExpiry));
    }

    #[test]
    fn served_cookie_round_trips_through_request_headers() {
        let state = auth_state();
        let cookie = serve_auth_cookie(&state, "session-token-1234").expect("cookie seals");

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_str(
                cookie
                    .to_str()
                    .expect("ascii cookie")
                    .split(';')
                    .next()
                    .expect("name=value part"),
            )
            .expect("valid header"),
        );

        let token = read_auth_cookie(&state, &headers).expect("cookie opens");
        assert_eq!(token, "session-token-1234");
    }

    #[test]
    fn served_cookie_carries_session_lifetime() {
        let state = auth_state();
        let cookie = serve_auth_cookie(&state, "token").expect("cookie seals");
        let cookie = cookie.to_str().expect("ascii cookie");
        // 1 hour default duration.
        assert!(cookie.contains("Max-Age=3600"));
        assert!(cookie.contains("HttpOnly"));
    }

    #[test]
    fn clearing_cookie_expires_immediately() {
        let state = auth_state();
        let cookie = clear_auth_cookie(&state).expect("cookie builds");
        let cookie = cookie.to_str().expect("ascii cookie");
        assert!(cookie.starts_with("rezervi_session=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn tampered_cookie_does_not_open() {
        let state = auth_state();
        let cookie = serve_auth_cookie(&state, "session-token-1234").expect("cookie seals");
        let value = cookie
            .to_str()
            .expect("ascii cookie")
            .split(';')
            .next()
            .and_then(|pair| pair.split('=').nth(1))
            .expect("cookie value")
            .to_string();

        let mut raw = URL_SAFE_NO_PAD
            .decode(value.as_bytes())
            .expect("valid base64");
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(&raw);

        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_str(&format!("rezervi_session={tampered}")).expect("valid header"),
        );

        assert_eq!(
            read_auth_cookie(&state, &headers),
            Err(CookieError::Invalid)
        );
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn missing_cookie_reports_missing() {
        let state = auth_state();
        let headers = HeaderMap::new();
        assert_eq!(
            read_auth_cookie(&state, &headers),
            Err(CookieError::Missing)
        );
    }
}
