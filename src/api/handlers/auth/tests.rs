//! End-to-end auth flows against a live database.
//!
//! Each test connects through `DATABASE_URL` and applies `sql/schema.sql`
//! before running; without the variable the test returns early, so the suite
//! stays green in environments with no Postgres available.

use anyhow::{Context, Result, anyhow};
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, StatusCode, header::SET_COOKIE};
use axum::response::IntoResponse;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::sync::Arc;

use super::hasher::{self, HashConfig};
use super::middleware::AuthedUser;
use super::roles::{self, ROLE_ADMIN};
use super::session::{self, ROLE_USER};
use super::state::{AuthConfig, AuthState};
use super::store::{self, CreateUserOutcome, SessionLookup};

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

async fn test_pool() -> Result<Option<PgPool>> {
    let Ok(dsn) = std::env::var("DATABASE_URL") else {
        eprintln!("Skipping integration test: DATABASE_URL is not set");
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&dsn)
        .await
        .context("failed to connect test pool")?;
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&pool)
        .await
        .context("failed to apply schema")?;
    Ok(Some(pool))
}

fn test_hash_config() -> HashConfig {
    HashConfig {
        memory_kib: 4096,
        iterations: 1,
        parallelism: 1,
        salt_length: 16,
        key_length: 32,
    }
}

fn auth_state() -> AuthState {
    let config = AuthConfig::new(b"32_byte_valid_secret_key_1234567".to_vec())
        .expect("key long enough")
        .with_token_length(32)
        .with_hash(test_hash_config());
    AuthState::new(config)
}

fn unique_email(prefix: &str) -> String {
    format!("{prefix}+{}@example.com", uuid::Uuid::new_v4().simple())
}

async fn create_test_user(pool: &PgPool, email: &str) -> Result<i32> {
    let hashed = hasher::hash_password("CorrectHorseBatteryStaple", &test_hash_config())?;
    match store::create_user(pool, "Test", "User", email, &hashed).await? {
        CreateUserOutcome::Created(id) => Ok(id),
        CreateUserOutcome::DuplicateEmail => Err(anyhow!("test user {email} already exists")),
    }
}

async fn authed_user(pool: &PgPool, user_id: i32) -> Result<AuthedUser> {
    let user = store::get_user_by_id(pool, user_id)
        .await?
        .context("test user vanished")?;
    let roles = store::get_roles_for_user(pool, user_id).await?;
    Ok(AuthedUser {
        user_id,
        email: user.email,
        roles,
    })
}

async fn request_status(pool: &PgPool, request_id: i32) -> Result<String> {
    let row = sqlx::query("SELECT status::text AS status FROM role_requests WHERE id = $1")
        .bind(request_id)
        .fetch_one(pool)
        .await
        .context("failed to read request status")?;
    Ok(row.get("status"))
}

async fn admin_role_id(pool: &PgPool) -> Result<i32> {
    store::get_role_by_name(pool, ROLE_ADMIN)
        .await?
        .context("ADMIN role is not seeded")
}

#[tokio::test]
async fn issued_session_verifies_until_expiry() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let state = auth_state();
    let user_id = create_test_user(&pool, &unique_email("issue")).await?;

    let mut tx = pool.begin().await?;
    let token = session::open_session(&mut tx, &state, user_id).await?;
    tx.commit().await?;

    let verified = session::verify_session(&pool, &token).await?;
    let row = verified.context("freshly issued session must verify")?;
    assert_eq!(row.user_id, user_id);

    Ok(())
}

#[tokio::test]
async fn expired_session_does_not_verify() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let user_id = create_test_user(&pool, &unique_email("expired")).await?;
    let token = session::generate_session_token(32)?;
    store::create_session(&pool, user_id, &token, Utc::now() - Duration::hours(1)).await?;

    let verified = session::verify_session(&pool, &token).await?;
    assert!(verified.is_none(), "expired session must not verify");

    Ok(())
}

#[tokio::test]
async fn unknown_token_does_not_verify() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let token = session::generate_session_token(32)?;
    let verified = session::verify_session(&pool, &token).await?;
    assert!(verified.is_none());

    let lookup = store::get_session_by_token(&pool, &token).await?;
    assert!(matches!(lookup, SessionLookup::Missing));

    Ok(())
}

#[tokio::test]
async fn logout_without_cookie_still_succeeds() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let state = Arc::new(auth_state());
    let response = session::logout(HeaderMap::new(), Extension(pool), Extension(state))
        .await
        .into_response();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .context("logout must clear the cookie")?;
    assert!(cookie.to_str()?.contains("Max-Age=0"));

    Ok(())
}

#[tokio::test]
async fn raise_records_one_pending_request_and_no_role_change() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let state = Arc::new(auth_state());
    let user_id = create_test_user(&pool, &unique_email("raise")).await?;
    let caller = authed_user(&pool, user_id).await?;

    let response = roles::raise(
        Extension(pool.clone()),
        Extension(state),
        Extension(caller),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let row = sqlx::query(
        "SELECT COUNT(*) AS pending FROM role_requests WHERE user_id = $1 AND status = 'PENDING'",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await?;
    let pending: i64 = row.get("pending");
    assert_eq!(pending, 1);

    let roles_held = store::get_roles_for_user(&pool, user_id).await?;
    assert!(!roles_held.iter().any(|role| role == ROLE_ADMIN));

    Ok(())
}

#[tokio::test]
async fn duplicate_raises_accumulate_pending_rows() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let state = Arc::new(auth_state());
    let user_id = create_test_user(&pool, &unique_email("dup-raise")).await?;
    let caller = authed_user(&pool, user_id).await?;

    for _ in 0..2 {
        let response = roles::raise(
            Extension(pool.clone()),
            Extension(state.clone()),
            Extension(caller.clone()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let row = sqlx::query(
        "SELECT COUNT(*) AS pending FROM role_requests WHERE user_id = $1 AND status = 'PENDING'",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await?;
    let pending: i64 = row.get("pending");
    assert_eq!(pending, 2, "duplicate raises are not deduplicated");

    Ok(())
}

#[tokio::test]
async fn bootstrap_admin_bypasses_request_queue() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let email = unique_email("bootstrap");
    let config = AuthConfig::new(b"32_byte_valid_secret_key_1234567".to_vec())?
        .with_hash(test_hash_config())
        .with_initial_admin_email(Some(email.clone()));
    let state = Arc::new(AuthState::new(config));

    let user_id = create_test_user(&pool, &email).await?;
    let caller = authed_user(&pool, user_id).await?;

    // Raising twice must stay harmless; the grant is idempotent.
    for _ in 0..2 {
        let response = roles::raise(
            Extension(pool.clone()),
            Extension(state.clone()),
            Extension(caller.clone()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let roles_held = store::get_roles_for_user(&pool, user_id).await?;
    assert!(roles_held.iter().any(|role| role == ROLE_ADMIN));

    let row = sqlx::query("SELECT COUNT(*) AS total FROM role_requests WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(&pool)
        .await?;
    let total: i64 = row.get("total");
    assert_eq!(total, 0, "bootstrap admin must not leave request rows");

    Ok(())
}

#[tokio::test]
async fn approving_a_request_grants_the_role() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let requester_id = create_test_user(&pool, &unique_email("approve-req")).await?;
    let approver_id = create_test_user(&pool, &unique_email("approve-adm")).await?;
    let role_id = admin_role_id(&pool).await?;
    store::assign_role_to_user(&pool, approver_id, role_id).await?;

    let request_id = store::create_role_request(&pool, requester_id, role_id).await?;
    let approver = authed_user(&pool, approver_id).await?;

    let response = roles::approve_request(
        Path(request_id),
        Extension(pool.clone()),
        Extension(approver),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(request_status(&pool, request_id).await?, "APPROVED");
    let roles_held = store::get_roles_for_user(&pool, requester_id).await?;
    assert!(roles_held.iter().any(|role| role == ROLE_ADMIN));

    Ok(())
}

#[tokio::test]
async fn rejecting_a_request_removes_the_role_even_when_never_held() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let requester_id = create_test_user(&pool, &unique_email("reject-req")).await?;
    let approver_id = create_test_user(&pool, &unique_email("reject-adm")).await?;
    let role_id = admin_role_id(&pool).await?;
    store::assign_role_to_user(&pool, approver_id, role_id).await?;

    let request_id = store::create_role_request(&pool, requester_id, role_id).await?;
    let approver = authed_user(&pool, approver_id).await?;

    // The requester never held ADMIN; rejection must still succeed.
    let response = roles::reject_request(
        Path(request_id),
        Extension(pool.clone()),
        Extension(approver.clone()),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(request_status(&pool, request_id).await?, "REJECTED");

    // Held through another path, the role is revoked by a second rejection.
    store::assign_role_to_user(&pool, requester_id, role_id).await?;
    let second_request = store::create_role_request(&pool, requester_id, role_id).await?;
    let response = roles::reject_request(
        Path(second_request),
        Extension(pool.clone()),
        Extension(approver),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);

    let roles_held = store::get_roles_for_user(&pool, requester_id).await?;
    assert!(
        !roles_held.iter().any(|role| role == ROLE_ADMIN),
        "rejection removes the role unconditionally"
    );

    Ok(())
}

#[tokio::test]
async fn reviewing_an_unknown_request_is_not_found() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let approver_id = create_test_user(&pool, &unique_email("missing-adm")).await?;
    let role_id = admin_role_id(&pool).await?;
    store::assign_role_to_user(&pool, approver_id, role_id).await?;
    let approver = authed_user(&pool, approver_id).await?;

    let response = roles::approve_request(
        Path(i32::MAX),
        Extension(pool.clone()),
        Extension(approver),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn registered_user_gets_the_user_role_and_can_log_in() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let email = unique_email("register");
    let user_id = create_test_user(&pool, &email).await?;
    let role_id = store::get_role_by_name(&pool, ROLE_USER)
        .await?
        .context("USER role is not seeded")?;
    store::assign_role_to_user(&pool, user_id, role_id).await?;

    let user = store::get_user_by_email(&pool, &email)
        .await?
        .context("registered user must be retrievable")?;
    assert!(hasher::verify_password(
        "CorrectHorseBatteryStaple",
        &user.hashed_password
    )?);
    assert!(!hasher::verify_password("wrong-password", &user.hashed_password)?);

    let roles_held = store::get_roles_for_user(&pool, user_id).await?;
    assert_eq!(roles_held, vec![ROLE_USER.to_string()]);

    Ok(())
}

#[tokio::test]
async fn sliding_expiry_update_moves_the_deadline() -> Result<()> {
    let Some(pool) = test_pool().await? else {
        return Ok(());
    };

    let user_id = create_test_user(&pool, &unique_email("slide")).await?;
    let token = session::generate_session_token(32)?;
    let initial = Utc::now() + Duration::minutes(5);
    store::create_session(&pool, user_id, &token, initial).await?;

    let extended = Utc::now() + Duration::hours(1);
    store::update_session_expiry(&pool, &token, extended).await?;

    let lookup = store::get_session_by_token(&pool, &token).await?;
    let SessionLookup::Found(row) = lookup else {
        return Err(anyhow!("session must still exist"));
    };
    let expires_at = row.expires_at.context("expiry must be set")?;
    assert!(expires_at > initial);

    Ok(())
}
