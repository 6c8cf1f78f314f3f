//! Database access for users, sessions, roles, and role requests.
//!
//! Every function takes its executor explicitly - a pool for single
//! statements, an open transaction for sequences that must commit or roll
//! back together - so callers, not this module, own the transaction
//! boundary.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgExecutor, Row};
use tracing::Instrument;
use utoipa::ToSchema;

/// A user row as the auth core sees it.
#[derive(Clone, Debug)]
pub struct UserRow {
    pub id: i32,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub hashed_password: String,
}

/// A session row; `expires_at` stays optional so an unset expiry can be
/// surfaced as an error instead of being silently coerced.
#[derive(Clone, Debug)]
pub struct SessionRow {
    pub user_id: i32,
    pub session_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Lookup result for sessions; callers pattern-match instead of sniffing
/// row-not-found errors out of the driver.
#[derive(Debug)]
pub enum SessionLookup {
    Found(SessionRow),
    Missing,
}

/// Outcome when inserting a new user.
#[derive(Debug)]
pub enum CreateUserOutcome {
    Created(i32),
    DuplicateEmail,
}

/// A role request row after a review mutation.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct RoleRequestRow {
    pub id: i32,
    pub user_id: i32,
    pub status: String,
    pub approved_by: Option<i32>,
}

/// A role request joined with its requester, for the admin review list.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct RoleRequestView {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

pub(crate) async fn create_user(
    executor: impl PgExecutor<'_>,
    name: &str,
    surname: &str,
    email: &str,
    hashed_password: &str,
) -> Result<CreateUserOutcome> {
    let query = r"
        INSERT INTO users (name, surname, email, hashed_password)
        VALUES ($1, $2, $3, $4)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(name)
        .bind(surname)
        .bind(email)
        .bind(hashed_password)
        .fetch_one(executor)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(CreateUserOutcome::Created(row.get("id"))),
        Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::DuplicateEmail),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

pub(crate) async fn get_user_by_email(
    executor: impl PgExecutor<'_>,
    email: &str,
) -> Result<Option<UserRow>> {
    let query = r"
        SELECT id, name, surname, email, hashed_password
        FROM users
        WHERE email = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(executor)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;

    Ok(row.map(|row| UserRow {
        id: row.get("id"),
        name: row.get("name"),
        surname: row.get("surname"),
        email: row.get("email"),
        hashed_password: row.get("hashed_password"),
    }))
}

pub(crate) async fn get_user_by_id(
    executor: impl PgExecutor<'_>,
    user_id: i32,
) -> Result<Option<UserRow>> {
    let query = r"
        SELECT id, name, surname, email, hashed_password
        FROM users
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(executor)
        .instrument(span)
        .await
        .context("failed to lookup user by id")?;

    Ok(row.map(|row| UserRow {
        id: row.get("id"),
        name: row.get("name"),
        surname: row.get("surname"),
        email: row.get("email"),
        hashed_password: row.get("hashed_password"),
    }))
}

pub(crate) async fn get_role_by_name(
    executor: impl PgExecutor<'_>,
    name: &str,
) -> Result<Option<i32>> {
    let query = "SELECT id FROM roles WHERE name = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(name)
        .fetch_optional(executor)
        .instrument(span)
        .await
        .context("failed to lookup role by name")?;

    Ok(row.map(|row| row.get("id")))
}

pub(crate) async fn get_roles_for_user(
    executor: impl PgExecutor<'_>,
    user_id: i32,
) -> Result<Vec<String>> {
    let query = r"
        SELECT roles.name
        FROM user_roles
        JOIN roles ON roles.id = user_roles.role_id
        WHERE user_roles.user_id = $1
        ORDER BY roles.name
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(executor)
        .instrument(span)
        .await
        .context("failed to lookup roles for user")?;

    Ok(rows.iter().map(|row| row.get("name")).collect())
}

/// Grant a role; granting an already-held role is a no-op.
pub(crate) async fn assign_role_to_user(
    executor: impl PgExecutor<'_>,
    user_id: i32,
    role_id: i32,
) -> Result<()> {
    let query = r"
        INSERT INTO user_roles (user_id, role_id)
        VALUES ($1, $2)
        ON CONFLICT (user_id, role_id) DO NOTHING
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(role_id)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to assign role to user")?;
    Ok(())
}

/// Revoke a role; revoking a role the user never held is a no-op.
pub(crate) async fn remove_role_from_user(
    executor: impl PgExecutor<'_>,
    user_id: i32,
    role_id: i32,
) -> Result<()> {
    let query = "DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(role_id)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to remove role from user")?;
    Ok(())
}

pub(crate) async fn create_session(
    executor: impl PgExecutor<'_>,
    user_id: i32,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<i32> {
    let query = r"
        INSERT INTO sessions (user_id, session_token, expires_at)
        VALUES ($1, $2, $3)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .fetch_one(executor)
        .instrument(span)
        .await
        .context("failed to insert session")?;
    Ok(row.get("id"))
}

pub(crate) async fn get_session_by_token(
    executor: impl PgExecutor<'_>,
    token: &str,
) -> Result<SessionLookup> {
    let query = r"
        SELECT user_id, session_token, expires_at
        FROM sessions
        WHERE session_token = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token)
        .fetch_optional(executor)
        .instrument(span)
        .await
        .context("failed to lookup session by token")?;

    Ok(row.map_or(SessionLookup::Missing, |row| {
        SessionLookup::Found(SessionRow {
            user_id: row.get("user_id"),
            session_token: row.get("session_token"),
            expires_at: row.get("expires_at"),
        })
    }))
}

pub(crate) async fn get_latest_session(
    executor: impl PgExecutor<'_>,
    user_id: i32,
) -> Result<SessionLookup> {
    let query = r"
        SELECT user_id, session_token, expires_at
        FROM sessions
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(executor)
        .instrument(span)
        .await
        .context("failed to lookup latest session")?;

    Ok(row.map_or(SessionLookup::Missing, |row| {
        SessionLookup::Found(SessionRow {
            user_id: row.get("user_id"),
            session_token: row.get("session_token"),
            expires_at: row.get("expires_at"),
        })
    }))
}

pub(crate) async fn update_session_expiry(
    executor: impl PgExecutor<'_>,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    let query = r"
        UPDATE sessions
        SET expires_at = $2,
            updated_at = NOW()
        WHERE session_token = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token)
        .bind(expires_at)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to update session expiry")?;
    Ok(())
}

/// Deleting a session that is already gone is a no-op, so logout stays
/// idempotent.
pub(crate) async fn delete_session_by_token(
    executor: impl PgExecutor<'_>,
    token: &str,
) -> Result<()> {
    let query = "DELETE FROM sessions WHERE session_token = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

pub(crate) async fn create_role_request(
    executor: impl PgExecutor<'_>,
    user_id: i32,
    requested_role_id: i32,
) -> Result<i32> {
    let query = r"
        INSERT INTO role_requests (user_id, requested_role_id)
        VALUES ($1, $2)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(requested_role_id)
        .fetch_one(executor)
        .instrument(span)
        .await
        .context("failed to insert role request")?;
    Ok(row.get("id"))
}

pub(crate) async fn review_role_request(
    executor: impl PgExecutor<'_>,
    request_id: i32,
    status: &str,
    approver_id: i32,
) -> Result<Option<RoleRequestRow>> {
    let query = r"
        UPDATE role_requests
        SET status = $2::role_request_status,
            approved_by = $3,
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, user_id, status::text AS status, approved_by
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(request_id)
        .bind(status)
        .bind(approver_id)
        .fetch_optional(executor)
        .instrument(span)
        .await
        .context("failed to review role request")?;

    Ok(row.map(|row| RoleRequestRow {
        id: row.get("id"),
        user_id: row.get("user_id"),
        status: row.get("status"),
        approved_by: row.get("approved_by"),
    }))
}

pub(crate) async fn list_role_requests(
    executor: impl PgExecutor<'_>,
) -> Result<Vec<RoleRequestView>> {
    let query = r"
        SELECT role_requests.id, role_requests.user_id, users.name, users.surname,
               users.email, role_requests.status::text AS status, role_requests.created_at
        FROM role_requests
        JOIN users ON users.id = role_requests.user_id
        ORDER BY role_requests.created_at DESC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(executor)
        .instrument(span)
        .await
        .context("failed to list role requests")?;

    Ok(rows
        .iter()
        .map(|row| RoleRequestView {
            id: row.get("id"),
            user_id: row.get("user_id"),
            name: row.get("name"),
            surname: row.get("surname"),
            email: row.get("email"),
            status: row.get("status"),
            created_at: row.get("created_at"),
        })
        .collect())
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
    }

    #[test]
    fn session_lookup_debug_names() {
        assert_eq!(format!("{:?}", SessionLookup::Missing), "Missing");
    }

    #[test]
    fn create_user_outcome_debug_names() {
        assert_eq!(
            format!("{:?}", CreateUserOutcome::DuplicateEmail),
            "DuplicateEmail"
        );
    }
}
