//! Authentication and authorization core.
//!
//! Flow Overview: a request carries the session token inside an encrypted
//! cookie; the middleware decodes it, verifies the session against the
//! store, checks role membership, and extends the sliding expiry inside one
//! transaction before the wrapped handler runs. Credentials are Argon2id
//! hashes; role escalation goes through a PENDING/APPROVED/REJECTED request
//! queue reviewed by admins.

pub mod cookies;
pub mod hasher;
pub mod middleware;
pub mod roles;
pub mod session;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use cookies::{Cookie, CookieError, CookiePolicy, SameSite};
pub use hasher::{HashConfig, HashError};
pub use middleware::{AuthedUser, RoleGuard, RoleName, require_role};
pub use roles::RoleRequestStatus;
pub use session::SessionError;
pub use state::{AuthConfig, AuthState};
pub use store::{SessionLookup, SessionRow};
