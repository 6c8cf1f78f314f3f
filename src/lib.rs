//! # Rezervi (Scheduling & Booking Authority)
//!
//! `rezervi` is the authentication and authorization core of a
//! scheduling/booking backend. It owns password credentials, tamper-resistant
//! session cookies, session lifecycle with sliding expiry, and the
//! role-escalation workflow through which a user gains administrative rights.
//!
//! ## Authentication
//!
//! Passwords are hashed with Argon2id into a self-describing encoded string;
//! verification re-derives the key with the parameters embedded in the stored
//! hash and compares in constant time. Session tokens are high-entropy,
//! URL-safe values carried to the browser inside an encrypted, authenticated
//! cookie; the database stores the token alongside its UTC expiry.
//!
//! ## Authorization & Roles
//!
//! Access is controlled by role membership (`USER`, `ADMIN`). Protected
//! routes sit behind a middleware that verifies the session, checks the
//! required role, and extends the session expiry inside a single database
//! transaction per request. Failed role checks answer `401 Unauthorized`
//! with the same opaque body as failed authentication, so callers cannot
//! probe which of the two gates rejected them.
//!
//! ## Role escalation
//!
//! A user raises a request for the `ADMIN` role; an existing admin approves
//! or rejects it. The configured bootstrap admin email bypasses the request
//! queue and is granted the role directly.

pub mod api;
pub mod cli;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
