//! Auth configuration and shared state.
//!
//! [`AuthConfig`] is assembled once at process start from the CLI arguments
//! and injected into handlers through `Extension<Arc<AuthState>>`; nothing in
//! the auth core reads configuration from ambient globals. The secret key is
//! immutable for the lifetime of the process; rotating it invalidates every
//! outstanding cookie.

use anyhow::{Result, bail};
use secrecy::{ExposeSecret, SecretSlice};

use super::cookies::{CookiePolicy, MIN_KEY_BYTES, SameSite};
use super::hasher::HashConfig;

const DEFAULT_SESSION_DURATION_HOURS: u8 = 1;
const DEFAULT_TOKEN_LENGTH: u32 = 64;
const DEFAULT_COOKIE_NAME: &str = "rezervi_session";

#[derive(Debug)]
pub struct AuthConfig {
    secret_key: SecretSlice<u8>,
    session_duration_hours: u8,
    token_length: u32,
    initial_admin_email: Option<String>,
    cookie: CookiePolicy,
    hash: HashConfig,
}

impl AuthConfig {
    /// Create a configuration around the process-wide secret key.
    ///
    /// # Errors
    /// Returns an error when the key is shorter than the codecs accept; a
    /// short key is a construction-time failure, not a per-request one.
    pub fn new(secret_key: Vec<u8>) -> Result<Self> {
        if secret_key.len() < MIN_KEY_BYTES {
            bail!("secret key must be at least {MIN_KEY_BYTES} bytes, got {}", secret_key.len());
        }
        Ok(Self {
            secret_key: SecretSlice::new(secret_key.into_boxed_slice()),
            session_duration_hours: DEFAULT_SESSION_DURATION_HOURS,
            token_length: DEFAULT_TOKEN_LENGTH,
            initial_admin_email: None,
            cookie: CookiePolicy {
                name: DEFAULT_COOKIE_NAME.to_string(),
                path: "/".to_string(),
                http_only: true,
                secure: true,
                same_site: SameSite::Lax,
            },
            hash: HashConfig::default(),
        })
    }

    #[must_use]
    pub fn with_session_duration_hours(mut self, hours: u8) -> Self {
        self.session_duration_hours = hours;
        self
    }

    #[must_use]
    pub fn with_token_length(mut self, length: u32) -> Self {
        self.token_length = length;
        self
    }

    #[must_use]
    pub fn with_initial_admin_email(mut self, email: Option<String>) -> Self {
        self.initial_admin_email = email;
        self
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: CookiePolicy) -> Self {
        self.cookie = cookie;
        self
    }

    #[must_use]
    pub fn with_hash(mut self, hash: HashConfig) -> Self {
        self.hash = hash;
        self
    }

    #[must_use]
    pub fn secret_key(&self) -> &[u8] {
        self.secret_key.expose_secret()
    }

    #[must_use]
    pub fn session_duration_hours(&self) -> u8 {
        self.session_duration_hours
    }

    #[must_use]
    pub fn token_length(&self) -> u32 {
        self.token_length
    }

    #[must_use]
    pub fn initial_admin_email(&self) -> Option<&str> {
        self.initial_admin_email.as_deref()
    }

    #[must_use]
    pub fn cookie(&self) -> &CookiePolicy {
        &self.cookie
    }

    #[must_use]
    pub fn hash(&self) -> &HashConfig {
        &self.hash
    }
}

#[derive(Debug)]
pub struct AuthState {
    config: AuthConfig,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}
