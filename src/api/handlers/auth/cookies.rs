//! Cookie transport codecs for the session token.
//!
//! Three encode/decode pairs share one assembly step:
//! - plain: base64url, no integrity;
//! - signed: HMAC-SHA256 over `name || payload`, tag transmitted with the
//!   payload;
//! - encrypted: ChaCha20-Poly1305 with the cookie name as AAD, providing
//!   confidentiality and tamper detection in one operation.
//!
//! Every decode failure collapses into a single opaque error so callers
//! cannot learn *where* verification failed.

use axum::http::{HeaderMap, HeaderValue, header::COOKIE};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Upper bound for a serialized `Set-Cookie` value; longer cookies are
/// rejected outright rather than truncated by the browser.
pub const MAX_COOKIE_BYTES: usize = 4096;

/// Minimum secret key length accepted by the signed and encrypted codecs.
pub const MIN_KEY_BYTES: usize = 32;

const NONCE_BYTES: usize = 12;
const TAG_BYTES: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CookieError {
    #[error("cookie value too long")]
    ValueTooLong,
    #[error("secret key shorter than {MIN_KEY_BYTES} bytes")]
    ShortKey,
    #[error("cookie not present")]
    Missing,
    #[error("invalid cookie value")]
    Invalid,
}

/// `SameSite` attribute of the session cookie.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        }
    }
}

/// Cookie attributes applied to every session cookie the service writes.
#[derive(Clone, Debug)]
pub struct CookiePolicy {
    pub name: String,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
}

/// A cookie ready to be serialized into a `Set-Cookie` header.
#[derive(Clone, Debug)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub max_age: i64,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
}

impl Cookie {
    /// Build a cookie from the configured policy and an already-encoded value.
    #[must_use]
    pub fn bake(policy: &CookiePolicy, value: String, max_age: i64) -> Self {
        Self {
            name: policy.name.clone(),
            value,
            path: policy.path.clone(),
            max_age,
            http_only: policy.http_only,
            secure: policy.secure,
            same_site: policy.same_site,
        }
    }

    /// An empty, immediately-expiring cookie that clears any previous value.
    #[must_use]
    pub fn expired(policy: &CookiePolicy) -> Self {
        Self::bake(policy, String::new(), 0)
    }

    /// Serialize into a `Set-Cookie` header value, enforcing the byte ceiling.
    ///
    /// # Errors
    /// Returns [`CookieError::ValueTooLong`] when the serialized cookie
    /// exceeds [`MAX_COOKIE_BYTES`], or [`CookieError::Invalid`] when the
    /// parts do not form a valid header value.
    pub fn to_header_value(&self) -> Result<HeaderValue, CookieError> {
        let mut cookie = format!(
            "{}={}; Path={}; Max-Age={}; SameSite={}",
            self.name,
            self.value,
            self.path,
            self.max_age,
            self.same_site.as_str()
        );
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        if cookie.len() > MAX_COOKIE_BYTES {
            return Err(CookieError::ValueTooLong);
        }
        HeaderValue::from_str(&cookie).map_err(|_| CookieError::Invalid)
    }
}

/// Extract a raw cookie value from a request's `Cookie` header.
#[must_use]
pub fn read_cookie_header(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name {
            return Some(val.to_string());
        }
    }
    None
}

/// Encode a value for plain (unauthenticated) transport.
#[must_use]
pub fn encode_plain(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(value.as_bytes())
}

/// Decode a plain cookie value.
///
/// # Errors
/// Returns [`CookieError::Invalid`] on malformed base64 or non-UTF-8 content.
pub fn decode_plain(value: &str) -> Result<String, CookieError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.as_bytes())
        .map_err(|_| CookieError::Invalid)?;
    String::from_utf8(bytes).map_err(|_| CookieError::Invalid)
}

/// Encode a value with an HMAC-SHA256 integrity tag over `name || value`.
///
/// # Errors
/// Returns [`CookieError::ShortKey`] for keys under [`MIN_KEY_BYTES`].
pub fn encode_signed(name: &str, value: &str, key: &[u8]) -> Result<String, CookieError> {
    let mut mac = new_mac(name, key)?;
    mac.update(value.as_bytes());
    let tag = mac.finalize().into_bytes();

    let mut message = Vec::with_capacity(TAG_BYTES + value.len());
    message.extend_from_slice(&tag);
    message.extend_from_slice(value.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(message))
}

/// Verify and strip the integrity tag from a signed cookie value.
///
/// # Errors
/// Returns [`CookieError::ShortKey`] for keys under [`MIN_KEY_BYTES`], or
/// [`CookieError::Invalid`] for any structural or verification failure.
pub fn decode_signed(name: &str, value: &str, key: &[u8]) -> Result<String, CookieError> {
    let message = URL_SAFE_NO_PAD
        .decode(value.as_bytes())
        .map_err(|_| CookieError::Invalid)?;
    if message.len() < TAG_BYTES {
        return Err(CookieError::Invalid);
    }
    let (tag, payload) = message.split_at(TAG_BYTES);

    let mut mac = new_mac(name, key)?;
    mac.update(payload);
    // verify_slice compares in constant time.
    mac.verify_slice(tag).map_err(|_| CookieError::Invalid)?;

    String::from_utf8(payload.to_vec()).map_err(|_| CookieError::Invalid)
}

/// Seal a value with ChaCha20-Poly1305, binding it to the cookie name.
/// The transmitted form is `base64url(nonce || ciphertext)`.
///
/// # Errors
/// Returns [`CookieError::ShortKey`] for keys under [`MIN_KEY_BYTES`], or
/// [`CookieError::Invalid`] if sealing fails.
pub fn encode_encrypted(name: &str, value: &str, key: &[u8]) -> Result<String, CookieError> {
    let cipher = new_cipher(key)?;

    let mut nonce_bytes = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let payload = Payload {
        msg: value.as_bytes(),
        aad: name.as_bytes(),
    };
    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|_| CookieError::Invalid)?;

    let mut sealed = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(sealed))
}

/// Open a sealed cookie value; tampering with any bit fails the open.
///
/// # Errors
/// Returns [`CookieError::ShortKey`] for keys under [`MIN_KEY_BYTES`], or
/// [`CookieError::Invalid`] for any structural or authentication failure.
pub fn decode_encrypted(name: &str, value: &str, key: &[u8]) -> Result<String, CookieError> {
    let sealed = URL_SAFE_NO_PAD
        .decode(value.as_bytes())
        .map_err(|_| CookieError::Invalid)?;
    if sealed.len() < NONCE_BYTES {
        return Err(CookieError::Invalid);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_BYTES);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = new_cipher(key)?;
    let payload = Payload {
        msg: ciphertext,
        aad: name.as_bytes(),
    };
    let plaintext = cipher
        .decrypt(nonce, payload)
        .map_err(|_| CookieError::Invalid)?;

    String::from_utf8(plaintext).map_err(|_| CookieError::Invalid)
}

fn new_mac(name: &str, key: &[u8]) -> Result<HmacSha256, CookieError> {
    if key.len() < MIN_KEY_BYTES {
        return Err(CookieError::ShortKey);
    }
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CookieError::ShortKey)?;
    mac.update(name.as_bytes());
    Ok(mac)
}

fn new_cipher(key: &[u8]) -> Result<ChaCha20Poly1305, CookieError> {
    if key.len() < MIN_KEY_BYTES {
        return Err(CookieError::ShortKey);
    }
    Ok(ChaCha20Poly1305::new(Key::from_slice(&key[..MIN_KEY_BYTES])))
}
