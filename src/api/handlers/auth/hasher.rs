//! Argon2id password hashing with a self-describing encoded form.
//!
//! The encoded string carries the algorithm tag, version, and tuning
//! parameters alongside the salt and derived key, so verification always
//! re-derives with the parameters the hash was created under:
//!
//! ```text
//! $argon2id$v=19$m=65536,t=3,p=2$<salt b64>$<key b64>
//! ```
//!
//! Verification compares the derived key against the stored key in constant
//! time regardless of where a mismatch occurs.

use anyhow::{Context, Result, anyhow};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use rand::{RngCore, rngs::OsRng};
use subtle::ConstantTimeEq;
use thiserror::Error;

const ARGON2_VERSION: u32 = Version::V0x13 as u32;

/// Argon2id tuning parameters plus the salt/key sizes used for new hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub salt_length: u32,
    pub key_length: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 2,
            salt_length: 16,
            key_length: 32,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("the encoded hash is not in the correct format")]
    InvalidFormat,
    #[error("incompatible version of argon2")]
    IncompatibleVersion,
}

/// Hash a password with a fresh random salt.
///
/// # Errors
/// Fails only when the entropy source is unavailable or the configured
/// parameters are out of range for Argon2.
pub fn hash_password(password: &str, config: &HashConfig) -> Result<String> {
    let salt = generate_random_bytes(config.salt_length)?;
    encode_hash(password, config, &salt)
}

/// Verify a password against a stored encoded hash.
///
/// The parameters embedded in the stored hash drive the re-derivation; the
/// comparison is constant-time in the derived key.
///
/// # Errors
/// Returns [`HashError::InvalidFormat`] or [`HashError::IncompatibleVersion`]
/// when the stored hash cannot be parsed.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool, HashError> {
    let (config, salt, key) = decode_hash(stored_hash)?;
    let other_key =
        derive_key(password.as_bytes(), &salt, &config).map_err(|_| HashError::InvalidFormat)?;

    Ok(bool::from(key.ct_eq(&other_key)))
}

/// Derive and encode a hash for the given password and salt.
///
/// # Errors
/// Returns an error when the parameters are rejected by Argon2.
pub fn encode_hash(password: &str, config: &HashConfig, salt: &[u8]) -> Result<String> {
    let key = derive_key(password.as_bytes(), salt, config)?;

    let b64_salt = STANDARD_NO_PAD.encode(salt);
    let b64_key = STANDARD_NO_PAD.encode(key);

    Ok(format!(
        "$argon2id$v={ARGON2_VERSION}$m={},t={},p={}${b64_salt}${b64_key}",
        config.memory_kib, config.iterations, config.parallelism
    ))
}

/// Split an encoded hash into its parameters, salt, and derived key.
///
/// The salt and key lengths of the returned config are taken from the decoded
/// segments, so they always match the material they describe.
///
/// # Errors
/// Returns [`HashError::InvalidFormat`] unless the value is exactly six
/// `$`-separated fields with a well-formed parameter segment and valid
/// base64, or [`HashError::IncompatibleVersion`] when the embedded version
/// differs from the running Argon2 version.
pub fn decode_hash(encoded: &str) -> Result<(HashConfig, Vec<u8>, Vec<u8>), HashError> {
    let fields: Vec<&str> = encoded.split('$').collect();
    if fields.len() != 6 {
        return Err(HashError::InvalidFormat);
    }
    if fields[1] != "argon2id" {
        return Err(HashError::InvalidFormat);
    }

    let version: u32 = fields[2]
        .strip_prefix("v=")
        .and_then(|value| value.parse().ok())
        .ok_or(HashError::InvalidFormat)?;
    if version != ARGON2_VERSION {
        return Err(HashError::IncompatibleVersion);
    }

    let (memory_kib, iterations, parallelism) = decode_params(fields[3])?;

    let salt = STANDARD_NO_PAD
        .decode(fields[4])
        .map_err(|_| HashError::InvalidFormat)?;
    let key = STANDARD_NO_PAD
        .decode(fields[5])
        .map_err(|_| HashError::InvalidFormat)?;

    let config = HashConfig {
        memory_kib,
        iterations,
        parallelism,
        salt_length: u32::try_from(salt.len()).map_err(|_| HashError::InvalidFormat)?,
        key_length: u32::try_from(key.len()).map_err(|_| HashError::InvalidFormat)?,
    };

    Ok((config, salt, key))
}

/// Fill a buffer of `n` bytes from the OS entropy source.
///
/// # Errors
/// Returns an error when the entropy source is exhausted or unavailable.
pub fn generate_random_bytes(n: u32) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; n as usize];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to gather entropy")?;
    Ok(bytes)
}

fn derive_key(password: &[u8], salt: &[u8], config: &HashConfig) -> Result<Vec<u8>> {
    let params = Params::new(
        config.memory_kib,
        config.iterations,
        config.parallelism,
        Some(config.key_length as usize),
    )
    .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = vec![0u8; config.key_length as usize];
    argon2
        .hash_password_into(password, salt, &mut key)
        .map_err(|err| anyhow!("argon2 derivation failed: {err}"))?;
    Ok(key)
}

/// Parse the `m=..,t=..,p=..` parameter segment, rejecting any other shape.
fn decode_params(segment: &str) -> Result<(u32, u32, u32), HashError> {
    let mut parts = segment.split(',');
    let memory_kib = parse_prefixed(parts.next(), "m=")?;
    let iterations = parse_prefixed(parts.next(), "t=")?;
    let parallelism = parse_prefixed(parts.next(), "p=")?;
    if parts.next().is_some() {
        return Err(HashError::InvalidFormat);
    }
    Ok((memory_kib, iterations, parallelism))
}

fn parse_prefixed(part: Option<&str>, prefix: &str) -> Result<u32, HashError> {
    part.and_then(|value| value.strip_prefix(prefix))
        .and_then(|value| value.parse().ok())
        .ok_or(HashError::InvalidFormat)
}
