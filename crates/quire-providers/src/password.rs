//! Password and password-answer hashing.
//!
//! Secrets are stored as PBKDF2-HMAC-SHA256 hashes (ring) in the form
//! `base64(salt):base64(hash)`. Plain text is never stored, so there is no
//! way to retrieve a password; it can only be verified or reset.

use std::num::NonZeroU32;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{ProviderError, ProviderResult};

/// PBKDF2-HMAC-SHA256 iterations (OWASP 2023).
pub const DEFAULT_ITERATIONS: u32 = 600_000;

const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const PUNCTUATION: &[u8] = b"!@#$%^&*()-_=+[]{};:,.?";

// ═══════════════════════════════════════════════════════════════════════
//  Hashing
// ═══════════════════════════════════════════════════════════════════════

/// Salted PBKDF2 hasher.
///
/// The iteration count is a deployment constant: hashes written with one
/// count only verify under the same count.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: NonZeroU32,
}

impl PasswordHasher {
    pub fn new(iterations: u32) -> ProviderResult<Self> {
        let iterations = NonZeroU32::new(iterations).ok_or_else(|| {
            ProviderError::InvalidArgument("password hash iterations must be non-zero".into())
        })?;
        Ok(Self { iterations })
    }

    /// Hash `secret` with a fresh random salt.
    pub fn hash(&self, secret: &str) -> ProviderResult<String> {
        let mut salt = [0u8; SALT_LEN];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| ProviderError::Hashing("failed to generate random salt".into()))?;

        let mut hash = [0u8; KEY_LEN];
        pbkdf2::derive(PBKDF2_ALG, self.iterations, &salt, secret.as_bytes(), &mut hash);

        Ok(format!("{}:{}", BASE64.encode(salt), BASE64.encode(hash)))
    }

    /// Check `secret` against a stored `base64(salt):base64(hash)` string.
    pub fn verify(&self, secret: &str, stored: &str) -> ProviderResult<bool> {
        let (salt, expected) = stored
            .split_once(':')
            .ok_or_else(|| ProviderError::Hashing("malformed password hash".into()))?;
        let salt = BASE64
            .decode(salt)
            .map_err(|e| ProviderError::Hashing(format!("invalid salt encoding: {e}")))?;
        let expected = BASE64
            .decode(expected)
            .map_err(|e| ProviderError::Hashing(format!("invalid hash encoding: {e}")))?;

        Ok(pbkdf2::verify(PBKDF2_ALG, self.iterations, &salt, secret.as_bytes(), &expected).is_ok())
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            iterations: NonZeroU32::MIN.saturating_add(DEFAULT_ITERATIONS - 1),
        }
    }
}

/// Password answers compare case-insensitively and ignore surrounding space.
pub fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

// ═══════════════════════════════════════════════════════════════════════
//  Random passwords
// ═══════════════════════════════════════════════════════════════════════

/// Generate a random password of `length` characters containing at least
/// `min_non_alphanumeric` punctuation characters.
pub fn generate_password(length: usize, min_non_alphanumeric: usize) -> ProviderResult<String> {
    let rng = SystemRandom::new();
    let length = length.max(min_non_alphanumeric);

    let mut chars = Vec::with_capacity(length);
    for _ in 0..min_non_alphanumeric {
        chars.push(PUNCTUATION[pick(&rng, PUNCTUATION.len())?]);
    }
    let all: Vec<u8> = ALPHANUMERIC.iter().chain(PUNCTUATION).copied().collect();
    while chars.len() < length {
        chars.push(all[pick(&rng, all.len())?]);
    }

    // Fisher-Yates, so the required punctuation is not always at the front.
    for i in (1..chars.len()).rev() {
        let j = pick(&rng, i + 1)?;
        chars.swap(i, j);
    }
    Ok(chars.into_iter().map(char::from).collect())
}

/// Uniform index in `0..n` (`n <= 256`) by rejection sampling.
fn pick(rng: &SystemRandom, n: usize) -> ProviderResult<usize> {
    let limit = 256 - (256 % n);
    loop {
        let mut byte = [0u8; 1];
        rng.fill(&mut byte)
            .map_err(|_| ProviderError::Hashing("random source failed".into()))?;
        let b = usize::from(byte[0]);
        if b < limit {
            return Ok(b % n);
        }
    }
}
