//! Password hashing (Argon2id, PHC strings).

use argon2::password_hash::SaltString;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use thiserror::Error;

pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 128;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("weak password: {0}")]
    WeakPassword(String),

    #[error("password does not match")]
    Mismatch,

    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// One-way password hashing port.
///
/// Implementations must be salted and must not log their inputs.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String, CredentialError>;

    fn verify(&self, plaintext: &str, hash: &str) -> Result<(), CredentialError>;
}

/// Acceptability policy applied before any hashing work.
pub fn check_password_policy(plaintext: &str) -> Result<(), CredentialError> {
    let len = plaintext.chars().count();
    if len < PASSWORD_MIN_LEN {
        return Err(CredentialError::WeakPassword(format!(
            "must be at least {PASSWORD_MIN_LEN} characters"
        )));
    }
    if len > PASSWORD_MAX_LEN {
        return Err(CredentialError::WeakPassword(format!(
            "must be at most {PASSWORD_MAX_LEN} characters"
        )));
    }
    Ok(())
}

/// Argon2id work factor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    /// OWASP's baseline Argon2id profile (19 MiB, t=2, p=1).
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    pub fn new(cost: HashCost) -> Result<Self, CredentialError> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| CredentialError::Hashing(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String, CredentialError> {
        check_password_policy(plaintext)?;

        let mut salt_bytes = [0u8; 16];
        getrandom::getrandom(&mut salt_bytes).map_err(|e| CredentialError::Hashing(e.to_string()))?;
        let salt =
            SaltString::encode_b64(&salt_bytes).map_err(|e| CredentialError::Hashing(e.to_string()))?;

        let phc = self
            .argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| CredentialError::Hashing(e.to_string()))?
            .to_string();
        Ok(phc)
    }

    /// Cost parameters are read from the stored hash, so hashes made under an
    /// older work factor still verify.
    fn verify(&self, plaintext: &str, hash: &str) -> Result<(), CredentialError> {
        let parsed = PasswordHash::new(hash)
            .map_err(|_| CredentialError::Hashing("stored hash is not a PHC string".into()))?;
        self.argon2()
            .verify_password(plaintext.as_bytes(), &parsed)
            .map_err(|_| CredentialError::Mismatch)
    }
}
