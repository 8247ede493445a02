//! Password hashing using Argon2id
//!
//! Produces PHC string digests with the parameters embedded, so verification
//! needs no external context and parameter upgrades take effect on the next
//! change. Strength and history policy live here alongside the hasher.

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as Argon2Hasher, PasswordVerifier,
        SaltString,
    },
    Algorithm, Argon2, Params, Version,
};

use crate::config::PasswordPolicyConfig;
use crate::error::{Error, Result};

/// Password hasher and policy checker
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
    min_length: usize,
    history_count: usize,
}

impl PasswordHasher {
    pub fn new(config: &PasswordPolicyConfig) -> Result<Self> {
        let params = Params::new(
            config.argon2_memory_cost_kib,
            config.argon2_time_cost,
            config.argon2_parallelism,
            None,
        )
        .map_err(|e| Error::Internal(format!("invalid Argon2 parameters: {}", e)))?;

        Ok(Self {
            params,
            min_length: config.min_length,
            history_count: config.history_count,
        })
    }

    /// Hash a password into PHC string format
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());

        let hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::Internal(format!("failed to hash password: {}", e)))?;

        Ok(hash.to_string())
    }

    /// Verify a password against a stored digest (constant-time)
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| Error::Internal(format!("invalid password hash format: {}", e)))?;

        // Parameters are read from the digest itself
        match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Internal(format!(
                "password verification failed: {}",
                e
            ))),
        }
    }

    /// Enforce the strength policy: minimum length plus one character from
    /// each of the four classes
    pub fn check_strength(&self, password: &str) -> Result<()> {
        if password.chars().count() < self.min_length {
            return Err(Error::Validation(format!(
                "Password must be at least {} characters",
                self.min_length
            )));
        }
        if !password.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(Error::Validation(
                "Password must contain an uppercase letter".into(),
            ));
        }
        if !password.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(Error::Validation(
                "Password must contain a lowercase letter".into(),
            ));
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(Error::Validation("Password must contain a digit".into()));
        }
        if password.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Validation(
                "Password must contain a symbol".into(),
            ));
        }
        Ok(())
    }

    /// Whether the candidate matches the current digest or any retained prior
    /// digest
    pub fn in_history(&self, password: &str, current: &str, history: &[String]) -> Result<bool> {
        if self.verify(password, current)? {
            return Ok(true);
        }
        for digest in history.iter().rev().take(self.history_count) {
            if self.verify(password, digest)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Retained history length
    pub fn history_count(&self) -> usize {
        self.history_count
    }
}
