//! Secret hashing and verification using Argon2id.
//!
//! Verification always uses the algorithm and parameters recorded in the stored
//! PHC string, so records created under an older policy keep verifying.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

/// Argon2id cost parameters for new hashes.
#[derive(Debug, Clone)]
pub struct HashPolicy {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Time cost (iterations).
    pub time_cost: u32,
    /// Parallelism factor.
    pub parallelism: u32,
}

impl Default for HashPolicy {
    fn default() -> Self {
        Self {
            memory_cost: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl HashPolicy {
    fn build_params(&self) -> Result<Params, argon2::Error> {
        Params::new(self.memory_cost, self.time_cost, self.parallelism, None)
    }
}

/// Outcome of comparing a secret with a stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretCheck {
    Match,
    Mismatch,
    /// The stored value is not a PHC string this hasher understands.
    UnusableHash,
}

/// Argon2id hasher for local account secrets.
#[derive(Debug, Clone, Default)]
pub struct SecretHasher {
    policy: HashPolicy,
}

impl SecretHasher {
    pub fn new(policy: HashPolicy) -> Self {
        Self { policy }
    }

    /// Hash a secret with a fresh random salt. Returns the PHC string.
    pub fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let params = self
            .policy
            .build_params()
            .map_err(|e| anyhow!("Invalid Argon2 parameters: {}", e))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let hash = argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| anyhow!("Failed to hash secret: {}", e))?;

        Ok(hash.to_string())
    }

    /// Compare a secret against a stored PHC hash in constant time.
    ///
    /// Anything that is not an Argon2 PHC string is unusable; there is no
    /// plaintext comparison.
    pub fn verify(&self, secret: &str, stored_hash: &str) -> SecretCheck {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return SecretCheck::UnusableHash;
        };

        let is_argon2 = parsed.algorithm == argon2::ARGON2ID_IDENT
            || parsed.algorithm == argon2::ARGON2I_IDENT
            || parsed.algorithm == argon2::ARGON2D_IDENT;
        if !is_argon2 {
            return SecretCheck::UnusableHash;
        }

        // Argon2::default() picks the variant and costs up from the PHC string.
        match Argon2::default().verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => SecretCheck::Match,
            Err(argon2::password_hash::Error::Password) => SecretCheck::Mismatch,
            Err(_) => SecretCheck::UnusableHash,
        }
    }
}
