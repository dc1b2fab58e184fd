use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use std::time::Instant;
use tracing::{debug, error, warn};

use super::error::HasherError;

/*
    argon2 parameters. please don't change these.

    argon2d provides gpu resistance but is vulnerable to side-channels.
    argon2i provides less gpu resistance but is less vulnerable to side-channels.
    argon2id takes a hybrid approach between the two, and since we will
    probably be running on shared servers, it is the only acceptable choice.
*/

/// Working set of 70656 KiB (~69 MiB); runs fine on an average desktop.
const MEMORY_COST_KIB: u32 = 70656;

/// Double the reference implementation's default iteration count.
const TIME_COST: u32 = 6;

/// 8 lanes, sized for a typical desktop CPU.
const PARALLELISM: u32 = 8;

/// 256-bit output; 128 bits isn't enough.
const OUTPUT_LEN: usize = 32;

/// Input for the startup timing probe.
const PROBE_PHRASE: &str = "backchannel argon2 self-check";

/// Hashes and verifies account passwords with argon2id.
///
/// Both operations are CPU- and memory-bound, so they run under
/// `spawn_blocking`; everything between issuing a hash and its completion is
/// a suspension point for the caller.
#[derive(Clone)]
pub struct CredentialHasher {
    argon2: Argon2<'static>,
}

impl CredentialHasher {
    /// Create a hasher with the production parameter set.
    pub fn new() -> Result<Self, HasherError> {
        let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, Some(OUTPUT_LEN))
            .map_err(|e| HasherError::InvalidParams(e.to_string()))?;
        Ok(Self::with_params(params))
    }

    /// Create a hasher with explicit parameters. Tests use this with a cheap
    /// set; the server always goes through [`CredentialHasher::new`].
    pub fn with_params(params: Params) -> Self {
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Hash a password into a PHC string carrying salt and parameters.
    ///
    /// Fails only on an internal/resource error; treat a failure as fatal
    /// for the operation that needed it.
    pub async fn hash(&self, password: String) -> Result<String, HasherError> {
        let argon2 = self.argon2.clone();
        tokio::task::spawn_blocking(move || {
            // fresh 16-byte salt per hash, as the argon2 designers recommend
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| HasherError::HashFailed(e.to_string()))
        })
        .await
        .map_err(|e| HasherError::TaskFailed(e.to_string()))?
    }

    /// Verify a password against a stored PHC string.
    ///
    /// Returns `Ok(false)` on mismatch; errors only when the stored hash
    /// itself cannot be parsed.
    pub async fn verify(&self, hash: String, password: String) -> Result<bool, HasherError> {
        let argon2 = self.argon2.clone();
        tokio::task::spawn_blocking(move || {
            let parsed =
                PasswordHash::new(&hash).map_err(|e| HasherError::MalformedHash(e.to_string()))?;
            match argon2.verify_password(password.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(argon2::password_hash::Error::Password) => Ok(false),
                Err(e) => Err(HasherError::MalformedHash(e.to_string())),
            }
        })
        .await
        .map_err(|e| HasherError::TaskFailed(e.to_string()))?
    }

    /// Time one hash at startup and log the result.
    ///
    /// Purely an operational signal: a slow box surfaces here instead of as
    /// mysterious login latency. Failure is logged, never fatal.
    pub async fn calibrate(&self) {
        debug!("Checking argon2 performance...");
        let started = Instant::now();
        match self.hash(PROBE_PHRASE.to_string()).await {
            Ok(_) => {
                let elapsed_ms = started.elapsed().as_millis();
                debug!(elapsed_ms, "argon2 self-check hash completed");
                if elapsed_ms > 3000 {
                    warn!(
                        elapsed_ms,
                        "Hash is slow; anything above a few seconds will be inconvenient for users"
                    );
                }
            }
            Err(e) => error!("argon2 self-check failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cheap parameters so the unit suite doesn't burn 69 MiB per hash.
    fn test_hasher() -> CredentialHasher {
        CredentialHasher::with_params(
            Params::new(1024, 1, 1, Some(OUTPUT_LEN)).expect("test params are valid"),
        )
    }

    #[test]
    fn test_production_params() {
        // The reviewed parameter set is load-bearing; lock it down.
        assert_eq!(MEMORY_COST_KIB, 70656);
        assert_eq!(TIME_COST, 6);
        assert_eq!(PARALLELISM, 8);
        assert_eq!(OUTPUT_LEN, 32);
        assert!(CredentialHasher::new().is_ok());
    }

    #[tokio::test]
    async fn test_hash_then_verify_round_trip() {
        let hasher = test_hasher();
        let hash = hasher.hash("hunter2".to_string()).await.expect("hash");

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher
            .verify(hash.clone(), "hunter2".to_string())
            .await
            .expect("verify"));
        assert!(!hasher
            .verify(hash, "hunter3".to_string())
            .await
            .expect("verify"));
    }

    #[tokio::test]
    async fn test_salts_are_unique() {
        let hasher = test_hasher();
        let a = hasher.hash("same password".to_string()).await.expect("hash");
        let b = hasher.hash("same password".to_string()).await.expect("hash");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_verify_rejects_garbage_hash() {
        let hasher = test_hasher();
        let result = hasher
            .verify("not a phc string".to_string(), "pw".to_string())
            .await;
        assert!(matches!(result, Err(HasherError::MalformedHash(_))));
    }

    #[tokio::test]
    async fn test_calibrate_does_not_panic() {
        test_hasher().calibrate().await;
    }
}
