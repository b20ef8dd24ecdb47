use std::sync::Arc;

use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::config::HashConfig;

/// argon2id hashing with a configured cost. Cloning is cheap.
#[derive(Clone)]
pub struct CredentialHasher {
    params: Params,
    dummy_hash: Arc<str>,
}

const DUMMY_PASSWORD: &str = "not-a-real-account";

impl CredentialHasher {
    pub fn new(cfg: &HashConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 parameters: {e}"))?;
        let mut hasher = Self {
            params,
            dummy_hash: Arc::from(""),
        };
        hasher.dummy_hash = Arc::from(hasher.hash_blocking(DUMMY_PASSWORD)?);
        Ok(hasher)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash_blocking(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Cost parameters are read from the stored hash, not from `self`.
    pub fn verify_blocking(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        let parsed = PasswordHash::new(hash).map_err(|e| {
            error!(error = %e, "argon2 parse hash error");
            anyhow::anyhow!(e.to_string())
        })?;
        Ok(self
            .argon2()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok())
    }

    pub async fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let this = self.clone();
        let plain = plain.to_owned();
        tokio::task::spawn_blocking(move || this.hash_blocking(&plain))
            .await
            .context("password hashing task")?
    }

    pub async fn verify(&self, plain: &str, hash: &str) -> anyhow::Result<bool> {
        let this = self.clone();
        let plain = plain.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || this.verify_blocking(&plain, &hash))
            .await
            .context("password verification task")?
    }

    /// Full-cost verification against a throwaway hash, for lookups that
    /// found no account. The outcome is discarded.
    pub async fn verify_dummy(&self, plain: &str) -> anyhow::Result<()> {
        let dummy = Arc::clone(&self.dummy_hash);
        self.verify(plain, &dummy).await.map(|_| ())
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> CredentialHasher {
    CredentialHasher::new(&HashConfig {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    })
    .expect("cheap argon2 params are valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hasher = test_hasher();
        let password = "Secur3P@ssw0rd!";
        let hash = hasher.hash_blocking(password).expect("hashing should succeed");
        assert!(hash.starts_with("$argon2id$"));
        assert_ne!(hash, password);
        assert!(hasher
            .verify_blocking(password, &hash)
            .expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hasher = test_hasher();
        let hash = hasher
            .hash_blocking("correct-horse-battery-staple")
            .expect("hashing should succeed");
        assert!(!hasher
            .verify_blocking("wrong-password", &hash)
            .expect("verify should not error"));
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = test_hasher()
            .verify_blocking("anything", "not-a-valid-hash")
            .unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn salts_differ_per_hash() {
        let hasher = test_hasher();
        let a = hasher.hash_blocking("Same1!pass").unwrap();
        let b = hasher.hash_blocking("Same1!pass").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_impossible_params() {
        assert!(CredentialHasher::new(&HashConfig {
            memory_kib: 1,
            iterations: 0,
            parallelism: 1,
        })
        .is_err());
    }

    #[tokio::test]
    async fn dummy_verification_runs_at_configured_cost() {
        let hasher = test_hasher();
        assert!(hasher.dummy_hash.starts_with("$argon2id$v=19$m=1024,t=1,p=1$"));
        hasher.verify_dummy("Whatever1!").await.unwrap();
        assert!(hasher.verify(DUMMY_PASSWORD, &hasher.dummy_hash).await.unwrap());
    }

    #[tokio::test]
    async fn async_wrappers_run_off_the_runtime() {
        let hasher = test_hasher();
        let hash = hasher.hash("Async1!pass").await.unwrap();
        assert!(hasher.verify("Async1!pass", &hash).await.unwrap());
        assert!(!hasher.verify("nope", &hash).await.unwrap());
    }
}
