use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// argon2id cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown USER_STORE '{other}' (expected postgres or memory)"),
        }
    }
}

/// Credentials for the bootstrap administrator created at startup.
#[derive(Clone, Deserialize)]
pub struct SeedAdmin {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for SeedAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedAdmin")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub hashing: HashConfig,
    pub development: bool,
    pub seed_admin: Option<SeedAdmin>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store = match std::env::var("USER_STORE") {
            Ok(v) => v.parse()?,
            Err(_) => StoreBackend::Postgres,
        };
        let database_url = std::env::var("DATABASE_URL").ok();
        if store == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when USER_STORE=postgres");
        }

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "procurement".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "procurement-users".into()),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 60 * 24)?,
        };
        if jwt.secret.is_empty() {
            anyhow::bail!("JWT_SECRET must not be empty");
        }
        if jwt.ttl_minutes <= 0 {
            anyhow::bail!("JWT_TTL_MINUTES must be positive");
        }

        let defaults = HashConfig::default();
        let hashing = HashConfig {
            memory_kib: env_parse("PASSWORD_HASH_MEMORY_KIB", defaults.memory_kib)?,
            iterations: env_parse("PASSWORD_HASH_ITERATIONS", defaults.iterations)?,
            parallelism: env_parse("PASSWORD_HASH_PARALLELISM", defaults.parallelism)?,
        };

        let development = std::env::var("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("development"))
            .unwrap_or(false);

        let seed_admin = match (
            std::env::var("SEED_ADMIN_EMAIL"),
            std::env::var("SEED_ADMIN_PASSWORD"),
        ) {
            (Ok(email), Ok(password)) => Some(SeedAdmin {
                name: std::env::var("SEED_ADMIN_NAME").unwrap_or_else(|_| "Administrator".into()),
                email,
                password,
            }),
            (Ok(_), Err(_)) => anyhow::bail!("SEED_ADMIN_PASSWORD must be set with SEED_ADMIN_EMAIL"),
            _ => None,
        };

        Ok(Self {
            store,
            database_url,
            jwt,
            hashing,
            development,
            seed_admin,
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}='{raw}': {e}")),
        Err(_) => Ok(default),
    }
}
