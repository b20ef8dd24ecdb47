use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRef;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::auth::{jwt::JwtKeys, password::CredentialHasher};
use crate::config::{AppConfig, StoreBackend};
use crate::users::{memory::MemoryUserStore, repo::PgUserStore, repo::UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn UserStore>,
    pub keys: JwtKeys,
    pub hasher: CredentialHasher,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn UserStore> = match config.store {
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL is required for the postgres store")?;
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                migrate(&db).await?;
                info!("using postgres user store");
                Arc::new(PgUserStore::new(db))
            }
            StoreBackend::Memory => {
                warn!("using in-memory user store; accounts are lost on restart");
                Arc::new(MemoryUserStore::new())
            }
        };

        Self::from_parts(config, store)
    }

    pub fn from_parts(config: Arc<AppConfig>, store: Arc<dyn UserStore>) -> anyhow::Result<Self> {
        let keys = JwtKeys::from_config(&config.jwt);
        let hasher = CredentialHasher::new(&config.hashing)?;
        Ok(Self {
            config,
            store,
            keys,
            hasher,
        })
    }

    /// Memory-backed state with cheap hashing, for tests.
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::{HashConfig, JwtConfig};

        let config = Arc::new(AppConfig {
            store: StoreBackend::Memory,
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 60 * 24,
            },
            hashing: HashConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            development: false,
            seed_admin: None,
        });
        Self::from_parts(config, Arc::new(MemoryUserStore::new())).expect("fake state")
    }
}

async fn migrate(db: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run migrations")
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}
