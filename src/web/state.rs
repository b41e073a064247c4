use std::{env, sync::Arc};

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::{ModuleSettings, ReviewBotSettings},
    llm::LlmClient,
};

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    settings: Arc<RwLock<ModuleSettings>>,
    llm: LlmClient,
    trigger_secret: Option<Arc<String>>,
}

impl AppState {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let llm_client = LlmClient::from_env().context("failed to initialize LLM client")?;

        let trigger_secret = match env::var("BOT_TRIGGER_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => Some(Arc::new(secret)),
            _ => {
                warn!("BOT_TRIGGER_SECRET is not set; the review bot trigger is disabled");
                None
            }
        };

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        ModuleSettings::ensure_defaults(&pool)
            .await
            .context("failed to seed default module settings")?;
        let settings = ModuleSettings::load(&pool)
            .await
            .context("failed to load module settings")?;

        Ok(Self {
            pool,
            settings: Arc::new(RwLock::new(settings)),
            llm: llm_client,
            trigger_secret,
        })
    }

    pub async fn ensure_seed_admin(&self) -> Result<()> {
        let has_admin: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE is_admin = TRUE)")
                .fetch_one(&self.pool)
                .await
                .context("failed to verify admin presence")?;

        if !has_admin {
            let password_hash = crate::web::auth::hash_password("change-me")
                .map_err(|err| anyhow!("failed to hash seed admin password: {err}"))?;

            sqlx::query(
                "INSERT INTO users (id, email, display_name, password_hash, origin, is_verified, is_admin) VALUES ($1, $2, $3, $4, 'human', TRUE, TRUE)",
            )
            .bind(Uuid::new_v4())
            .bind("admin@starfall.local")
            .bind("管理员")
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .context("failed to insert seed admin user")?;

            info!(
                "Seeded default admin user 'admin@starfall.local' (password: 'change-me'). Update it promptly."
            );
        }

        Ok(())
    }

    pub fn llm_client(&self) -> LlmClient {
        self.llm.clone()
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub fn trigger_secret(&self) -> Option<&str> {
        self.trigger_secret.as_deref().map(String::as_str)
    }

    pub async fn review_bot_settings(&self) -> Option<ReviewBotSettings> {
        let guard = self.settings.read().await;
        guard.review_bot().cloned()
    }

    pub async fn reload_settings(&self) -> Result<()> {
        let latest = ModuleSettings::load(&self.pool)
            .await
            .context("failed to reload module settings")?;
        let mut guard = self.settings.write().await;
        *guard = latest;
        Ok(())
    }
}
