use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

const MODULE_REVIEW_BOT: &str = "review_bot";

#[derive(Clone, Debug, Default)]
pub struct ModuleSettings {
    review_bot: Option<ReviewBotSettings>,
}

impl ModuleSettings {
    pub async fn ensure_defaults(pool: &PgPool) -> Result<()> {
        let bot_models = serde_json::to_value(default_review_bot_models())?;
        let bot_prompts = serde_json::to_value(default_review_bot_prompts())?;

        sqlx::query(
            "INSERT INTO module_configs (module_name, models, prompts) VALUES ($1, $2, $3)
             ON CONFLICT (module_name) DO NOTHING",
        )
        .bind(MODULE_REVIEW_BOT)
        .bind(&bot_models)
        .bind(&bot_prompts)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn load(pool: &PgPool) -> Result<Self> {
        let rows = sqlx::query_as::<_, ModuleConfigRow>(
            "SELECT module_name, models, prompts FROM module_configs",
        )
        .fetch_all(pool)
        .await
        .context("failed to load module configurations from database")?;

        let mut settings = ModuleSettings::default();
        for row in rows {
            match row.module_name.as_str() {
                MODULE_REVIEW_BOT => {
                    settings.review_bot = Some(parse_review_bot_settings(row.models, row.prompts)?);
                }
                other => {
                    return Err(anyhow!("unknown module configuration found: {}", other));
                }
            }
        }

        Ok(settings)
    }

    pub fn review_bot(&self) -> Option<&ReviewBotSettings> {
        self.review_bot.as_ref()
    }
}

#[derive(Clone, Debug)]
pub struct ReviewBotSettings {
    pub models: ReviewBotModels,
    pub prompts: ReviewBotPrompts,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewBotModels {
    pub generation_model: String,
}

impl Default for ReviewBotModels {
    fn default() -> Self {
        default_review_bot_models()
    }
}

/// Prompt templates for the review bot. `{{PERSONA}}`, `{{FEATURES}}` and
/// `{{GROUNDING}}` are substituted at generation time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewBotPrompts {
    pub system_template: String,
    pub user_template: String,
}

impl Default for ReviewBotPrompts {
    fn default() -> Self {
        default_review_bot_prompts()
    }
}

#[derive(sqlx::FromRow)]
struct ModuleConfigRow {
    module_name: String,
    models: Value,
    prompts: Value,
}

fn parse_review_bot_settings(models: Value, prompts: Value) -> Result<ReviewBotSettings> {
    let models: ReviewBotModels = serde_json::from_value(models)
        .map_err(|err| anyhow!("failed to parse review bot models: {err}"))?;
    let prompts: ReviewBotPrompts = serde_json::from_value(prompts)
        .map_err(|err| anyhow!("failed to parse review bot prompts: {err}"))?;
    Ok(ReviewBotSettings { models, prompts })
}

fn default_review_bot_models() -> ReviewBotModels {
    ReviewBotModels {
        generation_model: "openai/gpt-4o-mini".to_string(),
    }
}

fn default_review_bot_prompts() -> ReviewBotPrompts {
    ReviewBotPrompts {
        system_template: "你是《星陨幻想》的一名真实玩家，将以玩家身份撰写一条游戏评价。\n你的玩家画像：{{PERSONA}}\n游戏特色：{{FEATURES}}\n以下是近期游戏动态，可以在评价中自然地提及其中一两点：\n{{GROUNDING}}\n写作要求：口语化、有个人色彩，长度在 60 到 200 字之间，不要出现\"作为AI\"之类的表述，不要使用 Markdown。\n输出必须是一个 JSON 对象，且只包含以下三个字段：\n{\"content\": \"评价正文（字符串）\", \"rating\": 评分（1-5 的整数）, \"isRecommended\": 是否推荐（布尔值）}".to_string(),
        user_template: "请以\"{{PERSONA}}\"的身份和语气，写下你对《星陨幻想》的评价，并按要求返回 JSON。".to_string(),
    }
}

pub async fn update_review_bot_models(pool: &PgPool, models: &ReviewBotModels) -> Result<()> {
    update_models(pool, MODULE_REVIEW_BOT, models).await
}

pub async fn update_review_bot_prompts(pool: &PgPool, prompts: &ReviewBotPrompts) -> Result<()> {
    update_prompts(pool, MODULE_REVIEW_BOT, prompts).await
}

async fn update_models<T: Serialize>(pool: &PgPool, module: &str, models: &T) -> Result<()> {
    let payload = serde_json::to_value(models)
        .map_err(|err| anyhow!("failed to serialize models payload: {err}"))?;
    let result = sqlx::query(
        "UPDATE module_configs SET models = $2, updated_at = NOW() WHERE module_name = $1",
    )
    .bind(module)
    .bind(payload)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("module configuration not found for {module}"));
    }
    Ok(())
}

async fn update_prompts<T: Serialize>(pool: &PgPool, module: &str, prompts: &T) -> Result<()> {
    let payload = serde_json::to_value(prompts)
        .map_err(|err| anyhow!("failed to serialize prompts payload: {err}"))?;
    let result = sqlx::query(
        "UPDATE module_configs SET prompts = $2, updated_at = NOW() WHERE module_name = $1",
    )
    .bind(module)
    .bind(payload)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("module configuration not found for {module}"));
    }
    Ok(())
}
