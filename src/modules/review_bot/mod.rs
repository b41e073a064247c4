use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    extract::{Json as JsonBody, Query, State},
    http::{HeaderMap, StatusCode},
    routing::post,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, info};
use uuid::Uuid;

pub mod generator;
pub mod grounding;
pub mod persona;
pub mod provision;

use crate::{
    config,
    web::{ApiMessage, AppState, auth, json_error, server_error},
};
use generator::generate_review;
use grounding::load_grounding;
use persona::select_persona;
use provision::{build_identity, insert_synthetic_user};

const SECRET_HEADER: &str = "x-bot-secret";
const MIN_BATCH: u32 = 1;
const MAX_BATCH: u32 = 5;
const MIN_CYCLE_DELAY_MS: u64 = 1500;
const MAX_CYCLE_DELAY_MS: u64 = 3500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/bot/generate-reviews", post(trigger_generation))
        .route("/api/admin/review-bot/models", post(save_models))
        .route("/api/admin/review-bot/prompts", post(save_prompts))
}

#[derive(Deserialize)]
struct TriggerParams {
    secret: Option<String>,
    count: Option<u32>,
}

/// Batch outcome reported back to the external scheduler.
#[derive(Serialize)]
struct BatchReport {
    success: bool,
    message: String,
    generated: u32,
    errors: Vec<String>,
    timestamp: DateTime<Utc>,
}

/// Entry point for the external scheduler. Requires the shared trigger
/// secret via header or query parameter; unauthorized calls have no effect.
async fn trigger_generation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TriggerParams>,
) -> Result<Json<BatchReport>, (StatusCode, Json<ApiMessage>)> {
    let Some(expected) = state.trigger_secret() else {
        return Err(json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "评价生成服务未启用。",
        ));
    };

    let header_secret = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    let supplied = header_secret.or(params.secret.as_deref());
    if supplied != Some(expected) {
        return Err(json_error(StatusCode::UNAUTHORIZED, "无效的触发密钥。"));
    }

    let requested = params.count.unwrap_or(MIN_BATCH).clamp(MIN_BATCH, MAX_BATCH);
    let report = run_batch(&state, requested).await;

    Ok(Json(report))
}

/// Run `count` generation cycles strictly in sequence with a randomized
/// inter-cycle delay. One cycle failing never aborts the batch.
async fn run_batch(state: &AppState, count: u32) -> BatchReport {
    let mut outcomes = Vec::with_capacity(count as usize);

    for cycle in 0..count {
        if cycle > 0 {
            let delay_ms = {
                let mut rng = rand::thread_rng();
                rng.gen_range(MIN_CYCLE_DELAY_MS..=MAX_CYCLE_DELAY_MS)
            };
            sleep(std::time::Duration::from_millis(delay_ms)).await;
        }

        let outcome = run_cycle(state).await;
        match &outcome {
            Ok(review_id) => info!(%review_id, cycle, "generated synthetic review"),
            Err(err) => error!(?err, cycle, "review generation cycle failed"),
        }
        outcomes.push(outcome);
    }

    summarize_outcomes(count, outcomes)
}

/// Fold per-cycle outcomes into the scheduler report. The batch succeeds
/// only when every requested cycle stored a review.
fn summarize_outcomes(count: u32, outcomes: Vec<Result<Uuid>>) -> BatchReport {
    let mut generated = 0u32;
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(_) => generated += 1,
            Err(err) => errors.push(format!("{err:#}")),
        }
    }

    let success = errors.is_empty();
    let message = if success {
        format!("成功生成 {generated} 条评价。")
    } else {
        format!("请求 {count} 条，成功生成 {generated} 条。")
    };

    BatchReport {
        success,
        message,
        generated,
        errors,
        timestamp: Utc::now(),
    }
}

/// One generation cycle: grounding → persona → fresh identity → model call →
/// pre-approved insert. Identity and review storage failures are fatal for
/// the cycle and propagate; everything upstream degrades locally.
async fn run_cycle(state: &AppState) -> Result<Uuid> {
    let settings = state
        .review_bot_settings()
        .await
        .ok_or_else(|| anyhow!("review bot settings are not configured"))?;

    let pool = state.pool();
    let grounding = load_grounding(&pool).await;

    let (persona, identity) = {
        let mut rng = rand::thread_rng();
        let persona = select_persona(&mut rng);
        let identity = build_identity(persona, Utc::now(), &mut rng);
        (persona, identity)
    };

    insert_synthetic_user(&pool, &identity).await?;

    let review = generate_review(&state.llm_client(), &settings, persona, &grounding).await;

    let review_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO reviews (id, user_id, content, rating, is_recommended, is_approved)
         VALUES ($1, $2, $3, $4, $5, TRUE)",
    )
    .bind(review_id)
    .bind(identity.id)
    .bind(&review.content)
    .bind(review.rating)
    .bind(review.is_recommended)
    .execute(&pool)
    .await
    .context("failed to insert generated review")?;

    Ok(review_id)
}

#[derive(Deserialize)]
struct ModelsPayload {
    generation_model: String,
}

#[derive(Deserialize)]
struct PromptsPayload {
    system_template: String,
    user_template: String,
}

async fn save_models(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(payload): JsonBody<ModelsPayload>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    auth::require_admin(&state, &jar).await?;

    let model = payload.generation_model.trim();
    if model.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "模型名称不能为空。"));
    }

    let models = config::ReviewBotModels {
        generation_model: model.to_string(),
    };
    config::update_review_bot_models(state.pool_ref(), &models)
        .await
        .map_err(|err| {
            error!(?err, "failed to update review bot models");
            server_error()
        })?;
    state.reload_settings().await.map_err(|err| {
        error!(?err, "failed to reload settings after model update");
        server_error()
    })?;

    Ok(Json(ApiMessage::new("模型设置已更新。")))
}

async fn save_prompts(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(payload): JsonBody<PromptsPayload>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    auth::require_admin(&state, &jar).await?;

    if payload.system_template.trim().is_empty() || payload.user_template.trim().is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "提示词模板不能为空。"));
    }

    let prompts = config::ReviewBotPrompts {
        system_template: payload.system_template,
        user_template: payload.user_template,
    };
    config::update_review_bot_prompts(state.pool_ref(), &prompts)
        .await
        .map_err(|err| {
            error!(?err, "failed to update review bot prompts");
            server_error()
        })?;
    state.reload_settings().await.map_err(|err| {
        error!(?err, "failed to reload settings after prompt update");
        server_error()
    })?;

    Ok(Json(ApiMessage::new("提示词设置已更新。")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_batch_reports_success() {
        let outcomes = vec![Ok(Uuid::new_v4()), Ok(Uuid::new_v4()), Ok(Uuid::new_v4())];
        let report = summarize_outcomes(3, outcomes);
        assert!(report.success);
        assert_eq!(report.generated, 3);
        assert!(report.errors.is_empty());
        assert_eq!(report.message, "成功生成 3 条评价。");
    }

    #[test]
    fn one_failed_cycle_keeps_the_others_counted() {
        let outcomes = vec![
            Ok(Uuid::new_v4()),
            Err(anyhow!("failed to insert synthetic user")),
            Ok(Uuid::new_v4()),
        ];
        let report = summarize_outcomes(3, outcomes);
        assert!(!report.success);
        assert_eq!(report.generated, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("failed to insert synthetic user"));
        assert_eq!(report.message, "请求 3 条，成功生成 2 条。");
    }

    #[test]
    fn empty_batch_reports_zero_generated() {
        let report = summarize_outcomes(0, Vec::new());
        assert!(report.success);
        assert_eq!(report.generated, 0);
        assert_eq!(report.message, "成功生成 0 条评价。");
    }
}
