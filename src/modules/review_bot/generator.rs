use std::time::Duration;

use serde::Deserialize;
use tokio::time::timeout;
use tracing::error;

use super::persona::{Persona, describe};
use crate::{
    config::ReviewBotSettings,
    llm::{ChatMessage, LlmClient, LlmRequest, MessageRole},
};

const CALL_BUDGET: Duration = Duration::from_secs(30);
const MAX_RETRIES: usize = 2;
const TEMPERATURE: f32 = 0.9;
const MAX_TOKENS: u32 = 600;

/// Substituted when the model returns nothing usable. Generation of *a*
/// review never fails because of malformed model output.
pub const FALLBACK_CONTENT: &str =
    "玩了一段时间，画面和玩法都挺对我胃口的，副本设计有新意，推荐大家来试试。";
pub const FALLBACK_RATING: i16 = 5;

const MIN_RATING: i64 = 4;
const MAX_RATING: i64 = 5;

const FEATURE_SUMMARY: &str =
    "开放世界修仙题材手游：实时团队副本、世界首领讨伐、公会战、装备锻造与家园系统，支持跨服排行榜。";

/// Final, policy-applied review content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedReview {
    pub content: String,
    pub rating: i16,
    pub is_recommended: bool,
}

impl GeneratedReview {
    fn fallback() -> Self {
        Self {
            content: FALLBACK_CONTENT.to_string(),
            rating: FALLBACK_RATING,
            is_recommended: true,
        }
    }
}

#[derive(Deserialize)]
struct ReviewPayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(rename = "isRecommended", default)]
    #[allow(dead_code)]
    is_recommended: Option<bool>,
}

/// Compose the chat request and run it with a bounded number of retries.
/// Every failure path degrades to the fixed fallback review.
pub async fn generate_review(
    llm: &LlmClient,
    settings: &ReviewBotSettings,
    persona: &Persona,
    grounding: &str,
) -> GeneratedReview {
    let messages = build_messages(settings, persona, grounding);

    for attempt in 0..=MAX_RETRIES {
        let request = LlmRequest::new(settings.models.generation_model.clone(), messages.clone())
            .with_temperature(TEMPERATURE)
            .with_max_tokens(MAX_TOKENS)
            .expect_json();

        match timeout(CALL_BUDGET, llm.execute(request)).await {
            Ok(Ok(response)) => return parse_review_payload(&response.text),
            Ok(Err(err)) => {
                error!(?err, attempt, "review generation call failed");
            }
            Err(_) => {
                error!(attempt, "review generation call exceeded {:?}", CALL_BUDGET);
            }
        }
    }

    GeneratedReview::fallback()
}

fn build_messages(
    settings: &ReviewBotSettings,
    persona: &Persona,
    grounding: &str,
) -> Vec<ChatMessage> {
    let persona_text = describe(persona);
    let grounding_text = if grounding.trim().is_empty() {
        "（暂无最新动态）"
    } else {
        grounding
    };

    let system = settings
        .prompts
        .system_template
        .replace("{{PERSONA}}", &persona_text)
        .replace("{{FEATURES}}", FEATURE_SUMMARY)
        .replace("{{GROUNDING}}", grounding_text);
    let user = settings
        .prompts
        .user_template
        .replace("{{PERSONA}}", persona.label)
        .replace("{{FEATURES}}", FEATURE_SUMMARY)
        .replace("{{GROUNDING}}", grounding_text);

    vec![
        ChatMessage::new(MessageRole::System, system),
        ChatMessage::new(MessageRole::User, user),
    ]
}

/// Parse the raw model reply and apply the seeding policy: ratings clamp to
/// [4,5] and the recommendation flag is always true. The bot exists to seed
/// enthusiasm; this asymmetry is intentional.
pub fn parse_review_payload(raw: &str) -> GeneratedReview {
    let payload: ReviewPayload = match serde_json::from_str(raw) {
        Ok(payload) => payload,
        Err(err) => {
            error!(?err, "review payload was not valid JSON, using fallback");
            return GeneratedReview::fallback();
        }
    };

    let content = match payload.content {
        Some(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => FALLBACK_CONTENT.to_string(),
    };

    let rating = payload
        .rating
        .map(|value| (value.round() as i64).clamp(MIN_RATING, MAX_RATING) as i16)
        .unwrap_or(FALLBACK_RATING);

    GeneratedReview {
        content,
        rating,
        is_recommended: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReviewBotModels, ReviewBotPrompts, ReviewBotSettings};
    use crate::modules::review_bot::persona::PERSONAS;

    fn settings() -> ReviewBotSettings {
        ReviewBotSettings {
            models: ReviewBotModels::default(),
            prompts: ReviewBotPrompts::default(),
        }
    }

    #[test]
    fn negative_model_output_is_clamped_positive() {
        let review =
            parse_review_payload(r#"{"content":"太肝了，不推荐","rating":1,"isRecommended":false}"#);
        assert_eq!(review.rating, 4);
        assert!(review.is_recommended);
        assert_eq!(review.content, "太肝了，不推荐");
    }

    #[test]
    fn high_ratings_cap_at_five() {
        let review = parse_review_payload(r#"{"content":"神作","rating":9,"isRecommended":true}"#);
        assert_eq!(review.rating, 5);
    }

    #[test]
    fn malformed_json_yields_the_exact_fallback_triple() {
        let review = parse_review_payload("我觉得这游戏很好玩，五星！");
        assert_eq!(
            review,
            GeneratedReview {
                content: FALLBACK_CONTENT.to_string(),
                rating: FALLBACK_RATING,
                is_recommended: true,
            }
        );
    }

    #[test]
    fn empty_content_falls_back_but_keeps_parsed_rating() {
        let review = parse_review_payload(r#"{"content":"  ","rating":4,"isRecommended":true}"#);
        assert_eq!(review.content, FALLBACK_CONTENT);
        assert_eq!(review.rating, 4);
    }

    #[test]
    fn missing_rating_defaults_to_five() {
        let review = parse_review_payload(r#"{"content":"不错"}"#);
        assert_eq!(review.rating, 5);
        assert!(review.is_recommended);
    }

    #[test]
    fn templates_receive_persona_and_grounding() {
        let persona = &PERSONAS[2];
        let messages = build_messages(&settings(), persona, "近期活动：\n- 周年庆典");
        assert_eq!(messages.len(), 2);
        assert!(messages[0].text.contains(persona.label));
        assert!(messages[0].text.contains("周年庆典"));
        assert!(!messages[0].text.contains("{{PERSONA}}"));
        assert!(!messages[0].text.contains("{{GROUNDING}}"));
    }

    #[test]
    fn empty_grounding_renders_placeholder_note() {
        let messages = build_messages(&settings(), &PERSONAS[0], "   ");
        assert!(messages[0].text.contains("暂无最新动态"));
    }
}
