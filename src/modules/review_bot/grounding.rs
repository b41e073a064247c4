use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;
use tokio::time::timeout;
use tracing::error;

const READ_BUDGET: Duration = Duration::from_secs(10);
const RECENT_ANNOUNCEMENTS: i64 = 5;

#[derive(sqlx::FromRow)]
struct AnnouncementRow {
    title: String,
    excerpt: String,
    kind: String,
}

#[derive(sqlx::FromRow)]
struct ContentBlockRow {
    block_key: String,
    payload: Value,
}

/// Pull recent announcements and all content blocks, rendered into a single
/// grounding fragment. Any failure or a blown time budget degrades to an
/// empty fragment; generation then runs on generic content.
pub async fn load_grounding(pool: &PgPool) -> String {
    match timeout(READ_BUDGET, fetch_site_content(pool)).await {
        Ok(Ok(text)) => text,
        Ok(Err(err)) => {
            error!(?err, "failed to read grounding content");
            String::new()
        }
        Err(_) => {
            error!("grounding content read exceeded {:?}", READ_BUDGET);
            String::new()
        }
    }
}

async fn fetch_site_content(pool: &PgPool) -> sqlx::Result<String> {
    let announcements = sqlx::query_as::<_, AnnouncementRow>(
        "SELECT title, excerpt, kind FROM announcements WHERE is_published = TRUE ORDER BY published_at DESC NULLS LAST LIMIT $1",
    )
    .bind(RECENT_ANNOUNCEMENTS)
    .fetch_all(pool)
    .await?;

    let blocks =
        sqlx::query_as::<_, ContentBlockRow>("SELECT block_key, payload FROM content_blocks")
            .fetch_all(pool)
            .await?;

    let mut sections = Vec::new();

    if !announcements.is_empty() {
        let mut lines = vec!["近期公告：".to_string()];
        for row in &announcements {
            lines.push(format!("- [{}] {}：{}", row.kind, row.title, row.excerpt));
        }
        sections.push(lines.join("\n"));
    }

    for row in &blocks {
        if let Some(fragment) = render_block(&row.block_key, &row.payload) {
            sections.push(fragment);
        }
    }

    Ok(sections.join("\n\n"))
}

/// Typed view over the content-block keys the generator consumes. Unrecognized
/// keys map to `Unknown` and render to nothing.
#[derive(Debug)]
enum ContentBlock {
    Events(Vec<EventEntry>),
    Dungeons(Vec<NamedEntry>),
    Bosses(Vec<NamedEntry>),
    Drops(Vec<DropEntry>),
    SponsorTiers(Vec<TierEntry>),
    Leaderboard(Vec<LeaderboardEntry>),
    Unknown,
}

#[derive(Debug, Deserialize)]
struct EventEntry {
    title: String,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DropEntry {
    item: String,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TierEntry {
    name: String,
    #[serde(default)]
    price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeaderboardEntry {
    player: String,
    #[serde(default)]
    score: Option<i64>,
}

fn parse_block(key: &str, payload: &Value) -> ContentBlock {
    if !payload.is_array() {
        return ContentBlock::Unknown;
    }

    fn entries<T: serde::de::DeserializeOwned>(payload: &Value) -> Vec<T> {
        payload
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    match key {
        "events" => ContentBlock::Events(entries(payload)),
        "dungeons" => ContentBlock::Dungeons(entries(payload)),
        "bosses" => ContentBlock::Bosses(entries(payload)),
        "drops" => ContentBlock::Drops(entries(payload)),
        "sponsor_tiers" => ContentBlock::SponsorTiers(entries(payload)),
        "leaderboard" => ContentBlock::Leaderboard(entries(payload)),
        _ => ContentBlock::Unknown,
    }
}

/// Render one block to a short bulleted fragment, or nothing for blocks the
/// generator does not understand.
fn render_block(key: &str, payload: &Value) -> Option<String> {
    let block = parse_block(key, payload);

    let (heading, lines): (&str, Vec<String>) = match block {
        ContentBlock::Events(items) if !items.is_empty() => (
            "近期活动：",
            items
                .iter()
                .map(|e| match &e.date {
                    Some(date) => format!("- {}（{}）", e.title, date),
                    None => format!("- {}", e.title),
                })
                .collect(),
        ),
        ContentBlock::Dungeons(items) if !items.is_empty() => (
            "开放副本：",
            items.iter().map(|e| named_line(e)).collect(),
        ),
        ContentBlock::Bosses(items) if !items.is_empty() => (
            "世界首领：",
            items.iter().map(|e| named_line(e)).collect(),
        ),
        ContentBlock::Drops(items) if !items.is_empty() => (
            "热门掉落：",
            items
                .iter()
                .map(|e| match &e.source {
                    Some(source) => format!("- {}（{}）", e.item, source),
                    None => format!("- {}", e.item),
                })
                .collect(),
        ),
        ContentBlock::SponsorTiers(items) if !items.is_empty() => (
            "赞助档位：",
            items
                .iter()
                .map(|e| match &e.price {
                    Some(price) => format!("- {}：{}", e.name, price),
                    None => format!("- {}", e.name),
                })
                .collect(),
        ),
        ContentBlock::Leaderboard(items) if !items.is_empty() => (
            "排行榜：",
            items
                .iter()
                .map(|e| match e.score {
                    Some(score) => format!("- {}（{} 分）", e.player, score),
                    None => format!("- {}", e.player),
                })
                .collect(),
        ),
        _ => return None,
    };

    let mut fragment = vec![heading.to_string()];
    fragment.extend(lines);
    Some(fragment.join("\n"))
}

fn named_line(entry: &NamedEntry) -> String {
    match &entry.description {
        Some(description) => format!("- {}：{}", entry.name, description),
        None => format!("- {}", entry.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_known_keys_as_bullets() {
        let payload = json!([
            { "title": "周年庆典", "date": "6月1日" },
            { "title": "双倍掉落周" }
        ]);
        let fragment = render_block("events", &payload).expect("events should render");
        assert!(fragment.starts_with("近期活动："));
        assert!(fragment.contains("- 周年庆典（6月1日）"));
        assert!(fragment.contains("- 双倍掉落周"));
    }

    #[test]
    fn skips_unknown_keys_silently() {
        let payload = json!([{ "anything": true }]);
        assert!(render_block("forum_rules", &payload).is_none());
    }

    #[test]
    fn skips_non_array_payloads() {
        let payload = json!({ "name": "不是数组" });
        assert!(render_block("dungeons", &payload).is_none());
    }

    #[test]
    fn malformed_entries_are_dropped_not_fatal() {
        let payload = json!([
            { "name": "熔岩深渊", "description": "60级团本" },
            { "unexpected": 1 }
        ]);
        let fragment = render_block("dungeons", &payload).expect("valid entries should render");
        assert!(fragment.contains("熔岩深渊"));
        assert!(!fragment.contains("unexpected"));
    }

    #[test]
    fn leaderboard_scores_are_optional() {
        let payload = json!([
            { "player": "星河漫步", "score": 9800 },
            { "player": "晚风轻语" }
        ]);
        let fragment = render_block("leaderboard", &payload).unwrap();
        assert!(fragment.contains("星河漫步（9800 分）"));
        assert!(fragment.contains("- 晚风轻语"));
    }
}
