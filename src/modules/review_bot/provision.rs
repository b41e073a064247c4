use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::PgPool;
use uuid::Uuid;

use super::persona::{Persona, simulated_play_hours};
use crate::web::auth::SYNTHETIC_PASSWORD_SENTINEL;

/// Reserved domain for bot accounts. Nothing routes here; the explicit
/// `origin` column is the authoritative marker, the domain is just hygiene.
const SYNTHETIC_EMAIL_DOMAIN: &str = "players.starfall.local";

const NAME_POOL: &[&str] = &[
    "星河漫步", "夜雨听风", "辰曦", "南风知意", "墨染流年", "清酒暖茶",
    "追光少年", "山月不知", "沉舟侧畔", "雾里看花", "孤城浪子", "晚风轻语",
    "洛水天依", "白鹿衔枝", "竹间听雪", "青灯古卷",
];

const AVATAR_POOL: &[&str] = &["🎮", "⚔️", "🐉", "🌙", "🔥", "🌸", "🛡️", "✨", "🐱", "🍀"];

/// A fully specified synthetic user, ready to insert.
#[derive(Debug, Clone)]
pub struct SyntheticIdentity {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub avatar: String,
    pub play_hours: i32,
}

/// Build a brand-new identity for one generated review. Pure apart from the
/// caller-supplied timestamp and random source, so uniqueness is testable.
pub fn build_identity<R: Rng + ?Sized>(
    persona: &Persona,
    now: DateTime<Utc>,
    rng: &mut R,
) -> SyntheticIdentity {
    let base_name = NAME_POOL[rng.gen_range(0..NAME_POOL.len())];
    let display_name = format!("{}{}", base_name, rng.gen_range(0..10000u32));
    let avatar = AVATAR_POOL[rng.gen_range(0..AVATAR_POOL.len())].to_string();

    // Timestamp plus 64 random bits keeps emails collision-free without a
    // uniqueness retry loop, even inside one microsecond.
    let email = format!(
        "ai_{}_{:016x}@{}",
        now.timestamp_micros(),
        rng.gen_range(0..u64::MAX),
        SYNTHETIC_EMAIL_DOMAIN
    );

    SyntheticIdentity {
        id: Uuid::new_v4(),
        email,
        display_name,
        avatar,
        play_hours: simulated_play_hours(persona, rng),
    }
}

/// Insert the identity as a pre-verified, login-disabled user row. Storage
/// failure here is fatal for the generation cycle and propagates.
pub async fn insert_synthetic_user(pool: &PgPool, identity: &SyntheticIdentity) -> Result<()> {
    sqlx::query(
        "INSERT INTO users (id, email, display_name, avatar, password_hash, origin, play_hours, is_verified)
         VALUES ($1, $2, $3, $4, $5, 'synthetic', $6, TRUE)",
    )
    .bind(identity.id)
    .bind(&identity.email)
    .bind(&identity.display_name)
    .bind(&identity.avatar)
    .bind(SYNTHETIC_PASSWORD_SENTINEL)
    .bind(identity.play_hours)
    .execute(pool)
    .await
    .context("failed to insert synthetic user")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::review_bot::persona::PERSONAS;
    use rand::{SeedableRng, rngs::StdRng};
    use std::collections::HashSet;

    #[test]
    fn emails_are_unique_in_a_tight_loop() {
        let mut rng = StdRng::seed_from_u64(1);
        let now = Utc::now();
        let persona = &PERSONAS[0];

        let mut emails = HashSet::new();
        for _ in 0..100 {
            let identity = build_identity(persona, now, &mut rng);
            assert!(
                emails.insert(identity.email.clone()),
                "duplicate email generated: {}",
                identity.email
            );
        }
    }

    #[test]
    fn identity_lands_in_the_reserved_domain() {
        let mut rng = StdRng::seed_from_u64(2);
        let identity = build_identity(&PERSONAS[3], Utc::now(), &mut rng);
        assert!(identity.email.ends_with("@players.starfall.local"));
        assert!(identity.email.starts_with("ai_"));
    }

    #[test]
    fn display_name_carries_a_numeric_suffix() {
        let mut rng = StdRng::seed_from_u64(3);
        let identity = build_identity(&PERSONAS[1], Utc::now(), &mut rng);
        let suffix: String = identity
            .display_name
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        assert!(!suffix.is_empty());
        let value: u32 = suffix.chars().rev().collect::<String>().parse().unwrap();
        assert!(value < 10000);
    }

    #[test]
    fn play_hours_respect_the_persona_range() {
        let mut rng = StdRng::seed_from_u64(4);
        for persona in PERSONAS {
            let identity = build_identity(persona, Utc::now(), &mut rng);
            assert!(identity.play_hours >= persona.min_hours);
            assert!(identity.play_hours <= persona.max_hours);
        }
    }
}
