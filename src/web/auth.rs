use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{
    Json,
    extract::{Json as JsonBody, State},
    http::StatusCode,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration as ChronoDuration, Utc};
use cookie::time::Duration as CookieDuration;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::web::{ApiMessage, AppState, json_error, server_error};

pub const SESSION_COOKIE: &str = "auth_token";
pub const SESSION_TTL_DAYS: i64 = 7;

/// Sentinel stored as the credential of synthetic accounts. It is not a valid
/// PHC string, so argon2 verification can never accept it.
pub const SYNTHETIC_PASSWORD_SENTINEL: &str = "*synthetic-account-no-login*";

#[derive(Clone, sqlx::FromRow)]
pub struct AuthUser {
    pub id: Uuid,
    pub display_name: String,
    pub is_admin: bool,
    pub is_banned: bool,
}

#[derive(Clone, sqlx::FromRow)]
struct DbUserAuth {
    id: Uuid,
    display_name: String,
    password_hash: String,
    is_banned: bool,
}

#[derive(Deserialize)]
pub struct RegisterPayload {
    pub email: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub display_name: String,
}

pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterPayload>,
) -> Result<(StatusCode, Json<ApiMessage>), (StatusCode, Json<ApiMessage>)> {
    let email = payload.email.trim().to_lowercase();
    let display_name = payload.display_name.trim().to_string();

    if email.is_empty() || !email.contains('@') {
        return Err(json_error(StatusCode::BAD_REQUEST, "邮箱格式不正确。"));
    }
    if display_name.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "昵称不能为空。"));
    }
    if payload.password.chars().count() < 8 {
        return Err(json_error(StatusCode::BAD_REQUEST, "密码至少需要 8 位。"));
    }

    let password_hash = hash_password(&payload.password).map_err(|err| {
        error!(?err, "failed to hash password during registration");
        server_error()
    })?;

    let result = sqlx::query(
        "INSERT INTO users (id, email, display_name, password_hash, origin) VALUES ($1, $2, $3, $4, 'human')",
    )
    .bind(Uuid::new_v4())
    .bind(&email)
    .bind(&display_name)
    .bind(&password_hash)
    .execute(state.pool_ref())
    .await;

    match result {
        Ok(_) => Ok((
            StatusCode::CREATED,
            Json(ApiMessage::new("注册成功，请登录。")),
        )),
        Err(err) if is_unique_violation(&err, "users_email_key") => {
            Err(json_error(StatusCode::CONFLICT, "该邮箱已被注册。"))
        }
        Err(err) => {
            error!(?err, "failed to insert user during registration");
            Err(server_error())
        }
    }
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(payload): JsonBody<LoginPayload>,
) -> Result<(CookieJar, Json<LoginResponse>), (StatusCode, Json<ApiMessage>)> {
    let email = payload.email.trim().to_lowercase();
    let pool = state.pool();

    let user = match fetch_user_by_email(&pool, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(invalid_credentials()),
        Err(err) => {
            error!(?err, "failed to fetch user during login");
            return Err(server_error());
        }
    };

    // The synthetic sentinel is not a parseable hash, so bot accounts fall
    // through to the credential rejection here.
    if !verify_password(&payload.password, &user.password_hash) {
        return Err(invalid_credentials());
    }

    if user.is_banned {
        return Err(json_error(StatusCode::FORBIDDEN, "该账号已被封禁。"));
    }

    let session_token = Uuid::new_v4();
    let expires_at = Utc::now() + ChronoDuration::days(SESSION_TTL_DAYS);

    if let Err(err) =
        sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_token)
            .bind(user.id)
            .bind(expires_at)
            .execute(state.pool_ref())
            .await
    {
        error!(?err, "failed to create session");
        return Err(server_error());
    }

    let mut cookie = Cookie::new(SESSION_COOKIE, session_token.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(CookieDuration::days(SESSION_TTL_DAYS));

    let jar = jar.add(cookie);
    Ok((
        jar,
        Json(LoginResponse {
            user_id: user.id,
            display_name: user.display_name,
        }),
    ))
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Json<ApiMessage>) {
    let mut jar = jar;

    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Ok(token) = Uuid::parse_str(cookie.value()) {
            if let Err(err) = sqlx::query("DELETE FROM sessions WHERE id = $1")
                .bind(token)
                .execute(state.pool_ref())
                .await
            {
                error!(?err, "failed to remove session during logout");
            }
        }
    }

    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.set_http_only(true);
    removal.set_same_site(SameSite::Lax);
    removal.set_max_age(CookieDuration::seconds(0));
    jar = jar.remove(removal);

    (jar, Json(ApiMessage::new("已退出登录。")))
}

/// Resolve the session cookie to a user, rejecting anonymous or banned callers.
pub async fn require_user(
    state: &AppState,
    jar: &CookieJar,
) -> Result<AuthUser, (StatusCode, Json<ApiMessage>)> {
    let token_cookie = jar
        .get(SESSION_COOKIE)
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "请先登录。"))?;
    let token = Uuid::parse_str(token_cookie.value())
        .map_err(|_| json_error(StatusCode::UNAUTHORIZED, "登录状态无效，请重新登录。"))?;

    let user = fetch_user_by_session(state.pool_ref(), token)
        .await
        .map_err(|err| {
            error!(?err, "failed to validate session");
            server_error()
        })?
        .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "登录已过期，请重新登录。"))?;

    if user.is_banned {
        return Err(json_error(StatusCode::FORBIDDEN, "该账号已被封禁。"));
    }

    Ok(user)
}

pub async fn require_admin(
    state: &AppState,
    jar: &CookieJar,
) -> Result<AuthUser, (StatusCode, Json<ApiMessage>)> {
    let user = require_user(state, jar).await?;
    if !user.is_admin {
        return Err(json_error(StatusCode::FORBIDDEN, "该操作需要管理员权限。"));
    }
    Ok(user)
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

async fn fetch_user_by_email(pool: &PgPool, email: &str) -> sqlx::Result<Option<DbUserAuth>> {
    sqlx::query_as::<_, DbUserAuth>(
        "SELECT id, display_name, password_hash, is_banned FROM users WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await
}

async fn fetch_user_by_session(pool: &PgPool, token: Uuid) -> sqlx::Result<Option<AuthUser>> {
    sqlx::query_as::<_, AuthUser>(
        "SELECT users.id, users.display_name, users.is_admin, users.is_banned FROM sessions JOIN users ON users.id = sessions.user_id WHERE sessions.id = $1 AND sessions.expires_at > NOW()",
    )
    .bind(token)
    .fetch_optional(pool)
    .await
}

/// True when the error is a Postgres unique violation on the named constraint.
pub fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505")
                && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

fn invalid_credentials() -> (StatusCode, Json<ApiMessage>) {
    json_error(StatusCode::UNAUTHORIZED, "邮箱或密码错误。")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_sentinel_never_verifies() {
        assert!(!verify_password("", SYNTHETIC_PASSWORD_SENTINEL));
        assert!(!verify_password("password123", SYNTHETIC_PASSWORD_SENTINEL));
        assert!(!verify_password(
            SYNTHETIC_PASSWORD_SENTINEL,
            SYNTHETIC_PASSWORD_SENTINEL
        ));
    }

    #[test]
    fn real_hash_round_trips() {
        let hash = hash_password("correct horse").expect("hashing should succeed");
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }
}
