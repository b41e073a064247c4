use axum::{
    Json, Router,
    extract::{Json as JsonBody, Path as AxumPath, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::web::{
    ApiMessage, AppState,
    auth::{self, AuthUser, is_unique_violation},
    json_error, server_error,
};

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 50;
const MAX_PAGE: i64 = 1_000_000;

const REPORT_PENDING: &str = "pending";
const REPORT_RESOLVED: &str = "resolved";
const REPORT_DISMISSED: &str = "dismissed";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/reviews", get(list_reviews).post(create_review))
        .route(
            "/api/reviews/:id",
            get(get_review).put(update_review).delete(delete_review),
        )
        .route("/api/reviews/:id/approve", post(approve_review))
        .route("/api/reviews/:id/hide", post(hide_review))
        .route(
            "/api/reviews/:id/like",
            post(like_review).delete(unlike_review),
        )
        .route("/api/reviews/:id/replies", post(create_reply))
        .route("/api/replies/:id", delete(delete_reply))
        .route("/api/reviews/:id/reports", post(create_report))
        .route("/api/admin/reports", get(list_reports))
        .route("/api/reports/:id/resolve", post(resolve_report))
        .route("/api/reports/:id/dismiss", post(dismiss_report))
}

/// Sort modes accepted by the public review listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReviewSort {
    #[default]
    Newest,
    Oldest,
    HighestRating,
    LowestRating,
    MostLiked,
}

impl ReviewSort {
    fn order_clause(self) -> &'static str {
        match self {
            ReviewSort::Newest => "r.created_at DESC",
            ReviewSort::Oldest => "r.created_at ASC",
            ReviewSort::HighestRating => "r.rating DESC, r.created_at DESC",
            ReviewSort::LowestRating => "r.rating ASC, r.created_at DESC",
            ReviewSort::MostLiked => "like_count DESC, r.created_at DESC",
        }
    }
}

#[derive(Deserialize)]
struct ListParams {
    page: Option<i64>,
    page_size: Option<i64>,
    #[serde(default)]
    sort: ReviewSort,
}

#[derive(sqlx::FromRow)]
struct ReviewListRow {
    id: Uuid,
    user_id: Uuid,
    display_name: String,
    avatar: String,
    play_hours: i32,
    content: String,
    rating: i16,
    is_recommended: bool,
    created_at: DateTime<Utc>,
    like_count: i64,
    reply_count: i64,
    is_liked_by_me: bool,
}

#[derive(Serialize)]
struct ReviewDto {
    id: Uuid,
    author: AuthorDto,
    content: String,
    rating: i16,
    is_recommended: bool,
    created_at: DateTime<Utc>,
    like_count: i64,
    reply_count: i64,
    is_liked_by_me: bool,
}

#[derive(Serialize)]
struct AuthorDto {
    id: Uuid,
    display_name: String,
    avatar: String,
    play_hours: i32,
}

impl From<ReviewListRow> for ReviewDto {
    fn from(row: ReviewListRow) -> Self {
        Self {
            id: row.id,
            author: AuthorDto {
                id: row.user_id,
                display_name: row.display_name,
                avatar: row.avatar,
                play_hours: row.play_hours,
            },
            content: row.content,
            rating: row.rating,
            is_recommended: row.is_recommended,
            created_at: row.created_at,
            like_count: row.like_count,
            reply_count: row.reply_count,
            is_liked_by_me: row.is_liked_by_me,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    total: i64,
    average_rating: f64,
    recommended: i64,
    rating_1: i64,
    rating_2: i64,
    rating_3: i64,
    rating_4: i64,
    rating_5: i64,
}

/// Aggregates over every publicly listable review (approved and not hidden).
/// Stats always mirror exactly what the listing itself can show.
#[derive(Serialize)]
struct ReviewStats {
    total: i64,
    average_rating: f64,
    recommended_percent: f64,
    histogram: [i64; 5],
}

fn build_stats(row: StatsRow) -> ReviewStats {
    let recommended_percent = if row.total > 0 {
        (row.recommended as f64 / row.total as f64 * 1000.0).round() / 10.0
    } else {
        0.0
    };
    ReviewStats {
        total: row.total,
        average_rating: (row.average_rating * 10.0).round() / 10.0,
        recommended_percent,
        histogram: [
            row.rating_1,
            row.rating_2,
            row.rating_3,
            row.rating_4,
            row.rating_5,
        ],
    }
}

#[derive(Serialize)]
struct ReviewListResponse {
    reviews: Vec<ReviewDto>,
    page: i64,
    page_size: i64,
    stats: ReviewStats,
}

async fn list_reviews(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<ListParams>,
) -> Result<Json<ReviewListResponse>, (StatusCode, Json<ApiMessage>)> {
    let (page, page_size, offset) = page_window(params.page, params.page_size);

    let viewer_id = optional_user(&state, &jar).await.map(|user| user.id);

    let pool = state.pool();
    let query = format!(
        "SELECT r.id, r.user_id, u.display_name, u.avatar, u.play_hours, r.content, r.rating, r.is_recommended, r.created_at,
                (SELECT COUNT(*) FROM review_likes l WHERE l.review_id = r.id) AS like_count,
                (SELECT COUNT(*) FROM review_replies p WHERE p.review_id = r.id) AS reply_count,
                EXISTS(SELECT 1 FROM review_likes l WHERE l.review_id = r.id AND l.user_id = $3) AS is_liked_by_me
         FROM reviews r JOIN users u ON u.id = r.user_id
         WHERE r.is_approved = TRUE AND r.is_hidden = FALSE
         ORDER BY {}
         LIMIT $1 OFFSET $2",
        params.sort.order_clause()
    );

    let rows = sqlx::query_as::<_, ReviewListRow>(&query)
        .bind(page_size)
        .bind(offset)
        .bind(viewer_id)
        .fetch_all(&pool)
        .await
        .map_err(|err| {
            error!(?err, "failed to list reviews");
            server_error()
        })?;

    let stats_row = sqlx::query_as::<_, StatsRow>(
        "SELECT COUNT(*) AS total,
                COALESCE(AVG(rating::float8), 0) AS average_rating,
                COUNT(*) FILTER (WHERE is_recommended) AS recommended,
                COUNT(*) FILTER (WHERE rating = 1) AS rating_1,
                COUNT(*) FILTER (WHERE rating = 2) AS rating_2,
                COUNT(*) FILTER (WHERE rating = 3) AS rating_3,
                COUNT(*) FILTER (WHERE rating = 4) AS rating_4,
                COUNT(*) FILTER (WHERE rating = 5) AS rating_5
         FROM reviews WHERE is_approved = TRUE AND is_hidden = FALSE",
    )
    .fetch_one(&pool)
    .await
    .map_err(|err| {
        error!(?err, "failed to aggregate review stats");
        server_error()
    })?;

    Ok(Json(ReviewListResponse {
        reviews: rows.into_iter().map(ReviewDto::from).collect(),
        page,
        page_size,
        stats: build_stats(stats_row),
    }))
}

#[derive(sqlx::FromRow)]
struct ReviewDetailRow {
    id: Uuid,
    user_id: Uuid,
    display_name: String,
    avatar: String,
    play_hours: i32,
    content: String,
    rating: i16,
    is_recommended: bool,
    is_approved: bool,
    is_hidden: bool,
    created_at: DateTime<Utc>,
    like_count: i64,
    reply_count: i64,
    is_liked_by_me: bool,
}

#[derive(sqlx::FromRow)]
struct ReplyRow {
    id: Uuid,
    user_id: Uuid,
    display_name: String,
    avatar: String,
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ReplyDto {
    id: Uuid,
    author_id: Uuid,
    author_name: String,
    author_avatar: String,
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ReviewDetailResponse {
    #[serde(flatten)]
    review: ReviewDto,
    is_approved: bool,
    is_hidden: bool,
    replies: Vec<ReplyDto>,
}

async fn get_review(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(review_id): AxumPath<Uuid>,
) -> Result<Json<ReviewDetailResponse>, (StatusCode, Json<ApiMessage>)> {
    let viewer = optional_user(&state, &jar).await;
    let viewer_id = viewer.as_ref().map(|user| user.id);

    let pool = state.pool();
    let row = sqlx::query_as::<_, ReviewDetailRow>(
        "SELECT r.id, r.user_id, u.display_name, u.avatar, u.play_hours, r.content, r.rating, r.is_recommended, r.is_approved, r.is_hidden, r.created_at,
                (SELECT COUNT(*) FROM review_likes l WHERE l.review_id = r.id) AS like_count,
                (SELECT COUNT(*) FROM review_replies p WHERE p.review_id = r.id) AS reply_count,
                EXISTS(SELECT 1 FROM review_likes l WHERE l.review_id = r.id AND l.user_id = $2) AS is_liked_by_me
         FROM reviews r JOIN users u ON u.id = r.user_id
         WHERE r.id = $1",
    )
    .bind(review_id)
    .bind(viewer_id)
    .fetch_optional(&pool)
    .await
    .map_err(|err| {
        error!(?err, "failed to load review");
        server_error()
    })?
    .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "评价不存在。"))?;

    // Hidden or unapproved reviews stay retrievable for their author and
    // for admins only.
    let publicly_visible = row.is_approved && !row.is_hidden;
    if !publicly_visible {
        let allowed = viewer
            .as_ref()
            .map(|user| user.is_admin || user.id == row.user_id)
            .unwrap_or(false);
        if !allowed {
            return Err(json_error(StatusCode::NOT_FOUND, "评价不存在。"));
        }
    }

    let replies = sqlx::query_as::<_, ReplyRow>(
        "SELECT p.id, p.user_id, u.display_name, u.avatar, p.content, p.created_at
         FROM review_replies p JOIN users u ON u.id = p.user_id
         WHERE p.review_id = $1 ORDER BY p.created_at ASC",
    )
    .bind(review_id)
    .fetch_all(&pool)
    .await
    .map_err(|err| {
        error!(?err, "failed to load review replies");
        server_error()
    })?;

    Ok(Json(ReviewDetailResponse {
        review: ReviewDto {
            id: row.id,
            author: AuthorDto {
                id: row.user_id,
                display_name: row.display_name,
                avatar: row.avatar,
                play_hours: row.play_hours,
            },
            content: row.content,
            rating: row.rating,
            is_recommended: row.is_recommended,
            created_at: row.created_at,
            like_count: row.like_count,
            reply_count: row.reply_count,
            is_liked_by_me: row.is_liked_by_me,
        },
        is_approved: row.is_approved,
        is_hidden: row.is_hidden,
        replies: replies
            .into_iter()
            .map(|reply| ReplyDto {
                id: reply.id,
                author_id: reply.user_id,
                author_name: reply.display_name,
                author_avatar: reply.avatar,
                content: reply.content,
                created_at: reply.created_at,
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
struct ReviewPayload {
    content: String,
    rating: i32,
    #[serde(default = "default_true")]
    is_recommended: bool,
}

fn default_true() -> bool {
    true
}

fn clamp_rating(rating: i32) -> i16 {
    rating.clamp(1, 5) as i16
}

/// Clamps pagination inputs and computes the query offset. The page cap keeps
/// the offset multiplication well inside i64 range.
fn page_window(page: Option<i64>, page_size: Option<i64>) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).clamp(1, MAX_PAGE);
    let page_size = page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    (page, page_size, (page - 1) * page_size)
}

#[derive(Serialize)]
struct CreatedResponse {
    id: Uuid,
    message: String,
}

/// Human-authored reviews enter the moderation queue unapproved. The unique
/// index on `reviews.user_id` is the authoritative one-review-per-user
/// check; a violation maps to the duplicate rejection.
async fn create_review(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(payload): JsonBody<ReviewPayload>,
) -> Result<(StatusCode, Json<CreatedResponse>), (StatusCode, Json<ApiMessage>)> {
    let user = auth::require_user(&state, &jar).await?;

    let content = payload.content.trim().to_string();
    if content.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "评价内容不能为空。"));
    }

    let review_id = Uuid::new_v4();
    let result = sqlx::query(
        "INSERT INTO reviews (id, user_id, content, rating, is_recommended, is_approved)
         VALUES ($1, $2, $3, $4, $5, FALSE)",
    )
    .bind(review_id)
    .bind(user.id)
    .bind(&content)
    .bind(clamp_rating(payload.rating))
    .bind(payload.is_recommended)
    .execute(state.pool_ref())
    .await;

    match result {
        Ok(_) => Ok((
            StatusCode::CREATED,
            Json(CreatedResponse {
                id: review_id,
                message: "评价已提交，等待管理员审核。".to_string(),
            }),
        )),
        Err(err) if is_unique_violation(&err, "reviews_user_id_key") => Err(json_error(
            StatusCode::CONFLICT,
            "你已经发表过评价，请编辑原有评价。",
        )),
        Err(err) => {
            error!(?err, "failed to insert review");
            Err(server_error())
        }
    }
}

async fn update_review(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(review_id): AxumPath<Uuid>,
    JsonBody(payload): JsonBody<ReviewPayload>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::require_user(&state, &jar).await?;

    let content = payload.content.trim().to_string();
    if content.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "评价内容不能为空。"));
    }

    let owner = fetch_review_owner(state.pool_ref(), review_id).await?;
    if owner != user.id {
        return Err(json_error(StatusCode::FORBIDDEN, "只能编辑自己的评价。"));
    }

    sqlx::query(
        "UPDATE reviews SET content = $2, rating = $3, is_recommended = $4, updated_at = NOW() WHERE id = $1",
    )
    .bind(review_id)
    .bind(&content)
    .bind(clamp_rating(payload.rating))
    .bind(payload.is_recommended)
    .execute(state.pool_ref())
    .await
    .map_err(|err| {
        error!(?err, "failed to update review");
        server_error()
    })?;

    Ok(Json(ApiMessage::new("评价已更新。")))
}

async fn delete_review(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(review_id): AxumPath<Uuid>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::require_user(&state, &jar).await?;

    let owner = fetch_review_owner(state.pool_ref(), review_id).await?;
    if owner != user.id && !user.is_admin {
        return Err(json_error(StatusCode::FORBIDDEN, "只能删除自己的评价。"));
    }

    sqlx::query("DELETE FROM reviews WHERE id = $1")
        .bind(review_id)
        .execute(state.pool_ref())
        .await
        .map_err(|err| {
            error!(?err, "failed to delete review");
            server_error()
        })?;

    Ok(Json(ApiMessage::new("评价已删除。")))
}

async fn approve_review(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(review_id): AxumPath<Uuid>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    auth::require_admin(&state, &jar).await?;

    let result = sqlx::query("UPDATE reviews SET is_approved = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(review_id)
        .execute(state.pool_ref())
        .await
        .map_err(|err| {
            error!(?err, "failed to approve review");
            server_error()
        })?;

    if result.rows_affected() == 0 {
        return Err(json_error(StatusCode::NOT_FOUND, "评价不存在。"));
    }

    Ok(Json(ApiMessage::new("评价已通过审核。")))
}

/// Hiding removes the review from public listings and settles any pending
/// reports filed against it, in one transaction.
async fn hide_review(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(review_id): AxumPath<Uuid>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    auth::require_admin(&state, &jar).await?;

    let mut tx = state.pool_ref().begin().await.map_err(|err| {
        error!(?err, "failed to open transaction for hide");
        server_error()
    })?;

    let result = sqlx::query("UPDATE reviews SET is_hidden = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(review_id)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            error!(?err, "failed to hide review");
            server_error()
        })?;

    if result.rows_affected() == 0 {
        return Err(json_error(StatusCode::NOT_FOUND, "评价不存在。"));
    }

    sqlx::query("UPDATE review_reports SET status = $2 WHERE review_id = $1 AND status = $3")
        .bind(review_id)
        .bind(REPORT_RESOLVED)
        .bind(REPORT_PENDING)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            error!(?err, "failed to resolve reports while hiding review");
            server_error()
        })?;

    tx.commit().await.map_err(|err| {
        error!(?err, "failed to commit hide transaction");
        server_error()
    })?;

    Ok(Json(ApiMessage::new("评价已隐藏，相关举报已处理。")))
}

async fn like_review(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(review_id): AxumPath<Uuid>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::require_user(&state, &jar).await?;

    let result = sqlx::query("INSERT INTO review_likes (review_id, user_id) VALUES ($1, $2)")
        .bind(review_id)
        .bind(user.id)
        .execute(state.pool_ref())
        .await;

    match result {
        Ok(_) => Ok(Json(ApiMessage::new("点赞成功。"))),
        Err(err) if is_unique_violation(&err, "review_likes_pkey") => {
            Err(json_error(StatusCode::CONFLICT, "你已经点过赞了。"))
        }
        Err(err) if is_foreign_key_violation(&err) => {
            Err(json_error(StatusCode::NOT_FOUND, "评价不存在。"))
        }
        Err(err) => {
            error!(?err, "failed to like review");
            Err(server_error())
        }
    }
}

async fn unlike_review(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(review_id): AxumPath<Uuid>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::require_user(&state, &jar).await?;

    let result = sqlx::query("DELETE FROM review_likes WHERE review_id = $1 AND user_id = $2")
        .bind(review_id)
        .bind(user.id)
        .execute(state.pool_ref())
        .await
        .map_err(|err| {
            error!(?err, "failed to unlike review");
            server_error()
        })?;

    if result.rows_affected() == 0 {
        return Err(json_error(StatusCode::CONFLICT, "你还没有点过赞。"));
    }

    Ok(Json(ApiMessage::new("已取消点赞。")))
}

#[derive(Deserialize)]
struct ReplyPayload {
    content: String,
}

async fn create_reply(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(review_id): AxumPath<Uuid>,
    JsonBody(payload): JsonBody<ReplyPayload>,
) -> Result<(StatusCode, Json<CreatedResponse>), (StatusCode, Json<ApiMessage>)> {
    let user = auth::require_user(&state, &jar).await?;

    let content = payload.content.trim().to_string();
    if content.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "回复内容不能为空。"));
    }

    let reply_id = Uuid::new_v4();
    let result = sqlx::query(
        "INSERT INTO review_replies (id, review_id, user_id, content) VALUES ($1, $2, $3, $4)",
    )
    .bind(reply_id)
    .bind(review_id)
    .bind(user.id)
    .bind(&content)
    .execute(state.pool_ref())
    .await;

    match result {
        Ok(_) => Ok((
            StatusCode::CREATED,
            Json(CreatedResponse {
                id: reply_id,
                message: "回复成功。".to_string(),
            }),
        )),
        Err(err) if is_foreign_key_violation(&err) => {
            Err(json_error(StatusCode::NOT_FOUND, "评价不存在。"))
        }
        Err(err) => {
            error!(?err, "failed to insert reply");
            Err(server_error())
        }
    }
}

async fn delete_reply(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(reply_id): AxumPath<Uuid>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    let user = auth::require_user(&state, &jar).await?;

    let owner: Option<Uuid> =
        sqlx::query_scalar("SELECT user_id FROM review_replies WHERE id = $1")
            .bind(reply_id)
            .fetch_optional(state.pool_ref())
            .await
            .map_err(|err| {
                error!(?err, "failed to load reply owner");
                server_error()
            })?;

    let owner = owner.ok_or_else(|| json_error(StatusCode::NOT_FOUND, "回复不存在。"))?;
    if owner != user.id && !user.is_admin {
        return Err(json_error(StatusCode::FORBIDDEN, "只能删除自己的回复。"));
    }

    sqlx::query("DELETE FROM review_replies WHERE id = $1")
        .bind(reply_id)
        .execute(state.pool_ref())
        .await
        .map_err(|err| {
            error!(?err, "failed to delete reply");
            server_error()
        })?;

    Ok(Json(ApiMessage::new("回复已删除。")))
}

#[derive(Deserialize)]
struct ReportPayload {
    reason: String,
}

async fn create_report(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(review_id): AxumPath<Uuid>,
    JsonBody(payload): JsonBody<ReportPayload>,
) -> Result<(StatusCode, Json<CreatedResponse>), (StatusCode, Json<ApiMessage>)> {
    let user = auth::require_user(&state, &jar).await?;

    let reason = payload.reason.trim().to_string();
    if reason.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "举报理由不能为空。"));
    }

    let report_id = Uuid::new_v4();
    let result = sqlx::query(
        "INSERT INTO review_reports (id, review_id, reporter_id, reason, status) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(report_id)
    .bind(review_id)
    .bind(user.id)
    .bind(&reason)
    .bind(REPORT_PENDING)
    .execute(state.pool_ref())
    .await;

    match result {
        Ok(_) => Ok((
            StatusCode::CREATED,
            Json(CreatedResponse {
                id: report_id,
                message: "举报已提交，管理员会尽快处理。".to_string(),
            }),
        )),
        Err(err) if is_foreign_key_violation(&err) => {
            Err(json_error(StatusCode::NOT_FOUND, "评价不存在。"))
        }
        Err(err) => {
            error!(?err, "failed to insert report");
            Err(server_error())
        }
    }
}

#[derive(Deserialize)]
struct ReportListParams {
    status: Option<String>,
}

#[derive(sqlx::FromRow, Serialize)]
struct ReportDto {
    id: Uuid,
    review_id: Uuid,
    reporter_id: Uuid,
    reason: String,
    status: String,
    created_at: DateTime<Utc>,
}

async fn list_reports(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<ReportListParams>,
) -> Result<Json<Vec<ReportDto>>, (StatusCode, Json<ApiMessage>)> {
    auth::require_admin(&state, &jar).await?;

    if let Some(ref status) = params.status {
        if ![REPORT_PENDING, REPORT_RESOLVED, REPORT_DISMISSED].contains(&status.as_str()) {
            return Err(json_error(StatusCode::BAD_REQUEST, "无效的举报状态。"));
        }
    }

    let reports = sqlx::query_as::<_, ReportDto>(
        "SELECT id, review_id, reporter_id, reason, status, created_at FROM review_reports
         WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at DESC",
    )
    .bind(params.status)
    .fetch_all(state.pool_ref())
    .await
    .map_err(|err| {
        error!(?err, "failed to list reports");
        server_error()
    })?;

    Ok(Json(reports))
}

/// Resolving a report hides the reported review; both transitions commit
/// together. Only pending reports can transition.
async fn resolve_report(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(report_id): AxumPath<Uuid>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    auth::require_admin(&state, &jar).await?;

    let mut tx = state.pool_ref().begin().await.map_err(|err| {
        error!(?err, "failed to open transaction for report resolution");
        server_error()
    })?;

    let review_id: Option<Uuid> = sqlx::query_scalar(
        "UPDATE review_reports SET status = $2 WHERE id = $1 AND status = $3 RETURNING review_id",
    )
    .bind(report_id)
    .bind(REPORT_RESOLVED)
    .bind(REPORT_PENDING)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|err| {
        error!(?err, "failed to resolve report");
        server_error()
    })?;

    let review_id = review_id
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "举报不存在或已处理。"))?;

    sqlx::query("UPDATE reviews SET is_hidden = TRUE, updated_at = NOW() WHERE id = $1")
        .bind(review_id)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            error!(?err, "failed to hide review during report resolution");
            server_error()
        })?;

    tx.commit().await.map_err(|err| {
        error!(?err, "failed to commit report resolution");
        server_error()
    })?;

    Ok(Json(ApiMessage::new("举报已处理，评价已隐藏。")))
}

async fn dismiss_report(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(report_id): AxumPath<Uuid>,
) -> Result<Json<ApiMessage>, (StatusCode, Json<ApiMessage>)> {
    auth::require_admin(&state, &jar).await?;

    let result = sqlx::query(
        "UPDATE review_reports SET status = $2 WHERE id = $1 AND status = $3",
    )
    .bind(report_id)
    .bind(REPORT_DISMISSED)
    .bind(REPORT_PENDING)
    .execute(state.pool_ref())
    .await
    .map_err(|err| {
        error!(?err, "failed to dismiss report");
        server_error()
    })?;

    if result.rows_affected() == 0 {
        return Err(json_error(StatusCode::NOT_FOUND, "举报不存在或已处理。"));
    }

    Ok(Json(ApiMessage::new("举报已驳回。")))
}

async fn fetch_review_owner(
    pool: &PgPool,
    review_id: Uuid,
) -> Result<Uuid, (StatusCode, Json<ApiMessage>)> {
    let owner: Option<Uuid> = sqlx::query_scalar("SELECT user_id FROM reviews WHERE id = $1")
        .bind(review_id)
        .fetch_optional(pool)
        .await
        .map_err(|err| {
            error!(?err, "failed to load review owner");
            server_error()
        })?;

    owner.ok_or_else(|| json_error(StatusCode::NOT_FOUND, "评价不存在。"))
}

/// Best-effort viewer resolution for public endpoints; anonymous is fine.
async fn optional_user(state: &AppState, jar: &CookieJar) -> Option<AuthUser> {
    auth::require_user(state, jar).await.ok()
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23503"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_modes_map_to_expected_order_clauses() {
        assert_eq!(ReviewSort::Newest.order_clause(), "r.created_at DESC");
        assert_eq!(ReviewSort::Oldest.order_clause(), "r.created_at ASC");
        assert!(ReviewSort::HighestRating.order_clause().starts_with("r.rating DESC"));
        assert!(ReviewSort::LowestRating.order_clause().starts_with("r.rating ASC"));
        assert!(ReviewSort::MostLiked.order_clause().starts_with("like_count DESC"));
    }

    #[test]
    fn sort_parses_from_snake_case() {
        let sort: ReviewSort = serde_json::from_str(r#""most_liked""#).unwrap();
        assert_eq!(sort, ReviewSort::MostLiked);
        let sort: ReviewSort = serde_json::from_str(r#""highest_rating""#).unwrap();
        assert_eq!(sort, ReviewSort::HighestRating);
    }

    #[test]
    fn human_ratings_clamp_into_one_to_five() {
        assert_eq!(clamp_rating(7), 5);
        assert_eq!(clamp_rating(0), 1);
        assert_eq!(clamp_rating(-3), 1);
        assert_eq!(clamp_rating(3), 3);
    }

    #[test]
    fn page_window_caps_absurd_pages_without_overflow() {
        let (page, page_size, offset) = page_window(Some(i64::MAX), Some(50));
        assert_eq!(page, MAX_PAGE);
        assert_eq!(offset, (MAX_PAGE - 1) * page_size);

        let (page, _, offset) = page_window(Some(-4), None);
        assert_eq!(page, 1);
        assert_eq!(offset, 0);

        let (page, page_size, offset) = page_window(Some(3), Some(20));
        assert_eq!((page, page_size, offset), (3, 20, 40));
    }

    #[test]
    fn stats_round_to_one_decimal() {
        let stats = build_stats(StatsRow {
            total: 3,
            average_rating: 4.333333,
            recommended: 2,
            rating_1: 0,
            rating_2: 0,
            rating_3: 1,
            rating_4: 0,
            rating_5: 2,
        });
        assert_eq!(stats.total, 3);
        assert!((stats.average_rating - 4.3).abs() < 1e-9);
        assert!((stats.recommended_percent - 66.7).abs() < 1e-9);
        assert_eq!(stats.histogram, [0, 0, 1, 0, 2]);
    }

    #[test]
    fn empty_stats_avoid_division_by_zero() {
        let stats = build_stats(StatsRow {
            total: 0,
            average_rating: 0.0,
            recommended: 0,
            rating_1: 0,
            rating_2: 0,
            rating_3: 0,
            rating_4: 0,
            rating_5: 0,
        });
        assert_eq!(stats.recommended_percent, 0.0);
        assert_eq!(stats.average_rating, 0.0);
    }
}
