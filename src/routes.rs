use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt as _;
use sha2::{Digest, Sha256};

use crate::auth::{create_jwt, Auth, Role};
use crate::cache::FeedCache;
use crate::error::ApiError;
use crate::feed::{self, FeedKind, FeedPage};
use crate::models::*;
use crate::policy::can_mutate;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;
use crate::storage::{ImageStore, ImageStoreError};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/feed").route(web::get().to(feed_index)))
            .service(web::resource("/feed/following").route(web::get().to(feed_following)))
            .service(
                web::resource("/groups")
                    .route(web::get().to(list_groups))
                    .route(web::post().to(create_group)),
            )
            .service(web::resource("/groups/{slug}/posts").route(web::get().to(group_posts)))
            .service(web::resource("/users/{username}/posts").route(web::get().to(profile)))
            .service(
                web::resource("/users/{username}/follow")
                    .route(web::put().to(follow_author))
                    .route(web::delete().to(unfollow_author)),
            )
            .service(web::resource("/posts").route(web::post().to(create_post)))
            .service(
                web::resource("/posts/{id}")
                    .route(web::get().to(post_detail))
                    .route(web::patch().to(edit_post))
                    .route(web::delete().to(delete_post)),
            )
            .service(web::resource("/posts/{id}/comments").route(web::post().to(add_comment)))
            .service(web::resource("/auth/register").route(web::post().to(register)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/images").route(web::post().to(upload_image))),
    );
    // public fetch route (no /api/v1 prefix so <img src="/images/{hash}"> works)
    cfg.route("/images/{hash}", web::get().to(get_image));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub image_store: Arc<dyn ImageStore>,
    pub feed_cache: FeedCache,
    pub rate: RateLimiterFacade,
}

#[derive(Debug, serde::Deserialize, utoipa::IntoParams)]
pub struct PageQuery {
    /// 1-based page number; out-of-range values clamp to the nearest page.
    pub page: Option<i64>,
}

impl PageQuery {
    fn page(&self) -> i64 {
        self.page.unwrap_or(1)
    }
}

// ---------------- feeds -------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/feed",
    params(PageQuery),
    responses((status = 200, description = "Global feed page", body = FeedPage))
)]
pub async fn feed_index(
    data: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    if let Some(cached) = data.feed_cache.get(query.page().max(1) as usize) {
        return Ok(HttpResponse::Ok().json(cached));
    }
    let page = feed::compose(&*data.repo, FeedKind::All, query.page()).await?;
    // store under the clamped page number so attacker-chosen overshoot
    // values all converge on one entry per real page
    data.feed_cache.put(page.page, page.clone());
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/feed/following",
    params(PageQuery),
    responses(
        (status = 200, description = "Posts by followed authors", body = FeedPage),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn feed_following(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let page = feed::compose(&*data.repo, FeedKind::Following(auth.0.uid), query.page()).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct GroupFeedResponse {
    pub group: Group,
    #[serde(flatten)]
    pub page: FeedPage,
}

#[utoipa::path(
    get,
    path = "/api/v1/groups/{slug}/posts",
    params(("slug" = String, Path, description = "Group slug"), PageQuery),
    responses(
        (status = 200, description = "Group feed page", body = GroupFeedResponse),
        (status = 404, description = "Group not found")
    )
)]
pub async fn group_posts(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let slug = path.into_inner();
    let group = data.repo.get_group_by_slug(&slug).await?;
    let page = feed::compose(&*data.repo, FeedKind::Group(slug), query.page()).await?;
    Ok(HttpResponse::Ok().json(GroupFeedResponse { group, page }))
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ProfileResponse {
    pub author: User,
    pub posts_count: usize,
    /// Whether the caller follows this author; absent for anonymous callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub following: Option<bool>,
    #[serde(flatten)]
    pub page: FeedPage,
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{username}/posts",
    params(("username" = String, Path, description = "Author username"), PageQuery),
    responses(
        (status = 200, description = "Author feed page with profile metadata", body = ProfileResponse),
        (status = 404, description = "User not found")
    )
)]
pub async fn profile(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let username = path.into_inner();
    let author = data.repo.get_user_by_username(&username).await?;
    let posts_count = data.repo.count_posts_by_author(author.id).await?;
    let following = match auth {
        Some(ref a) => Some(data.repo.is_following(a.0.uid, author.id).await?),
        None => None,
    };
    let page = feed::compose(&*data.repo, FeedKind::Author(username), query.page()).await?;
    Ok(HttpResponse::Ok().json(ProfileResponse { author, posts_count, following, page }))
}

// ---------------- groups ------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/groups",
    responses((status = 200, description = "List groups", body = [Group]))
)]
pub async fn list_groups(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let groups = data.repo.list_groups().await?;
    Ok(HttpResponse::Ok().json(groups))
}

#[utoipa::path(
    post,
    path = "/api/v1/groups",
    request_body = NewGroup,
    responses(
        (status = 201, description = "Group created", body = Group),
        (status = 403, description = "Forbidden - groups are created administratively"),
        (status = 409, description = "Slug already taken")
    )
)]
pub async fn create_group(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewGroup>,
) -> Result<HttpResponse, ApiError> {
    if !auth.0.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let group = data.repo.create_group(payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(group))
}

// ---------------- posts -------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/posts",
    request_body = NewPost,
    responses(
        (status = 201, description = "Post created", body = Post),
        (status = 400, description = "Empty text"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Group not found")
    )
)]
pub async fn create_post(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewPost>,
) -> Result<HttpResponse, ApiError> {
    if !data.rate.allow_post(auth.0.uid) {
        return Ok(HttpResponse::TooManyRequests().finish());
    }
    let post = data.repo.create_post(auth.0.uid, payload.into_inner()).await?;
    metrics::increment_counter!("posts_created_total");
    Ok(HttpResponse::Created().json(post))
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct PostDetailResponse {
    pub post: Post,
    pub author: User,
    pub posts_count: usize,
    pub comments: Vec<Comment>,
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post with comments", body = PostDetailResponse),
        (status = 404, description = "Post not found")
    )
)]
pub async fn post_detail(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    let author = data.repo.get_user(post.author_id).await?;
    let posts_count = data.repo.count_posts_by_author(author.id).await?;
    let comments = data.repo.list_comments(post.id).await?;
    Ok(HttpResponse::Ok().json(PostDetailResponse { post, author, posts_count, comments }))
}

#[utoipa::path(
    patch,
    path = "/api/v1/posts/{id}",
    request_body = UpdatePost,
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post updated", body = Post),
        (status = 403, description = "Caller is not the author"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn edit_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdatePost>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    if !can_mutate(auth.0.uid, &post) {
        return Err(ApiError::Forbidden);
    }
    let updated = data.repo.update_post(post.id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    delete,
    path = "/api/v1/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 204, description = "Post deleted"),
        (status = 403, description = "Caller is not the author"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn delete_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(path.into_inner()).await?;
    // same authorship rule as edit
    if !can_mutate(auth.0.uid, &post) {
        return Err(ApiError::Forbidden);
    }
    data.repo.delete_post(post.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- comments ----------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/posts/{id}/comments",
    request_body = NewComment,
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 400, description = "Empty text"),
        (status = 404, description = "Post not found")
    )
)]
pub async fn add_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewComment>,
) -> Result<HttpResponse, ApiError> {
    if !data.rate.allow_comment(auth.0.uid) {
        return Ok(HttpResponse::TooManyRequests().finish());
    }
    let comment = data
        .repo
        .create_comment(path.into_inner(), auth.0.uid, payload.into_inner())
        .await?;
    metrics::increment_counter!("comments_created_total");
    Ok(HttpResponse::Created().json(comment))
}

// ---------------- follows -----------------------------------------------

#[utoipa::path(
    put,
    path = "/api/v1/users/{username}/follow",
    params(("username" = String, Path, description = "Author username")),
    responses(
        (status = 204, description = "Following (idempotent)"),
        (status = 400, description = "Self-follow"),
        (status = 404, description = "User not found")
    )
)]
pub async fn follow_author(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let target = data.repo.get_user_by_username(&path.into_inner()).await?;
    if !data.rate.allow_follow(auth.0.uid) {
        return Ok(HttpResponse::TooManyRequests().finish());
    }
    data.repo.follow(auth.0.uid, target.id).await?;
    metrics::increment_counter!("follows_total");
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{username}/follow",
    params(("username" = String, Path, description = "Author username")),
    responses(
        (status = 204, description = "Not following (idempotent)"),
        (status = 404, description = "User not found")
    )
)]
pub async fn unfollow_author(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let target = data.repo.get_user_by_username(&path.into_inner()).await?;
    data.repo.unfollow(auth.0.uid, target.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- auth --------------------------------------------------

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct RegisterResponse {
    pub user: User,
    pub token: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = NewUser,
    responses(
        (status = 201, description = "User registered", body = RegisterResponse),
        (status = 409, description = "Username taken")
    )
)]
pub async fn register(
    data: web::Data<AppState>,
    payload: web::Json<NewUser>,
) -> Result<HttpResponse, ApiError> {
    let user = data.repo.create_user(payload.into_inner()).await?;

    // bootstrap admins by username (comma separated env list)
    let admins = std::env::var("ZINE_ADMIN_USERNAMES").unwrap_or_default();
    let mut roles = vec![Role::User];
    if admins.split(',').any(|s| !s.trim().is_empty() && s.trim() == user.username) {
        roles.push(Role::Admin);
    }

    let token = create_jwt(user.id, &user.username, roles).map_err(|_| ApiError::Internal)?;
    Ok(HttpResponse::Created().json(RegisterResponse { user, token }))
}

#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct MeResponse {
    pub id: Id,
    pub username: String,
    pub roles: Vec<Role>,
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current user info", body = MeResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth) -> Result<HttpResponse, ApiError> {
    let me = MeResponse {
        id: auth.0.uid,
        username: auth.0.sub.clone(),
        roles: auth.0.roles,
    };
    Ok(HttpResponse::Ok().json(me))
}

// ---------------- images ------------------------------------------------

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ImageUploadResponse {
    pub hash: String,
    pub mime: String,
    pub size: usize,
    pub duplicate: bool, // true when upload was a duplicate (idempotent)
}

const IMAGE_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

#[utoipa::path(
    post,
    path = "/api/v1/images",
    responses(
        (status = 201, description = "Image stored (new)", body = ImageUploadResponse),
        (status = 200, description = "Image already existed (idempotent)", body = ImageUploadResponse),
        (status = 415, description = "Unsupported media type"),
        (status = 413, description = "Payload too large")
    )
)]
pub async fn upload_image(
    _auth: Auth,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    use actix_web::http::StatusCode;
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        if field.content_disposition().get_name() != Some("file") {
            continue;
        }
        let mut field_stream = field;
        let mut hasher = Sha256::new();
        while let Some(chunk) = field_stream.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > IMAGE_SIZE_LIMIT {
                return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish());
            }
            hasher.update(&chunk);
            bytes.extend_from_slice(&chunk);
        }
        let hash = format!("{:x}", hasher.finalize());
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        if !ALLOWED_MIME.contains(&mime.as_str()) {
            return Ok(HttpResponse::UnsupportedMediaType().finish());
        }
        let (status_code, duplicate_flag) = match data.image_store.save(&hash, &mime, &bytes).await {
            Ok(()) => (StatusCode::CREATED, false),
            Err(ImageStoreError::Duplicate) => (StatusCode::OK, true),
            Err(e) => {
                log::error!("image_store save error: {e}");
                return Err(ApiError::Internal);
            }
        };
        let resp = ImageUploadResponse { hash, mime, size: bytes.len(), duplicate: duplicate_flag };
        return Ok(HttpResponse::build(status_code).json(resp));
    }
    Ok(HttpResponse::BadRequest().finish())
}

/// Serve a stored attachment by hash.
pub async fn get_image(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let hash = path.into_inner();
    // hashes are ASCII hex; anything else can never name a stored object
    if hash.len() < 2 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ApiError::NotFound);
    }
    match data.image_store.load(&hash).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok()
            .insert_header(("Content-Type", mime))
            .body(bytes)),
        Err(ImageStoreError::NotFound) => Err(ApiError::NotFound),
        Err(e) => {
            log::error!("image_store load error: {e}");
            Err(ApiError::Internal)
        }
    }
}
