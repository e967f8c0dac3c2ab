use actix_web::{http::header, web, HttpRequest, HttpResponse};

use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::*;
use crate::service::PostService;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v0")
            // body binding failures are input errors like any other validation failure
            .app_data(web::JsonConfig::default().error_handler(|e, _| ApiError::Unprocessable(e.to_string()).into()))
            .service(
                web::scope("/posts")
                    .service(
                        web::resource(["", "/"])
                            .route(web::post().to(create_post)),
                    )
                    // literal segments before the `{id}` matchers
                    .service(web::resource("/user/self/{page}").route(web::get().to(self_posts)))
                    .service(web::resource("/user/{id}/{page}").route(web::get().to(user_posts)))
                    .service(web::resource("/search/{page}").route(web::get().to(search_posts)))
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(get_post))
                            .route(web::delete().to(delete_post)),
                    ),
            )
            .service(
                web::resource("/likes/{id}")
                    .route(web::post().to(like_post))
                    .route(web::delete().to(unlike_post)),
            ),
    );
}

#[derive(Clone)]
pub struct AppState { pub posts: PostService }

const PUBLIC_MAX_AGE: u32 = 18000;
const OWN_MAX_AGE: u32 = 300;

/// Unparseable path ids are reported as a missing resource.
fn path_id(raw: &str) -> Result<Id, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound)
}

#[utoipa::path(
    get,
    path = "/v0/posts/{id}",
    params(("id" = i64, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post with viewer ownership flag", body = PostEnvelope),
        (status = 404, description = "Post not found")
    )
)]
pub async fn get_post(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let post_id = path_id(&path)?;
    let post = data.posts.get_post(post_id, auth.0.user_id).await?;
    Ok(HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, format!("public, max-age={PUBLIC_MAX_AGE}")))
        .json(PostEnvelope { own: post.own, post }))
}

#[utoipa::path(
    post,
    path = "/v0/posts",
    request_body = CreatePost,
    responses(
        (status = 201, description = "Post created", body = Post),
        (status = 404, description = "Repost source not found"),
        (status = 422, description = "Invalid post")
    )
)]
pub async fn create_post(auth: Auth, data: web::Data<AppState>, payload: web::Json<CreatePost>) -> Result<HttpResponse, ApiError> {
    let post = data.posts.create_post(auth.0.user_id, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(post))
}

#[utoipa::path(
    delete,
    path = "/v0/posts/{id}",
    params(("id" = i64, Path, description = "Post id")),
    responses(
        (status = 204, description = "Post deleted"),
        (status = 404, description = "Post not found or not owned by caller")
    )
)]
pub async fn delete_post(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let post_id = path_id(&path)?;
    data.posts.delete_post(post_id, auth.0.user_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn list_user_posts(auth: Auth, data: &AppState, user_id: Option<Id>, page: &str) -> Result<HttpResponse, ApiError> {
    let page: i64 = page.parse().map_err(|_| ApiError::NotFound)?;
    let viewer = auth.0.user_id;
    let user_id = user_id.unwrap_or(viewer);
    let posts = data.posts.user_posts(user_id, page, viewer).await?;
    let own = user_id == viewer;
    let max_age = if own { OWN_MAX_AGE } else { PUBLIC_MAX_AGE };
    Ok(HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, format!("public, max-age={max_age}")))
        .json(UserPostsEnvelope { own, posts }))
}

#[utoipa::path(
    get,
    path = "/v0/posts/user/{id}/{page}",
    params(("id" = i64, Path, description = "Author id"), ("page" = i64, Path, description = "Zero-based page")),
    responses((status = 200, description = "Posts by author, newest first", body = UserPostsEnvelope))
)]
pub async fn user_posts(auth: Auth, data: web::Data<AppState>, path: web::Path<(String, String)>) -> Result<HttpResponse, ApiError> {
    let (id, page) = path.into_inner();
    list_user_posts(auth, &data, Some(path_id(&id)?), &page).await
}

#[utoipa::path(
    get,
    path = "/v0/posts/user/self/{page}",
    params(("page" = i64, Path, description = "Zero-based page")),
    responses((status = 200, description = "Caller's own posts, newest first", body = UserPostsEnvelope))
)]
pub async fn self_posts(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    list_user_posts(auth, &data, None, &path).await
}

/// Repeated `tag` and `keyword` query parameters.
fn search_terms(req: &HttpRequest) -> (Vec<String>, Vec<String>) {
    let pairs: Vec<(String, String)> = web::Query::<Vec<(String, String)>>::from_query(req.query_string())
        .map(|q| q.into_inner())
        .unwrap_or_default();
    let mut tags = Vec::new();
    let mut keywords = Vec::new();
    for (k, v) in pairs {
        match k.as_str() {
            "tag" => tags.push(v),
            "keyword" => keywords.push(v),
            _ => {}
        }
    }
    (tags, keywords)
}

#[utoipa::path(
    get,
    path = "/v0/posts/search/{page}",
    params(
        ("page" = i64, Path, description = "Zero-based page"),
        ("tag" = Option<Vec<String>>, Query, description = "Match posts carrying any of these tags"),
        ("keyword" = Option<Vec<String>>, Query, description = "Every keyword must appear in the text")
    ),
    responses((status = 200, description = "Matching posts, newest first", body = SearchEnvelope))
)]
pub async fn search_posts(req: HttpRequest, auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let page: i64 = path.parse().map_err(|_| ApiError::NotFound)?;
    let (tags, keywords) = search_terms(&req);
    let posts = data.posts.search(&tags, &keywords, page, auth.0.user_id).await?;
    Ok(HttpResponse::Ok().json(SearchEnvelope { posts }))
}

#[utoipa::path(
    post,
    path = "/v0/likes/{id}",
    params(("id" = i64, Path, description = "Post id")),
    responses(
        (status = 201, description = "Liked"),
        (status = 404, description = "Post not found"),
        (status = 409, description = "Already liked")
    )
)]
pub async fn like_post(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let post_id = path_id(&path)?;
    data.posts.like(auth.0.user_id, post_id).await?;
    Ok(HttpResponse::Created().finish())
}

#[utoipa::path(
    delete,
    path = "/v0/likes/{id}",
    params(("id" = i64, Path, description = "Post id")),
    responses(
        (status = 204, description = "Like removed"),
        (status = 404, description = "Post not found"),
        (status = 409, description = "Not liked")
    )
)]
pub async fn unlike_post(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let post_id = path_id(&path)?;
    data.posts.unlike(auth.0.user_id, post_id).await?;
    Ok(HttpResponse::NoContent().finish())
}
