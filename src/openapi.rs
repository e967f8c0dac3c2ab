use crate::models::{CreatePost, Post, PostEnvelope, SearchEnvelope, Tag, UserPostsEnvelope};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::get_post,
        crate::routes::create_post,
        crate::routes::delete_post,
        crate::routes::user_posts,
        crate::routes::self_posts,
        crate::routes::search_posts,
        crate::routes::like_post,
        crate::routes::unlike_post,
    ),
    components(schemas(
        Post, CreatePost, Tag, PostEnvelope, UserPostsEnvelope, SearchEnvelope
    )),
    tags(
        (name = "posts", description = "Post operations"),
        (name = "likes", description = "Like operations"),
    )
)]
pub struct ApiDoc;
