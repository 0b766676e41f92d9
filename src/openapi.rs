use crate::feed::FeedPage;
use crate::models::{Comment, Follow, Group, NewComment, NewGroup, NewPost, NewUser, Post, UpdatePost, User};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::feed_index,
        crate::routes::feed_following,
        crate::routes::group_posts,
        crate::routes::profile,
        crate::routes::list_groups,
        crate::routes::create_group,
        crate::routes::create_post,
        crate::routes::post_detail,
        crate::routes::edit_post,
        crate::routes::delete_post,
        crate::routes::add_comment,
        crate::routes::follow_author,
        crate::routes::unfollow_author,
        crate::routes::register,
        crate::routes::auth_me,
        crate::routes::upload_image,
    ),
    components(schemas(
        User, NewUser, Group, NewGroup, Post, NewPost, UpdatePost,
        Comment, NewComment, Follow, FeedPage,
        crate::routes::GroupFeedResponse, crate::routes::ProfileResponse,
        crate::routes::PostDetailResponse, crate::routes::RegisterResponse,
        crate::routes::MeResponse, crate::routes::ImageUploadResponse
    )),
    tags(
        (name = "feeds", description = "Paginated post listings"),
        (name = "posts", description = "Post authoring"),
        (name = "follows", description = "Author subscriptions"),
    )
)]
pub struct ApiDoc;
