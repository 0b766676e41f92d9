use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Id, Post};
use crate::repo::{PostFilter, Repo, RepoResult};

/// Posts per feed page. Matches the product's fixed listing limit.
pub const PAGE_SIZE: usize = 10;

/// The four feed views. Slugs/usernames are resolved during composition
/// and yield NotFound when they do not name an existing entity.
#[derive(Debug, Clone)]
pub enum FeedKind {
    All,
    Group(String),
    Author(String),
    Following(Id),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    pub total: usize,
    pub page: usize,
    pub num_pages: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

/// Clamp a requested page to the valid range. Zero/negative requests map
/// to the first page, overshoot maps to the last page.
fn clamp_page(requested: i64, num_pages: usize) -> usize {
    if requested < 1 {
        1
    } else {
        (requested as usize).min(num_pages)
    }
}

/// Build one page of the requested feed: resolve the filter, order posts
/// newest first (id as the tie-break, so pages stay stable when several
/// posts share a timestamp), and slice out the clamped page.
pub async fn compose(repo: &dyn Repo, kind: FeedKind, page: i64) -> RepoResult<FeedPage> {
    let filter = match kind {
        FeedKind::All => PostFilter::All,
        FeedKind::Group(slug) => PostFilter::Group(repo.get_group_by_slug(&slug).await?.id),
        FeedKind::Author(username) => {
            PostFilter::Author(repo.get_user_by_username(&username).await?.id)
        }
        // following nobody is an empty feed, not an error
        FeedKind::Following(user_id) => PostFilter::Authors(repo.following_ids(user_id).await?),
    };
    let posts = repo.list_posts(filter).await?;

    let total = posts.len();
    let num_pages = total.div_ceil(PAGE_SIZE).max(1);
    let page = clamp_page(page, num_pages);
    let start = (page - 1) * PAGE_SIZE;
    let posts: Vec<Post> = posts.into_iter().skip(start).take(PAGE_SIZE).collect();

    Ok(FeedPage {
        posts,
        total,
        page,
        num_pages,
        has_next: page < num_pages,
        has_previous: page > 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_clamps_to_valid_range() {
        assert_eq!(clamp_page(1, 3), 1);
        assert_eq!(clamp_page(3, 3), 3);
        assert_eq!(clamp_page(99, 3), 3);
        assert_eq!(clamp_page(0, 3), 1);
        assert_eq!(clamp_page(-4, 3), 1);
        // an empty feed still has one (empty) page
        assert_eq!(clamp_page(5, 1), 1);
    }
}
