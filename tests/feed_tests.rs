#![cfg(feature = "inmem-store")]

use zine::feed::{compose, FeedKind, PAGE_SIZE};
use zine::models::{NewGroup, NewPost, NewUser, User};
use zine::repo::{inmem::InMemRepo, FollowRepo, GroupRepo, PostRepo, RepoError, UserRepo};

fn repo() -> InMemRepo {
    std::env::set_var("ZINE_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

async fn user(r: &InMemRepo, name: &str) -> User {
    r.create_user(NewUser { username: name.into(), display_name: name.into() })
        .await
        .unwrap()
}

async fn posts(r: &InMemRepo, author: &User, group: Option<&str>, n: usize) {
    for i in 0..n {
        r.create_post(
            author.id,
            NewPost {
                text: format!("post {i}"),
                group: group.map(Into::into),
                image_hash: None,
                mime: None,
            },
        )
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn group_feed_pagination_13_posts() {
    let r = repo();
    let a = user(&r, "ann").await;
    r.create_group(NewGroup { slug: "g1".into(), title: "G1".into(), description: String::new() })
        .await
        .unwrap();
    posts(&r, &a, Some("g1"), 13).await;

    let p1 = compose(&r, FeedKind::Group("g1".into()), 1).await.unwrap();
    assert_eq!(p1.posts.len(), PAGE_SIZE);
    assert_eq!(p1.total, 13);
    assert_eq!(p1.num_pages, 2);
    assert!(p1.has_next);
    assert!(!p1.has_previous);

    let p2 = compose(&r, FeedKind::Group("g1".into()), 2).await.unwrap();
    assert_eq!(p2.posts.len(), 3);
    assert!(!p2.has_next);
    assert!(p2.has_previous);

    // out-of-range clamps to the last page instead of erroring
    let p3 = compose(&r, FeedKind::Group("g1".into()), 3).await.unwrap();
    assert_eq!(p3.page, 2);
    assert_eq!(p3.posts.len(), 3);

    // no page overlap or omission across the boundary
    let mut seen: Vec<_> = p1.posts.iter().map(|p| p.id).collect();
    seen.extend(p2.posts.iter().map(|p| p.id));
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 13);
}

#[tokio::test]
async fn ordering_is_newest_first_with_stable_tiebreak() {
    let r = repo();
    let a = user(&r, "ann").await;
    // created back to back, so several posts share a timestamp; the id
    // tie-break must keep the order deterministic
    posts(&r, &a, None, 5).await;

    let page = compose(&r, FeedKind::All, 1).await.unwrap();
    let ids: Vec<_> = page.posts.iter().map(|p| p.id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable_by(|x, y| y.cmp(x));
    assert_eq!(ids, sorted);

    let again = compose(&r, FeedKind::All, 1).await.unwrap();
    assert_eq!(ids, again.posts.iter().map(|p| p.id).collect::<Vec<_>>());
}

#[tokio::test]
async fn group_scenario_and_missing_slug() {
    let r = repo();
    let a = user(&r, "ann").await;
    r.create_group(NewGroup { slug: "g1".into(), title: "G1".into(), description: String::new() })
        .await
        .unwrap();
    let post = r
        .create_post(
            a.id,
            NewPost { text: "hello".into(), group: Some("g1".into()), image_hash: None, mime: None },
        )
        .await
        .unwrap();

    let page = compose(&r, FeedKind::Group("g1".into()), 1).await.unwrap();
    assert_eq!(page.posts.iter().map(|p| p.id).collect::<Vec<_>>(), vec![post.id]);

    assert!(matches!(
        compose(&r, FeedKind::Group("missing-slug".into()), 1).await.unwrap_err(),
        RepoError::NotFound
    ));
    assert!(matches!(
        compose(&r, FeedKind::Author("missing-user".into()), 1).await.unwrap_err(),
        RepoError::NotFound
    ));
}

#[tokio::test]
async fn following_feed_tracks_follow_set() {
    let r = repo();
    let reader = user(&r, "reader").await;
    let ann = user(&r, "ann").await;
    let bob = user(&r, "bob").await;
    posts(&r, &ann, None, 2).await;
    posts(&r, &bob, None, 2).await;

    // follows nobody: empty page, not an error
    let empty = compose(&r, FeedKind::Following(reader.id), 1).await.unwrap();
    assert_eq!(empty.total, 0);
    assert_eq!(empty.page, 1);
    assert!(empty.posts.is_empty());

    r.follow(reader.id, ann.id).await.unwrap();
    let page = compose(&r, FeedKind::Following(reader.id), 1).await.unwrap();
    assert_eq!(page.total, 2);
    assert!(page.posts.iter().all(|p| p.author_id == ann.id));

    r.follow(reader.id, bob.id).await.unwrap();
    let page = compose(&r, FeedKind::Following(reader.id), 1).await.unwrap();
    assert_eq!(page.total, 4);

    // unfollowing removes that author's posts from subsequent reads
    r.unfollow(reader.id, ann.id).await.unwrap();
    let page = compose(&r, FeedKind::Following(reader.id), 1).await.unwrap();
    assert_eq!(page.total, 2);
    assert!(page.posts.iter().all(|p| p.author_id == bob.id));
}

#[tokio::test]
async fn author_feed_contains_only_that_author() {
    let r = repo();
    let ann = user(&r, "ann").await;
    let bob = user(&r, "bob").await;
    posts(&r, &ann, None, 3).await;
    posts(&r, &bob, None, 1).await;

    let page = compose(&r, FeedKind::Author("ann".into()), 1).await.unwrap();
    assert_eq!(page.total, 3);
    assert!(page.posts.iter().all(|p| p.author_id == ann.id));
}
