#![cfg(feature = "inmem-store")]

use zine::{
    models::{NewComment, NewGroup, NewPost, NewUser, UpdatePost},
    repo::{inmem::InMemRepo, PostFilter, RepoError},
};
// Bring trait method namespaces into scope so calls on InMemRepo resolve.
use zine::repo::{CommentRepo, FollowRepo, GroupRepo, PostRepo, UserRepo};

/// Helper that returns a fresh, empty repository for every test run.
fn repo() -> InMemRepo {
    // isolate state: do **not** persist to the default file path
    std::env::set_var("ZINE_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

fn new_user(username: &str) -> NewUser {
    NewUser { username: username.into(), display_name: username.to_uppercase() }
}

fn new_post(text: &str, group: Option<&str>) -> NewPost {
    NewPost { text: text.into(), group: group.map(Into::into), image_hash: None, mime: None }
}

#[tokio::test]
async fn user_create_and_username_conflict() {
    let r = repo();

    let u = r.create_user(new_user("leo")).await.unwrap();
    assert_eq!(u.username, "leo");
    assert_eq!(r.get_user(u.id).await.unwrap().id, u.id);
    assert_eq!(r.get_user_by_username("leo").await.unwrap().id, u.id);

    let err = r.create_user(new_user("leo")).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict));

    assert!(matches!(
        r.get_user_by_username("nobody").await.unwrap_err(),
        RepoError::NotFound
    ));
}

#[tokio::test]
async fn group_crud_and_slug_conflict() {
    let r = repo();

    assert!(r.list_groups().await.unwrap().is_empty());

    let g = r
        .create_group(NewGroup {
            slug: "nature".into(),
            title: "Nature".into(),
            description: "Outdoors".into(),
        })
        .await
        .unwrap();
    assert_eq!(g.slug, "nature");
    assert_eq!(r.get_group_by_slug("nature").await.unwrap().id, g.id);

    let err = r
        .create_group(NewGroup {
            slug: "nature".into(),
            title: "Dup".into(),
            description: String::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
}

#[tokio::test]
async fn post_lifecycle() {
    let r = repo();
    let author = r.create_user(new_user("ann")).await.unwrap();
    r.create_group(NewGroup {
        slug: "g1".into(),
        title: "G1".into(),
        description: String::new(),
    })
    .await
    .unwrap();

    // empty text rejected
    assert!(matches!(
        r.create_post(author.id, new_post("   ", None)).await.unwrap_err(),
        RepoError::Validation(_)
    ));

    // unknown group rejected
    assert!(matches!(
        r.create_post(author.id, new_post("hi", Some("missing"))).await.unwrap_err(),
        RepoError::NotFound
    ));

    let post = r.create_post(author.id, new_post("hello", Some("g1"))).await.unwrap();
    assert_eq!(post.author_id, author.id);
    assert!(post.group_id.is_some());

    // update text, detach from group
    let updated = r
        .update_post(
            post.id,
            UpdatePost { text: Some("edited".into()), group: Some(None), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(updated.text, "edited");
    assert_eq!(updated.group_id, None);
    // author never changes
    assert_eq!(updated.author_id, author.id);

    assert_eq!(r.count_posts_by_author(author.id).await.unwrap(), 1);

    r.delete_post(post.id).await.unwrap();
    assert!(matches!(r.get_post(post.id).await.unwrap_err(), RepoError::NotFound));
    assert!(matches!(r.delete_post(post.id).await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn update_clears_image_attachment() {
    let r = repo();
    let author = r.create_user(new_user("ann")).await.unwrap();
    let post = r
        .create_post(
            author.id,
            NewPost {
                text: "with picture".into(),
                group: None,
                image_hash: Some("abc123".into()),
                mime: Some("image/png".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(post.image_hash.as_deref(), Some("abc123"));

    // an update that omits the image fields leaves the attachment alone
    let updated = r
        .update_post(post.id, UpdatePost { text: Some("edited".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(updated.image_hash.as_deref(), Some("abc123"));
    assert_eq!(updated.mime.as_deref(), Some("image/png"));

    // explicit null removes it, same as detaching a group
    let cleared = r
        .update_post(
            post.id,
            UpdatePost { image_hash: Some(None), mime: Some(None), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(cleared.image_hash, None);
    assert_eq!(cleared.mime, None);
    assert_eq!(cleared.text, "edited");
}

#[tokio::test]
async fn comment_flow() {
    let r = repo();
    let author = r.create_user(new_user("ann")).await.unwrap();
    let reader = r.create_user(new_user("bob")).await.unwrap();
    let post = r.create_post(author.id, new_post("hello", None)).await.unwrap();

    // missing post
    assert!(matches!(
        r.create_comment(9999, reader.id, NewComment { text: "hi".into() })
            .await
            .unwrap_err(),
        RepoError::NotFound
    ));
    // empty text
    assert!(matches!(
        r.create_comment(post.id, reader.id, NewComment { text: "".into() })
            .await
            .unwrap_err(),
        RepoError::Validation(_)
    ));

    let c1 = r
        .create_comment(post.id, reader.id, NewComment { text: "first".into() })
        .await
        .unwrap();
    let c2 = r
        .create_comment(post.id, author.id, NewComment { text: "second".into() })
        .await
        .unwrap();

    // oldest first
    let comments = r.list_comments(post.id).await.unwrap();
    assert_eq!(comments.iter().map(|c| c.id).collect::<Vec<_>>(), vec![c1.id, c2.id]);

    // deleting the post drops its comments
    r.delete_post(post.id).await.unwrap();
    assert!(r.list_comments(post.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn follow_is_idempotent_and_rejects_self() {
    let r = repo();
    let a = r.create_user(new_user("a")).await.unwrap();
    let b = r.create_user(new_user("b")).await.unwrap();

    // self-follow never persists a row
    assert!(matches!(
        r.follow(a.id, a.id).await.unwrap_err(),
        RepoError::Validation(_)
    ));
    assert!(r.following_ids(a.id).await.unwrap().is_empty());

    // following twice leaves exactly one row
    r.follow(a.id, b.id).await.unwrap();
    r.follow(a.id, b.id).await.unwrap();
    assert_eq!(r.following_ids(a.id).await.unwrap(), vec![b.id]);
    assert!(r.is_following(a.id, b.id).await.unwrap());
    // asymmetric
    assert!(!r.is_following(b.id, a.id).await.unwrap());

    // unfollow is idempotent: absence is not an error
    r.unfollow(a.id, b.id).await.unwrap();
    r.unfollow(a.id, b.id).await.unwrap();
    assert!(!r.is_following(a.id, b.id).await.unwrap());
}

#[tokio::test]
async fn follow_requires_existing_target() {
    let r = repo();
    let a = r.create_user(new_user("a")).await.unwrap();
    assert!(matches!(r.follow(a.id, 424242).await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn list_posts_filters() {
    let r = repo();
    let a = r.create_user(new_user("a")).await.unwrap();
    let b = r.create_user(new_user("b")).await.unwrap();
    let g = r
        .create_group(NewGroup { slug: "g".into(), title: "G".into(), description: String::new() })
        .await
        .unwrap();

    let p1 = r.create_post(a.id, new_post("one", Some("g"))).await.unwrap();
    let p2 = r.create_post(b.id, new_post("two", None)).await.unwrap();
    let p3 = r.create_post(a.id, new_post("three", None)).await.unwrap();

    let all = r.list_posts(PostFilter::All).await.unwrap();
    assert_eq!(all.len(), 3);

    let by_group = r.list_posts(PostFilter::Group(g.id)).await.unwrap();
    assert_eq!(by_group.iter().map(|p| p.id).collect::<Vec<_>>(), vec![p1.id]);

    let by_author = r.list_posts(PostFilter::Author(a.id)).await.unwrap();
    assert_eq!(by_author.len(), 2);

    let by_set = r.list_posts(PostFilter::Authors(vec![b.id])).await.unwrap();
    assert_eq!(by_set.iter().map(|p| p.id).collect::<Vec<_>>(), vec![p2.id]);

    // empty author set matches nothing
    assert!(r.list_posts(PostFilter::Authors(vec![])).await.unwrap().is_empty());

    // newest first with id as the tie-break
    let ids: Vec<_> = all.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![p3.id, p2.id, p1.id]);
}
