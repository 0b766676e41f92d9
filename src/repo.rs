use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("validation: {0}")] Validation(String),
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

/// Which posts a feed wants. Resolution of slugs/usernames to ids happens
/// before this point; an empty `Authors` set is a legal filter that
/// matches nothing.
#[derive(Debug, Clone)]
pub enum PostFilter {
    All,
    Group(Id),
    Author(Id),
    Authors(Vec<Id>),
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Conflict when the username is already taken.
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<User>;
}

#[async_trait]
pub trait GroupRepo: Send + Sync {
    /// Conflict when the slug is already taken.
    async fn create_group(&self, new: NewGroup) -> RepoResult<Group>;
    async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group>;
    async fn list_groups(&self) -> RepoResult<Vec<Group>>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    /// Validates the draft (non-empty text, group slug resolvable) and
    /// persists with `author_id` as the immutable author.
    async fn create_post(&self, author_id: Id, new: NewPost) -> RepoResult<Post>;
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    /// Applies the given field subset; the author never changes.
    async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post>;
    async fn delete_post(&self, id: Id) -> RepoResult<()>;
    /// Matching posts, newest first (created_at desc, id desc).
    async fn list_posts(&self, filter: PostFilter) -> RepoResult<Vec<Post>>;
    async fn count_posts_by_author(&self, author_id: Id) -> RepoResult<usize>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// NotFound when the target post does not exist.
    async fn create_comment(&self, post_id: Id, author_id: Id, new: NewComment) -> RepoResult<Comment>;
    /// Comments of a post, oldest first.
    async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>>;
}

#[async_trait]
pub trait FollowRepo: Send + Sync {
    /// Ensures exactly one row for the pair. Calling again is a no-op.
    /// Self-follow is a Validation error and never persists a row.
    async fn follow(&self, user_id: Id, author_id: Id) -> RepoResult<()>;
    /// Removes the row if present; absence is not an error.
    async fn unfollow(&self, user_id: Id, author_id: Id) -> RepoResult<()>;
    async fn following_ids(&self, user_id: Id) -> RepoResult<Vec<Id>>;
    async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool>;
}

pub trait Repo: UserRepo + GroupRepo + PostRepo + CommentRepo + FollowRepo {}

impl<T> Repo for T where T: UserRepo + GroupRepo + PostRepo + CommentRepo + FollowRepo {}

fn validate_text(text: &str) -> RepoResult<()> {
    if text.trim().is_empty() {
        return Err(RepoError::Validation("text must not be empty".into()));
    }
    Ok(())
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        groups: HashMap<Id, Group>,
        posts: HashMap<Id, Post>,
        comments: HashMap<Id, Comment>,
        follows: HashMap<Id, Follow>,
        next_id: Id,
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn snapshot_path() -> PathBuf {
            match std::env::var("ZINE_DATA_DIR") {
                Ok(dir) => {
                    let mut p = PathBuf::from(dir);
                    p.push("state.json");
                    p
                }
                Err(_) => PathBuf::from(SNAPSHOT_PATH),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!(snapshot = %path.display(), "loaded state snapshot");
                        s
                    }
                    Err(e) => {
                        tracing::warn!(snapshot = %path.display(), error = %e, "snapshot unreadable, starting empty");
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    tracing::error!(snapshot = %path.display(), error = %e, "failed to write snapshot");
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            if new.username.trim().is_empty() {
                return Err(RepoError::Validation("username must not be empty".into()));
            }
            let mut s = self.state.write().unwrap();
            if s.users.values().any(|u| u.username == new.username) {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let user = User {
                id,
                username: new.username,
                display_name: new.display_name,
                created_at: Utc::now(),
            };
            s.users.insert(id, user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users
                .values()
                .find(|u| u.username == username)
                .cloned()
                .ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl GroupRepo for InMemRepo {
        async fn create_group(&self, new: NewGroup) -> RepoResult<Group> {
            if new.slug.trim().is_empty() {
                return Err(RepoError::Validation("slug must not be empty".into()));
            }
            let mut s = self.state.write().unwrap();
            if s.groups.values().any(|g| g.slug == new.slug) {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let group = Group {
                id,
                slug: new.slug,
                title: new.title,
                description: new.description,
                created_at: Utc::now(),
            };
            s.groups.insert(id, group.clone());
            drop(s);
            self.persist();
            Ok(group)
        }
        async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group> {
            let s = self.state.read().unwrap();
            s.groups
                .values()
                .find(|g| g.slug == slug)
                .cloned()
                .ok_or(RepoError::NotFound)
        }
        async fn list_groups(&self) -> RepoResult<Vec<Group>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.groups.values().cloned().collect();
            v.sort_by(|a, b| a.slug.cmp(&b.slug));
            Ok(v)
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn create_post(&self, author_id: Id, new: NewPost) -> RepoResult<Post> {
            validate_text(&new.text)?;
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(&author_id) {
                return Err(RepoError::NotFound);
            }
            let group_id = match new.group.as_deref() {
                Some(slug) => Some(
                    s.groups
                        .values()
                        .find(|g| g.slug == slug)
                        .map(|g| g.id)
                        .ok_or(RepoError::NotFound)?,
                ),
                None => None,
            };
            let id = Self::next_id(&mut s);
            let post = Post {
                id,
                author_id,
                group_id,
                text: new.text,
                image_hash: new.image_hash,
                mime: new.mime,
                created_at: Utc::now(),
            };
            s.posts.insert(id, post.clone());
            drop(s);
            self.persist();
            Ok(post)
        }
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let s = self.state.read().unwrap();
            s.posts.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            if let Some(ref text) = upd.text {
                validate_text(text)?;
            }
            let mut s = self.state.write().unwrap();

            // resolve the group slug before taking a mutable borrow
            let group_id = match upd.group {
                Some(Some(ref slug)) => Some(Some(
                    s.groups
                        .values()
                        .find(|g| g.slug == *slug)
                        .map(|g| g.id)
                        .ok_or(RepoError::NotFound)?,
                )),
                Some(None) => Some(None),
                None => None,
            };

            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(text) = upd.text { post.text = text; }
            if let Some(gid) = group_id { post.group_id = gid; }
            if let Some(hash) = upd.image_hash { post.image_hash = hash; }
            if let Some(mime) = upd.mime { post.mime = mime; }

            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if s.posts.remove(&id).is_none() {
                return Err(RepoError::NotFound);
            }
            s.comments.retain(|_, c| c.post_id != id);
            drop(s);
            self.persist();
            Ok(())
        }
        async fn list_posts(&self, filter: PostFilter) -> RepoResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .posts
                .values()
                .filter(|p| match &filter {
                    PostFilter::All => true,
                    PostFilter::Group(gid) => p.group_id == Some(*gid),
                    PostFilter::Author(aid) => p.author_id == *aid,
                    PostFilter::Authors(aids) => aids.contains(&p.author_id),
                })
                .cloned()
                .collect();
            // newest first; id as the tie-break for equal timestamps
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(v)
        }
        async fn count_posts_by_author(&self, author_id: Id) -> RepoResult<usize> {
            let s = self.state.read().unwrap();
            Ok(s.posts.values().filter(|p| p.author_id == author_id).count())
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn create_comment(&self, post_id: Id, author_id: Id, new: NewComment) -> RepoResult<Comment> {
            validate_text(&new.text)?;
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&post_id) {
                return Err(RepoError::NotFound);
            }
            if !s.users.contains_key(&author_id) {
                return Err(RepoError::NotFound);
            }
            let id = Self::next_id(&mut s);
            let comment = Comment {
                id,
                post_id,
                author_id,
                text: new.text,
                created_at: Utc::now(),
            };
            s.comments.insert(id, comment.clone());
            drop(s);
            self.persist();
            Ok(comment)
        }
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .comments
                .values()
                .filter(|c| c.post_id == post_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(v)
        }
    }

    #[async_trait]
    impl FollowRepo for InMemRepo {
        async fn follow(&self, user_id: Id, author_id: Id) -> RepoResult<()> {
            if user_id == author_id {
                return Err(RepoError::Validation("cannot follow yourself".into()));
            }
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(&author_id) {
                return Err(RepoError::NotFound);
            }
            // ensure-one semantics: an existing row makes this a no-op
            if s.follows
                .values()
                .any(|f| f.user_id == user_id && f.author_id == author_id)
            {
                return Ok(());
            }
            let id = Self::next_id(&mut s);
            let follow = Follow { id, user_id, author_id, created_at: Utc::now() };
            s.follows.insert(id, follow);
            drop(s);
            self.persist();
            Ok(())
        }
        async fn unfollow(&self, user_id: Id, author_id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.follows
                .retain(|_, f| !(f.user_id == user_id && f.author_id == author_id));
            drop(s);
            self.persist();
            Ok(())
        }
        async fn following_ids(&self, user_id: Id) -> RepoResult<Vec<Id>> {
            let s = self.state.read().unwrap();
            Ok(s.follows
                .values()
                .filter(|f| f.user_id == user_id)
                .map(|f| f.author_id)
                .collect())
        }
        async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            let s = self.state.read().unwrap();
            Ok(s.follows
                .values()
                .any(|f| f.user_id == user_id && f.author_id == author_id))
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    }

    fn internal(e: sqlx::Error) -> RepoError {
        RepoError::Internal(e.to_string())
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            if new.username.trim().is_empty() {
                return Err(RepoError::Validation("username must not be empty".into()));
            }
            sqlx::query_as::<_, User>(
                "INSERT INTO users (username, display_name) VALUES ($1,$2) RETURNING id, username, display_name, created_at",
            )
            .bind(&new.username)
            .bind(&new.display_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|_| RepoError::Conflict)
        }
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            sqlx::query_as::<_, User>("SELECT id, username, display_name, created_at FROM users WHERE id=$1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }
        async fn get_user_by_username(&self, username: &str) -> RepoResult<User> {
            sqlx::query_as::<_, User>("SELECT id, username, display_name, created_at FROM users WHERE username=$1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl GroupRepo for PgRepo {
        async fn create_group(&self, new: NewGroup) -> RepoResult<Group> {
            if new.slug.trim().is_empty() {
                return Err(RepoError::Validation("slug must not be empty".into()));
            }
            sqlx::query_as::<_, Group>(
                "INSERT INTO groups (slug, title, description) VALUES ($1,$2,$3) RETURNING id, slug, title, description, created_at",
            )
            .bind(&new.slug)
            .bind(&new.title)
            .bind(&new.description)
            .fetch_one(&self.pool)
            .await
            .map_err(|_| RepoError::Conflict)
        }
        async fn get_group_by_slug(&self, slug: &str) -> RepoResult<Group> {
            sqlx::query_as::<_, Group>("SELECT id, slug, title, description, created_at FROM groups WHERE slug=$1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await
                .map_err(internal)?
                .ok_or(RepoError::NotFound)
        }
        async fn list_groups(&self) -> RepoResult<Vec<Group>> {
            sqlx::query_as::<_, Group>("SELECT id, slug, title, description, created_at FROM groups ORDER BY slug")
                .fetch_all(&self.pool)
                .await
                .map_err(internal)
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn create_post(&self, author_id: Id, new: NewPost) -> RepoResult<Post> {
            validate_text(&new.text)?;
            let group_id = match new.group.as_deref() {
                Some(slug) => Some(self.get_group_by_slug(slug).await?.id),
                None => None,
            };
            self.get_user(author_id).await?;
            sqlx::query_as::<_, Post>(
                "INSERT INTO posts (author_id, group_id, text, image_hash, mime) VALUES ($1,$2,$3,$4,$5) \
                 RETURNING id, author_id, group_id, text, image_hash, mime, created_at",
            )
            .bind(author_id)
            .bind(group_id)
            .bind(&new.text)
            .bind(&new.image_hash)
            .bind(&new.mime)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)
        }
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            sqlx::query_as::<_, Post>(
                "SELECT id, author_id, group_id, text, image_hash, mime, created_at FROM posts WHERE id=$1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)
        }
        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            if let Some(ref text) = upd.text {
                validate_text(text)?;
            }
            let current = self.get_post(id).await?;
            let group_id = match upd.group {
                Some(Some(ref slug)) => Some(self.get_group_by_slug(slug).await?.id),
                Some(None) => None,
                None => current.group_id,
            };
            let image_hash = match upd.image_hash {
                Some(v) => v,
                None => current.image_hash.clone(),
            };
            let mime = match upd.mime {
                Some(v) => v,
                None => current.mime.clone(),
            };
            sqlx::query_as::<_, Post>(
                "UPDATE posts SET text = COALESCE($2, text), group_id = $3, \
                 image_hash = $4, mime = $5 \
                 WHERE id=$1 RETURNING id, author_id, group_id, text, image_hash, mime, created_at",
            )
            .bind(id)
            .bind(upd.text.as_ref())
            .bind(group_id)
            .bind(image_hash)
            .bind(mime)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)
        }
        async fn delete_post(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM posts WHERE id=$1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
        async fn list_posts(&self, filter: PostFilter) -> RepoResult<Vec<Post>> {
            let base = "SELECT id, author_id, group_id, text, image_hash, mime, created_at FROM posts";
            let order = " ORDER BY created_at DESC, id DESC";
            let recs = match filter {
                PostFilter::All => {
                    sqlx::query_as::<_, Post>(&format!("{base}{order}"))
                        .fetch_all(&self.pool)
                        .await
                }
                PostFilter::Group(gid) => {
                    sqlx::query_as::<_, Post>(&format!("{base} WHERE group_id=$1{order}"))
                        .bind(gid)
                        .fetch_all(&self.pool)
                        .await
                }
                PostFilter::Author(aid) => {
                    sqlx::query_as::<_, Post>(&format!("{base} WHERE author_id=$1{order}"))
                        .bind(aid)
                        .fetch_all(&self.pool)
                        .await
                }
                PostFilter::Authors(aids) => {
                    sqlx::query_as::<_, Post>(&format!("{base} WHERE author_id = ANY($1){order}"))
                        .bind(aids)
                        .fetch_all(&self.pool)
                        .await
                }
            };
            recs.map_err(internal)
        }
        async fn count_posts_by_author(&self, author_id: Id) -> RepoResult<usize> {
            let n: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE author_id=$1")
                .bind(author_id)
                .fetch_one(&self.pool)
                .await
                .map_err(internal)?;
            Ok(n.0 as usize)
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn create_comment(&self, post_id: Id, author_id: Id, new: NewComment) -> RepoResult<Comment> {
            validate_text(&new.text)?;
            self.get_post(post_id).await?;
            sqlx::query_as::<_, Comment>(
                "INSERT INTO comments (post_id, author_id, text) VALUES ($1,$2,$3) \
                 RETURNING id, post_id, author_id, text, created_at",
            )
            .bind(post_id)
            .bind(author_id)
            .bind(&new.text)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)
        }
        async fn list_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            sqlx::query_as::<_, Comment>(
                "SELECT id, post_id, author_id, text, created_at FROM comments WHERE post_id=$1 \
                 ORDER BY created_at ASC, id ASC",
            )
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }
    }

    #[async_trait]
    impl FollowRepo for PgRepo {
        async fn follow(&self, user_id: Id, author_id: Id) -> RepoResult<()> {
            if user_id == author_id {
                return Err(RepoError::Validation("cannot follow yourself".into()));
            }
            self.get_user(author_id).await?;
            sqlx::query(
                "INSERT INTO follows (user_id, author_id) VALUES ($1,$2) \
                 ON CONFLICT (user_id, author_id) DO NOTHING",
            )
            .bind(user_id)
            .bind(author_id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            Ok(())
        }
        async fn unfollow(&self, user_id: Id, author_id: Id) -> RepoResult<()> {
            sqlx::query("DELETE FROM follows WHERE user_id=$1 AND author_id=$2")
                .bind(user_id)
                .bind(author_id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            Ok(())
        }
        async fn following_ids(&self, user_id: Id) -> RepoResult<Vec<Id>> {
            let rows: Vec<(Id,)> = sqlx::query_as("SELECT author_id FROM follows WHERE user_id=$1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(internal)?;
            Ok(rows.into_iter().map(|r| r.0).collect())
        }
        async fn is_following(&self, user_id: Id, author_id: Id) -> RepoResult<bool> {
            let row: Option<(i32,)> =
                sqlx::query_as("SELECT 1 FROM follows WHERE user_id=$1 AND author_id=$2")
                    .bind(user_id)
                    .bind(author_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(internal)?;
            Ok(row.is_some())
        }
    }
}
