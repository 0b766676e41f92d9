use crate::models::{Id, Post};

/// Whether `actor` may edit or delete `post`. Only the author may; the
/// unauthenticated case never reaches this point (the `Auth` extractor
/// rejects it with 401 first).
pub fn can_mutate(actor: Id, post: &Post) -> bool {
    actor == post.author_id
}
