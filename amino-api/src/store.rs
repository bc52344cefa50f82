use anyhow::Context;
use async_trait::async_trait;

use crate::{tree, Comment, CommentId, CommentNode, ListOptions, NestedComments, PostId};

/// Read access to persisted comments
///
/// Methods take `&self` so that independent queries can run at the same time.
#[async_trait]
pub trait CommentStore: Sync {
    /// Comments of `post`, ordered by creation date, then position, then depth.
    /// Soft-deleted comments are only returned if `include_deleted` is set.
    async fn fetch_post_comments(
        &self,
        post: PostId,
        include_deleted: bool,
    ) -> anyhow::Result<Vec<Comment>>;

    /// Number of comments stored for `post`, including soft-deleted ones
    async fn count_post_comments(&self, post: PostId) -> anyhow::Result<u64>;

    /// `comment` and all the comments that have it in their path, ordered by
    /// creation date
    async fn fetch_thread_rows(&self, comment: CommentId) -> anyhow::Result<Vec<Comment>>;
}

pub async fn fetch_nested_comments<S: CommentStore + ?Sized>(
    store: &S,
    post: PostId,
    options: &ListOptions,
) -> anyhow::Result<NestedComments> {
    let (rows, total_count) = futures::try_join!(
        async {
            store
                .fetch_post_comments(post, options.include_deleted)
                .await
                .with_context(|| format!("fetching comments of post {:?}", post))
        },
        async {
            store
                .count_post_comments(post)
                .await
                .with_context(|| format!("counting comments of post {:?}", post))
        },
    )?;
    Ok(tree::build_nested_comments(post, rows, total_count, options))
}

/// Returns `None` if `comment` does not exist
pub async fn fetch_comment_thread<S: CommentStore + ?Sized>(
    store: &S,
    comment: CommentId,
) -> anyhow::Result<Option<CommentNode>> {
    let rows = store
        .fetch_thread_rows(comment)
        .await
        .with_context(|| format!("fetching thread of comment {:?}", comment))?;
    Ok(tree::build_comment_thread(comment, rows))
}
