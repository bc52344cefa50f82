use uuid::Uuid;

use crate::{Error, PostId, Time, UserId};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct CommentId(pub Uuid);

/// A comment as persisted, with its author's display data joined in
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,

    pub author_id: UserId,
    pub author_name: String,
    pub author_avatar: Option<String>,

    pub content: String,
    pub created_at: Time,
    pub updated_at: Time,
    pub is_edited: bool,
    pub is_deleted: bool,

    /// None for top-level comments
    pub parent_id: Option<CommentId>,

    /// 0 for top-level comments
    pub depth: i32,

    /// Number of direct replies, maintained on insertion
    pub reply_count: i32,

    /// Explicit ordering among top-level comments, if any
    pub position: Option<i32>,

    /// Ancestors, from the top-level comment down to the direct parent
    pub path: Vec<CommentId>,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,

    /// Direct replies, in retrieval order
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    /// Number of nodes in this subtree, including self
    pub fn subtree_len(&self) -> usize {
        let mut res = 0;
        let mut stack = vec![self];
        while let Some(n) = stack.pop() {
            res += 1;
            stack.extend(n.replies.iter());
        }
        res
    }

    /// Depth-first, pre-order walk over this subtree
    pub fn walk(&self) -> impl Iterator<Item = &CommentNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let n = stack.pop()?;
            stack.extend(n.replies.iter().rev());
            Some(n)
        })
    }
}

// The derived drop glue recurses once per level
impl Drop for CommentNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.replies);
        while let Some(mut n) = stack.pop() {
            stack.append(&mut n.replies);
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub id: CommentId,
    pub parent_id: Option<CommentId>,
    pub content: String,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.content)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EditComment {
    pub content: String,
}

impl EditComment {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.content)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SetPosition {
    pub position: Option<i32>,
}
