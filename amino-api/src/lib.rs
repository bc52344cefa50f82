use chrono::Utc;

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");

/// Maximum number of root comments a single listing may request
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Deepest reply the write path accepts, top-level comments being at depth 0
///
/// Each level costs two levels of JSON nesting, and serde_json refuses to
/// read more than 128.
pub const MAX_DEPTH: i32 = 50;

mod comment;
pub use comment::{Comment, CommentId, CommentNode, EditComment, NewComment, SetPosition};

mod error;
pub use error::Error;

mod post;
pub use post::{NewPost, PostId};

pub mod store;
pub use store::CommentStore;

pub mod tree;
pub use tree::{build_comment_thread, build_nested_comments, ListOptions, NestedComments};

mod user;
pub use user::{AuthToken, NewUser, User, UserId};

pub fn validate_string(s: &str) -> Result<(), Error> {
    if s.contains('\0') {
        return Err(Error::NullByteInString(String::from(s)));
    }
    Ok(())
}

pub fn validate_name(s: &str) -> Result<(), Error> {
    validate_string(s)?;
    if s.is_empty() || s.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidName(String::from(s)));
    }
    Ok(())
}
