use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

use crate::{CommentId, PostId};

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Post not found {0:?}")]
    PostNotFound(PostId),

    #[error("Comment not found {0:?}")]
    CommentNotFound(CommentId),

    #[error("Parent comment not found {0:?}")]
    ParentNotFound(CommentId),

    #[error("Comment is not a top-level comment {0:?}")]
    NotRootComment(CommentId),

    #[error("Comment {0:?} is too deep to be replied to")]
    ReplyTooDeep(CommentId),

    #[error("Uuid already used {0}")]
    UuidAlreadyUsed(Uuid),

    #[error("Name already used {0}")]
    NameAlreadyUsed(String),

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Invalid character in name {0:?}")]
    InvalidName(String),

    #[error("Integer is out of allowed range {0}")]
    IntegerOutOfRange(i64),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::PostNotFound(_) => StatusCode::NOT_FOUND,
            Error::CommentNotFound(_) => StatusCode::NOT_FOUND,
            Error::ParentNotFound(_) => StatusCode::BAD_REQUEST,
            Error::NotRootComment(_) => StatusCode::BAD_REQUEST,
            Error::ReplyTooDeep(_) => StatusCode::BAD_REQUEST,
            Error::UuidAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NameAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::InvalidName(_) => StatusCode::BAD_REQUEST,
            Error::IntegerOutOfRange(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::PostNotFound(p) => json!({
                "message": "post not found",
                "type": "post-not-found",
                "uuid": p.0,
            }),
            Error::CommentNotFound(c) => json!({
                "message": "comment not found",
                "type": "comment-not-found",
                "uuid": c.0,
            }),
            Error::ParentNotFound(c) => json!({
                "message": "parent comment not found",
                "type": "parent-not-found",
                "uuid": c.0,
            }),
            Error::NotRootComment(c) => json!({
                "message": "comment is not a top-level comment",
                "type": "not-root-comment",
                "uuid": c.0,
            }),
            Error::ReplyTooDeep(c) => json!({
                "message": "comment is too deep to be replied to",
                "type": "reply-too-deep",
                "uuid": c.0,
            }),
            Error::UuidAlreadyUsed(u) => json!({
                "message": "uuid conflict",
                "type": "conflict-uuid",
                "uuid": u,
            }),
            Error::NameAlreadyUsed(n) => json!({
                "message": "name already used",
                "type": "conflict-name",
                "name": n,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::InvalidName(n) => json!({
                "message": "there was an invalid character in a user name",
                "type": "invalid-name",
                "name": n,
            }),
            Error::IntegerOutOfRange(i) => json!({
                "message": "integer out of allowed range",
                "type": "integer-out-of-range",
                "int": i,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let uuid = || {
            data.get("uuid")
                .and_then(|uuid| uuid.as_str())
                .and_then(|uuid| Uuid::from_str(uuid).ok())
                .ok_or_else(|| anyhow!("error is about a uuid but has no proper uuid"))
        };
        let string = |field: &str| {
            data.get(field)
                .and_then(|s| s.as_str())
                .map(String::from)
                .ok_or_else(|| anyhow!("error is missing its {field:?} string"))
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(String::from(
                    data.get("message")
                        .and_then(|msg| msg.as_str())
                        .unwrap_or(""),
                )),
                "permission-denied" => Error::PermissionDenied,
                "post-not-found" => Error::PostNotFound(PostId(uuid()?)),
                "comment-not-found" => Error::CommentNotFound(CommentId(uuid()?)),
                "parent-not-found" => Error::ParentNotFound(CommentId(uuid()?)),
                "not-root-comment" => Error::NotRootComment(CommentId(uuid()?)),
                "reply-too-deep" => Error::ReplyTooDeep(CommentId(uuid()?)),
                "conflict-uuid" => Error::UuidAlreadyUsed(uuid()?),
                "conflict-name" => Error::NameAlreadyUsed(string("name")?),
                "null-byte" => Error::NullByteInString(string("string")?),
                "invalid-name" => Error::InvalidName(string("name")?),
                "integer-out-of-range" => Error::IntegerOutOfRange(
                    data.get("int")
                        .and_then(|i| i.as_i64())
                        .ok_or_else(|| anyhow!("error is about an integer without an integer"))?,
                ),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_errors_survive_the_wire() {
        let id = CommentId(Uuid::new_v4());
        let err = Error::CommentNotFound(id);
        assert_eq!(err.status_code(), http::StatusCode::NOT_FOUND);
        assert_eq!(Error::parse(&err.contents()).unwrap(), err);

        let err = Error::ReplyTooDeep(id);
        assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
        assert_eq!(Error::parse(&err.contents()).unwrap(), err);

        let err = Error::IntegerOutOfRange(-3);
        assert_eq!(Error::parse(&err.contents()).unwrap(), err);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Error::parse(b"not json").is_err());
        assert!(Error::parse(br#"{"type": "whatever"}"#).is_err());
        assert!(Error::parse(br#"{"type": "post-not-found"}"#).is_err());
    }
}
