use amino_api::{CommentId, Error as ApiError, PostId, Uuid};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub fn permission_denied() -> Error {
        Error::Api(ApiError::PermissionDenied)
    }

    pub fn uuid_already_used(uuid: Uuid) -> Error {
        Error::Api(ApiError::UuidAlreadyUsed(uuid))
    }

    pub fn name_already_used(name: String) -> Error {
        Error::Api(ApiError::NameAlreadyUsed(name))
    }

    pub fn post_not_found(post: PostId) -> Error {
        Error::Api(ApiError::PostNotFound(post))
    }

    pub fn comment_not_found(comment: CommentId) -> Error {
        Error::Api(ApiError::CommentNotFound(comment))
    }

    pub fn parent_not_found(comment: CommentId) -> Error {
        Error::Api(ApiError::ParentNotFound(comment))
    }

    pub fn not_root_comment(comment: CommentId) -> Error {
        Error::Api(ApiError::NotRootComment(comment))
    }

    pub fn reply_too_deep(parent: CommentId) -> Error {
        Error::Api(ApiError::ReplyTooDeep(parent))
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let err = match self {
            Error::Anyhow(err) => {
                tracing::error!(?err, "internal server error");
                #[cfg(not(test))]
                let err =
                    ApiError::Unknown(String::from("Internal server error, see logs for details"));
                #[cfg(test)]
                let err = ApiError::Unknown(format!("Internal server error: {err:?}"));
                err
            }
            Error::Api(err) => {
                tracing::info!("returning error to client: {err}");
                err
            }
        };
        (err.status_code(), err.contents()).into_response()
    }
}
