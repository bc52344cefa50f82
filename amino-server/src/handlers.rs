use amino_api::{
    store, CommentId, CommentNode, EditComment, ListOptions, NestedComments, NewComment, NewPost,
    NewUser, PostId, SetPosition, UserId, Uuid,
};
use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;

use crate::{db, extractors::*, Error};

pub async fn admin_create_user(
    AdminAuth: AdminAuth,
    mut conn: PgConn,
    Json(data): Json<NewUser>,
) -> Result<(), Error> {
    data.validate()?;
    db::create_user(&mut *conn, data).await
}

pub async fn whoami(Auth(user): Auth) -> Json<UserId> {
    Json(user)
}

pub async fn create_post(
    Auth(user): Auth,
    mut conn: PgConn,
    Json(data): Json<NewPost>,
) -> Result<(), Error> {
    data.validate()?;
    db::create_post(&mut *conn, user, data, Utc::now()).await
}

pub async fn fetch_comments(
    MaybeAuth(viewer): MaybeAuth,
    State(db): State<PgPool>,
    Path(post): Path<Uuid>,
    Query(options): Query<ListOptions>,
) -> Result<Json<NestedComments>, Error> {
    options.validate()?;
    let post = PostId(post);
    let exists = {
        let mut conn = db.acquire().await?;
        db::post_exists(&mut *conn, post).await?
    };
    if !exists {
        return Err(Error::post_not_found(post));
    }
    tracing::debug!(?viewer, ?post, ?options, "listing comments");
    Ok(Json(
        store::fetch_nested_comments(&db, post, &options)
            .await
            .with_context(|| format!("listing comments for {:?}", viewer))?,
    ))
}

pub async fn fetch_thread(
    MaybeAuth(viewer): MaybeAuth,
    State(db): State<PgPool>,
    Path(comment): Path<Uuid>,
) -> Result<Json<CommentNode>, Error> {
    let comment = CommentId(comment);
    tracing::debug!(?viewer, ?comment, "fetching thread");
    store::fetch_comment_thread(&db, comment)
        .await
        .with_context(|| format!("fetching thread for {:?}", viewer))?
        .map(Json)
        .ok_or_else(|| Error::comment_not_found(comment))
}

pub async fn submit_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(post): Path<Uuid>,
    Json(data): Json<NewComment>,
) -> Result<(), Error> {
    data.validate()?;
    db::submit_comment(&mut *conn, user, PostId(post), data, Utc::now()).await
}

pub async fn edit_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
    Json(data): Json<EditComment>,
) -> Result<(), Error> {
    data.validate()?;
    db::edit_comment(&mut *conn, user, CommentId(comment), data, Utc::now()).await
}

pub async fn delete_comment(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
) -> Result<(), Error> {
    db::delete_comment(&mut *conn, user, CommentId(comment), Utc::now()).await
}

pub async fn set_position(
    Auth(user): Auth,
    mut conn: PgConn,
    Path(comment): Path<Uuid>,
    Json(data): Json<SetPosition>,
) -> Result<(), Error> {
    db::set_position(&mut *conn, user, CommentId(comment), data).await
}
