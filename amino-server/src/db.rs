use amino_api::{
    AuthToken, Comment, CommentId, CommentStore, EditComment, NewComment, NewPost, NewUser,
    PostId, SetPosition, Time, UserId, Uuid, MAX_DEPTH,
};
use anyhow::Context;
use axum::async_trait;
use sqlx::{postgres::PgRow, Connection, Row};

use crate::{extractors::PgPool, Error};

pub async fn create_user(conn: &mut sqlx::PgConnection, u: NewUser) -> Result<(), Error> {
    let mut tx = conn.begin().await.context("starting transaction")?;
    let name_used = sqlx::query("SELECT 1 FROM users WHERE name = $1")
        .bind(&u.name)
        .fetch_optional(&mut tx)
        .await
        .with_context(|| format!("checking whether name {:?} is free", u.name))?
        .is_some();
    if name_used {
        return Err(Error::name_already_used(u.name));
    }
    let res = sqlx::query("INSERT INTO users VALUES ($1, $2, $3) ON CONFLICT DO NOTHING")
        .bind(u.id.0)
        .bind(&u.name)
        .bind(&u.avatar)
        .execute(&mut tx)
        .await
        .with_context(|| format!("inserting user {:?}", u.id))?;
    if res.rows_affected() != 1 {
        return Err(Error::uuid_already_used(u.id.0));
    }
    tx.commit().await.context("committing transaction")?;
    Ok(())
}

pub async fn recover_session(
    conn: &mut sqlx::PgConnection,
    token: AuthToken,
) -> Result<UserId, Error> {
    let row = sqlx::query("SELECT user_id FROM sessions WHERE id = $1 AND expiration_time > now()")
        .bind(token.0)
        .fetch_optional(conn)
        .await
        .context("recovering session")?;
    match row {
        None => Err(Error::permission_denied()),
        Some(row) => Ok(UserId(
            row.try_get("user_id")
                .context("retrieving the user_id field")?,
        )),
    }
}

pub async fn create_post(
    conn: &mut sqlx::PgConnection,
    owner: UserId,
    p: NewPost,
    now: Time,
) -> Result<(), Error> {
    let res = sqlx::query("INSERT INTO posts VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING")
        .bind(p.id.0)
        .bind(owner.0)
        .bind(&p.title)
        .bind(&p.content)
        .bind(now)
        .execute(conn)
        .await
        .with_context(|| format!("inserting post {:?}", p.id))?;
    if res.rows_affected() != 1 {
        return Err(Error::uuid_already_used(p.id.0));
    }
    Ok(())
}

pub async fn post_exists(conn: &mut sqlx::PgConnection, post: PostId) -> anyhow::Result<bool> {
    Ok(sqlx::query("SELECT 1 FROM posts WHERE id = $1")
        .bind(post.0)
        .fetch_optional(conn)
        .await
        .with_context(|| format!("checking existence of post {:?}", post))?
        .is_some())
}

macro_rules! select_comments {
    ($($rest:expr),*) => {
        concat!(
            "
                SELECT
                    c.id, c.post_id, c.author_id,
                    u.name AS author_name, u.avatar AS author_avatar,
                    c.content, c.created_at, c.updated_at, c.is_edited, c.is_deleted,
                    c.parent_id, c.depth, c.reply_count, c.position, c.path
                FROM comments c
                INNER JOIN users u
                    ON u.id = c.author_id
            ",
            $($rest),*
        )
    };
}

fn comment_from_row(row: &PgRow) -> anyhow::Result<Comment> {
    macro_rules! field {
        ($name:expr) => {
            row.try_get($name)
                .context(concat!("retrieving the ", $name, " field"))?
        };
    }
    Ok(Comment {
        id: CommentId(field!("id")),
        post_id: PostId(field!("post_id")),
        author_id: UserId(field!("author_id")),
        author_name: field!("author_name"),
        author_avatar: field!("author_avatar"),
        content: field!("content"),
        created_at: field!("created_at"),
        updated_at: field!("updated_at"),
        is_edited: field!("is_edited"),
        is_deleted: field!("is_deleted"),
        parent_id: row
            .try_get::<Option<Uuid>, _>("parent_id")
            .context("retrieving the parent_id field")?
            .map(CommentId),
        depth: field!("depth"),
        reply_count: field!("reply_count"),
        position: field!("position"),
        path: row
            .try_get::<Vec<Uuid>, _>("path")
            .context("retrieving the path field")?
            .into_iter()
            .map(CommentId)
            .collect(),
    })
}

pub async fn fetch_post_comments(
    conn: &mut sqlx::PgConnection,
    post: PostId,
    include_deleted: bool,
) -> anyhow::Result<Vec<Comment>> {
    sqlx::query(select_comments!(
        "
            WHERE c.post_id = $1
            AND ($2 OR NOT c.is_deleted)
            ORDER BY c.created_at ASC, c.position ASC NULLS LAST, c.depth ASC, c.id ASC
        "
    ))
    .bind(post.0)
    .bind(include_deleted)
    .fetch_all(conn)
    .await
    .context("querying comments table")?
    .iter()
    .map(comment_from_row)
    .collect()
}

pub async fn count_post_comments(
    conn: &mut sqlx::PgConnection,
    post: PostId,
) -> anyhow::Result<u64> {
    let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM comments WHERE post_id = $1")
        .bind(post.0)
        .fetch_one(conn)
        .await
        .context("counting comments")?
        .try_get("count")
        .context("retrieving the count field")?;
    u64::try_from(count).with_context(|| format!("comment count {count} is negative"))
}

pub async fn fetch_thread_rows(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
) -> anyhow::Result<Vec<Comment>> {
    sqlx::query(select_comments!(
        "
            WHERE c.id = $1
            OR c.path @> ARRAY[$1]::UUID[]
            ORDER BY c.created_at ASC, c.id ASC
        "
    ))
    .bind(comment.0)
    .fetch_all(conn)
    .await
    .context("querying comments table")?
    .iter()
    .map(comment_from_row)
    .collect()
}

// Each query gets its own connection, so that a listing can run its row and
// count queries side by side
#[async_trait]
impl CommentStore for PgPool {
    async fn fetch_post_comments(
        &self,
        post: PostId,
        include_deleted: bool,
    ) -> anyhow::Result<Vec<Comment>> {
        let mut conn = self.acquire().await?;
        fetch_post_comments(&mut *conn, post, include_deleted).await
    }

    async fn count_post_comments(&self, post: PostId) -> anyhow::Result<u64> {
        let mut conn = self.acquire().await?;
        count_post_comments(&mut *conn, post).await
    }

    async fn fetch_thread_rows(&self, comment: CommentId) -> anyhow::Result<Vec<Comment>> {
        let mut conn = self.acquire().await?;
        fetch_thread_rows(&mut *conn, comment).await
    }
}

pub async fn submit_comment(
    conn: &mut sqlx::PgConnection,
    author: UserId,
    post: PostId,
    c: NewComment,
    now: Time,
) -> Result<(), Error> {
    let mut tx = conn.begin().await.context("starting transaction")?;

    let post_row = sqlx::query("SELECT 1 FROM posts WHERE id = $1 FOR SHARE")
        .bind(post.0)
        .fetch_optional(&mut tx)
        .await
        .with_context(|| format!("checking existence of post {:?}", post))?;
    if post_row.is_none() {
        return Err(Error::post_not_found(post));
    }

    let id_used = sqlx::query("SELECT 1 FROM comments WHERE id = $1")
        .bind(c.id.0)
        .fetch_optional(&mut tx)
        .await
        .with_context(|| format!("checking whether comment id {:?} is free", c.id))?
        .is_some();
    if id_used {
        return Err(Error::uuid_already_used(c.id.0));
    }

    let (depth, path) = match c.parent_id {
        None => (0, Vec::new()),
        Some(parent) => {
            let row = sqlx::query(
                "
                    SELECT depth, path
                        FROM comments
                    WHERE id = $1
                    AND post_id = $2
                    AND NOT is_deleted
                    FOR UPDATE
                ",
            )
            .bind(parent.0)
            .bind(post.0)
            .fetch_optional(&mut tx)
            .await
            .with_context(|| format!("fetching parent comment {:?}", parent))?
            .ok_or_else(|| Error::parent_not_found(parent))?;
            let depth: i32 = row.try_get("depth").context("retrieving the depth field")?;
            if depth >= MAX_DEPTH {
                return Err(Error::reply_too_deep(parent));
            }
            let mut path: Vec<Uuid> = row.try_get("path").context("retrieving the path field")?;
            path.push(parent.0);
            (depth + 1, path)
        }
    };

    sqlx::query(
        "
            INSERT INTO comments
                (id, post_id, author_id, content, created_at, updated_at, parent_id, depth, path)
            VALUES ($1, $2, $3, $4, $5, $5, $6, $7, $8)
        ",
    )
    .bind(c.id.0)
    .bind(post.0)
    .bind(author.0)
    .bind(&c.content)
    .bind(now)
    .bind(c.parent_id.map(|p| p.0))
    .bind(depth)
    .bind(&path)
    .execute(&mut tx)
    .await
    .with_context(|| format!("inserting comment {:?}", c.id))?;

    if let Some(parent) = c.parent_id {
        let res = sqlx::query("UPDATE comments SET reply_count = reply_count + 1 WHERE id = $1")
            .bind(parent.0)
            .execute(&mut tx)
            .await
            .with_context(|| format!("bumping reply count of {:?}", parent))?;
        if res.rows_affected() != 1 {
            return Err(anyhow::anyhow!(
                "bumping reply count of {:?} affected {} rows",
                parent,
                res.rows_affected()
            )
            .into());
        }
    }

    tx.commit().await.context("committing transaction")?;
    Ok(())
}

/// Author of the comment and of its post, for comments that are not deleted
async fn live_comment_owners(
    conn: &mut sqlx::PgConnection,
    comment: CommentId,
) -> Result<(UserId, UserId, i32), Error> {
    let row = sqlx::query(
        "
            SELECT c.author_id, c.depth, p.author_id AS post_author_id
                FROM comments c
            INNER JOIN posts p
                ON p.id = c.post_id
            WHERE c.id = $1
            AND NOT c.is_deleted
        ",
    )
    .bind(comment.0)
    .fetch_optional(conn)
    .await
    .with_context(|| format!("fetching owners of comment {:?}", comment))?
    .ok_or_else(|| Error::comment_not_found(comment))?;
    Ok((
        UserId(
            row.try_get("author_id")
                .context("retrieving the author_id field")?,
        ),
        UserId(
            row.try_get("post_author_id")
                .context("retrieving the post_author_id field")?,
        ),
        row.try_get("depth").context("retrieving the depth field")?,
    ))
}

pub async fn edit_comment(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    comment: CommentId,
    e: EditComment,
    now: Time,
) -> Result<(), Error> {
    let (author, _, _) = live_comment_owners(&mut *conn, comment).await?;
    if author != user {
        return Err(Error::permission_denied());
    }
    sqlx::query(
        "UPDATE comments SET content = $2, is_edited = true, updated_at = $3 WHERE id = $1",
    )
    .bind(comment.0)
    .bind(&e.content)
    .bind(now)
    .execute(conn)
    .await
    .with_context(|| format!("editing comment {:?}", comment))?;
    Ok(())
}

pub async fn delete_comment(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    comment: CommentId,
    now: Time,
) -> Result<(), Error> {
    let (author, post_author, _) = live_comment_owners(&mut *conn, comment).await?;
    if author != user && post_author != user {
        return Err(Error::permission_denied());
    }
    sqlx::query("UPDATE comments SET is_deleted = true, updated_at = $2 WHERE id = $1")
        .bind(comment.0)
        .bind(now)
        .execute(conn)
        .await
        .with_context(|| format!("soft-deleting comment {:?}", comment))?;
    Ok(())
}

pub async fn set_position(
    conn: &mut sqlx::PgConnection,
    user: UserId,
    comment: CommentId,
    p: SetPosition,
) -> Result<(), Error> {
    let (_, post_author, depth) = live_comment_owners(&mut *conn, comment).await?;
    if post_author != user {
        return Err(Error::permission_denied());
    }
    if depth != 0 {
        return Err(Error::not_root_comment(comment));
    }
    sqlx::query("UPDATE comments SET position = $2 WHERE id = $1")
        .bind(comment.0)
        .bind(p.position)
        .execute(conn)
        .await
        .with_context(|| format!("positioning comment {:?}", comment))?;
    Ok(())
}
