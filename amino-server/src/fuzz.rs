#![cfg(test)]

use std::{cmp, collections::HashMap, fmt::Debug, ops::RangeTo, panic::AssertUnwindSafe, path::Path};

use amino_api::{
    store, CommentId, CommentNode, EditComment, Error as ApiError, ListOptions, NestedComments,
    NewComment, NewPost, NewUser, PostId, SetPosition, Time, UserId, Uuid,
};
use amino_mock_server::MockServer;
use async_recursion::async_recursion;
use bolero::generator::TypeGenerator;
use axum::{
    http::{self, request},
    Router,
};
use chrono::TimeZone;
use tower::{Service, ServiceExt};

use crate::{extractors::*, *};

fn build_pg_cluster(data: &Path) -> Option<postgresfixture::cluster::Cluster> {
    let mut runtime = None;
    let mut best_version = None;
    for r in postgresfixture::runtime::Runtime::find_on_path() {
        if let Ok(v) = r.version() {
            match (&mut runtime, &mut best_version) {
                (None, None) => {
                    runtime = Some(r);
                    best_version = Some(v);
                }
                (Some(runtime), Some(best_version)) => {
                    if *best_version < v {
                        *runtime = r;
                        *best_version = v;
                    }
                }
                _ => unreachable!(),
            }
        }
    }
    Some(postgresfixture::cluster::Cluster::new(data, runtime?))
}

/// Runs `f` against a freshly migrated database
///
/// Does nothing if postgres is not installed.
fn with_test_pool<F>(name: &str, f: F)
where
    F: FnOnce(&tokio::runtime::Runtime, PgPool),
{
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt::try_init();
    }
    let lockfile = tempfile::tempfile().expect("creating tempfile");
    let datadir = tempfile::tempdir().expect("creating tempdir");
    let datadir_path: &Path = datadir.as_ref();
    let cluster = match build_pg_cluster(datadir_path) {
        Some(cluster) => cluster,
        None => {
            eprintln!("skipping {name}: postgresql seems to not be installed in path");
            return;
        }
    };
    let datadir_path: &str = datadir_path.to_str().expect("tempdir is not valid utf8");
    let f = AssertUnwindSafe(f);
    postgresfixture::coordinate::run_and_destroy(&cluster, lockfile.into(), || {
        let f = f;
        cluster
            .createdb("test_db")
            .expect("creating test_db database");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed initializing tokio runtime");
        let pool = runtime.block_on(async move {
            let pool = create_sqlx_pool(
                &format!("postgresql://?host={}&dbname=test_db", datadir_path),
                4,
            )
            .await
            .expect("creating sqlx pool");
            MIGRATOR
                .run(&mut *pool.acquire().await.expect("getting migrator connection"))
                .await
                .expect("failed applying migrations");
            pool
        });
        (f.0)(&runtime, pool)
    })
    .expect("coordinating spinup and shutdown of the pg cluster");
}

macro_rules! do_sqlx_test {
    ( $name:ident, $gen:expr, $fn:expr ) => {
        #[test]
        fn $name() {
            with_test_pool(stringify!($name), |runtime, pool| {
                let runtime = AssertUnwindSafe(runtime);
                let pool = AssertUnwindSafe(pool);
                bolero::check!()
                    .with_generator($gen)
                    .cloned()
                    .for_each(move |v| {
                        let pool = pool.clone();
                        // run the test
                        let idle_before = pool.num_idle();
                        let v_str = format!("{v:?}");
                        let idle_after_res: Result<usize, _> = {
                            let pool = pool.clone();
                            std::panic::catch_unwind(AssertUnwindSafe(|| {
                                runtime.block_on(async move {
                                    let () = $fn(pool.clone(), v).await;
                                    let mut idle_after = pool.num_idle();
                                    let wait_release_since = std::time::Instant::now();
                                    while idle_after < idle_before
                                        && wait_release_since.elapsed()
                                            <= std::time::Duration::from_secs(1)
                                    {
                                        tokio::task::yield_now().await;
                                        idle_after = pool.num_idle();
                                    }
                                    idle_after
                                })
                            }))
                        };
                        runtime.block_on(async move {
                            // cleanup
                            let mut conn =
                                pool.acquire().await.expect("getting db cleanup connection");
                            sqlx::query(include_str!("../reset-test-db.sql"))
                                .execute(&mut *conn)
                                .await
                                .expect("failed cleaning up database");
                        });
                        // resume the panics
                        match idle_after_res {
                            Err(e) => std::panic::resume_unwind(e),
                            Ok(idle_after) => assert!(
                                idle_after >= idle_before,
                                "test {} held onto pool after exiting test: before there were {idle_before} connections, and after there were {idle_after} with value {v_str}",
                                stringify!($name)
                            ),
                        }
                    });
            });
        }
    };
}

async fn create_session(pool: &PgPool, user: UserId) -> Uuid {
    let token = Uuid::new_v4();
    let mut conn = pool.acquire().await.expect("getting session connection");
    sqlx::query("INSERT INTO sessions VALUES ($1, $2, now() + interval '1 day')")
        .bind(token)
        .bind(user.0)
        .execute(&mut *conn)
        .await
        .expect("creating session");
    token
}

async fn call<Req, Resp>(
    app: &mut Router,
    req: request::Request<axum::body::Body>,
    req_body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    app.ready().await.expect("waiting for app to be ready");
    let resp = app.call(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    if status == http::StatusCode::OK {
        if std::any::TypeId::of::<Resp>() == std::any::TypeId::of::<()>() {
            // the server returns an empty string in this situation, which does not parse properly with serde_json
            return Ok(serde_json::from_slice(b"null").unwrap());
        }
        return Ok(serde_json::from_slice(&body).unwrap_or_else(|err| {
            panic!(
                r#"
                    Failed parsing resp body!

                    The error is the following:
                    ---
                    {err}
                    ---

                    Response body is:
                    ---
                    {body:?}
                    ---

                    Request was:
                    ---
                    {req_body:?}
                    ---
                "#
            )
        }));
    }
    Err(ApiError::parse(&body)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {body:?}")))
}

async fn run_on_app<Req, Resp>(
    app: &mut Router,
    method: &str,
    uri: &str,
    token: Option<Uuid>,
    body: &Req,
) -> Result<Resp, ApiError>
where
    Req: Debug + serde::Serialize,
    Resp: 'static + for<'de> serde::Deserialize<'de>,
{
    let req = request::Builder::new()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json");
    let req = match token {
        Some(token) => req.header(http::header::AUTHORIZATION, format!("bearer {token}")),
        None => req,
    };
    let req = req
        .body(axum::body::Body::from(
            serde_json::to_vec(body).expect("serializing request body to json"),
        ))
        .expect("building request");
    call(app, req, body).await
}

fn compare<T>(name: &str, app_res: Result<T, ApiError>, mock_res: Result<T, ApiError>)
where
    T: Debug + PartialEq,
{
    assert_eq!(
        app_res, mock_res,
        "app and mock did not return the same result for {name}"
    );
}

fn resize_int(fuzz_id: usize, RangeTo { end }: RangeTo<usize>) -> Option<usize> {
    if end == 0 {
        return None;
    }
    let bucket_size = cmp::max(1, usize::MAX / end); // in case we rounded to 0
    let id = fuzz_id / bucket_size;
    Some(cmp::min(id, end - 1)) // in case id was actually over end - 1 due to rounding
}

fn time(n: i64) -> Time {
    chrono::Utc.timestamp_opt(1_600_000_000 + n, 0).unwrap()
}

/// Timestamps are set by the server clock, so only their ordering is compared
fn normalize(nodes: &mut [CommentNode]) {
    for n in nodes {
        n.comment.created_at = time(0);
        n.comment.updated_at = time(0);
        normalize(&mut n.replies);
    }
}

#[derive(Clone, Debug, bolero::generator::TypeGenerator)]
enum FuzzOp {
    CreateUser {
        name: u8,
        with_avatar: bool,
    },
    CreatePost {
        uid: usize,
    },
    Comment {
        uid: usize,
        post: usize,
        parent: Option<usize>,
        reuse_id: Option<usize>,
        #[generator(bolero::generator::gen_with::<String>().len(0..20usize))]
        content: String,
    },
    Edit {
        uid: usize,
        comment: usize,
        #[generator(bolero::generator::gen_with::<String>().len(0..20usize))]
        content: String,
    },
    Delete {
        uid: usize,
        comment: usize,
    },
    SetPosition {
        uid: usize,
        comment: usize,
        position: Option<i8>,
    },
    ListComments {
        post: usize,
        include_deleted: bool,
        limit: u8,
        offset: u8,
    },
    FetchThread {
        comment: Option<usize>,
    },
}

struct ComparativeFuzzer {
    admin_token: Uuid,
    app: Router,
    pool: PgPool,
    mock: MockServer,
    sessions: HashMap<UserId, Uuid>,
    posts: Vec<PostId>,
    clock: i64,
}

impl ComparativeFuzzer {
    async fn new(pool: PgPool) -> ComparativeFuzzer {
        let admin_token = Uuid::new_v4();
        let app = app(pool.clone(), Some(AuthToken(admin_token))).await;
        ComparativeFuzzer {
            admin_token,
            app,
            pool,
            mock: MockServer::new(),
            sessions: HashMap::new(),
            posts: Vec::new(),
            clock: 0,
        }
    }

    fn user(&self, uid: usize) -> Option<(UserId, Uuid)> {
        let uid = resize_int(uid, ..self.mock.test_num_users())?;
        let user = self.mock.test_get_user(uid).id;
        Some((user, self.sessions[&user]))
    }

    fn post(&self, post: usize) -> Option<PostId> {
        resize_int(post, ..self.posts.len()).map(|p| self.posts[p])
    }

    fn comment(&self, comment: usize) -> Option<CommentId> {
        resize_int(comment, ..self.mock.test_num_comments())
            .map(|c| self.mock.test_get_comment(c).id)
    }

    fn tick(&mut self) -> Time {
        self.clock += 1;
        time(self.clock)
    }

    #[async_recursion]
    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::CreateUser { name, with_avatar } => {
                let new_user = NewUser::new(
                    UserId(Uuid::new_v4()),
                    format!("user{name}"),
                    with_avatar.then(|| format!("https://example.org/{name}.png")),
                );
                let app_res = run_on_app(
                    &mut self.app,
                    "POST",
                    "/api/admin/create-user",
                    Some(self.admin_token),
                    &new_user,
                )
                .await;
                if app_res.is_ok() {
                    let token = create_session(&self.pool, new_user.id).await;
                    self.sessions.insert(new_user.id, token);
                }
                compare(
                    "CreateUser",
                    app_res,
                    self.mock.admin_create_user(new_user),
                )
            }
            FuzzOp::CreatePost { uid } => {
                let Some((user, token)) = self.user(uid) else {
                    self.execute_fuzz_op(FuzzOp::CreateUser {
                        name: uid as u8,
                        with_avatar: false,
                    })
                    .await;
                    return self.execute_fuzz_op(FuzzOp::CreatePost { uid }).await;
                };
                let new_post = NewPost {
                    id: PostId(Uuid::new_v4()),
                    title: String::from("title"),
                    content: String::from("content"),
                };
                let app_res =
                    run_on_app(&mut self.app, "POST", "/api/posts", Some(token), &new_post).await;
                let mock_res = self.mock.create_post(user, new_post.clone());
                if mock_res.is_ok() {
                    self.posts.push(new_post.id);
                }
                compare("CreatePost", app_res, mock_res)
            }
            FuzzOp::Comment {
                uid,
                post,
                parent,
                reuse_id,
                content,
            } => {
                let Some(post_id) = self.post(post) else {
                    self.execute_fuzz_op(FuzzOp::CreatePost { uid }).await;
                    return self
                        .execute_fuzz_op(FuzzOp::Comment {
                            uid,
                            post,
                            parent,
                            reuse_id,
                            content,
                        })
                        .await;
                };
                let Some((user, token)) = self.user(uid) else {
                    unreachable!("a post exists, so does a user");
                };
                let new_comment = NewComment {
                    id: reuse_id
                        .and_then(|c| self.comment(c))
                        .unwrap_or_else(|| CommentId(Uuid::new_v4())),
                    parent_id: parent.and_then(|c| self.comment(c)),
                    content,
                };
                let app_res = run_on_app(
                    &mut self.app,
                    "POST",
                    &format!("/api/posts/{}/comments", post_id.0),
                    Some(token),
                    &new_comment,
                )
                .await;
                let now = self.tick();
                compare(
                    "Comment",
                    app_res,
                    self.mock.submit_comment(user, post_id, new_comment, now),
                )
            }
            FuzzOp::Edit {
                uid,
                comment,
                content,
            } => {
                let (Some((user, token)), Some(comment)) = (self.user(uid), self.comment(comment))
                else {
                    return;
                };
                let edit = EditComment { content };
                let app_res = run_on_app(
                    &mut self.app,
                    "PATCH",
                    &format!("/api/comments/{}", comment.0),
                    Some(token),
                    &edit,
                )
                .await;
                let now = self.tick();
                compare(
                    "Edit",
                    app_res,
                    self.mock.edit_comment(user, comment, edit, now),
                )
            }
            FuzzOp::Delete { uid, comment } => {
                let (Some((user, token)), Some(comment)) = (self.user(uid), self.comment(comment))
                else {
                    return;
                };
                let app_res = run_on_app(
                    &mut self.app,
                    "DELETE",
                    &format!("/api/comments/{}", comment.0),
                    Some(token),
                    &(),
                )
                .await;
                let now = self.tick();
                compare(
                    "Delete",
                    app_res,
                    self.mock.delete_comment(user, comment, now),
                )
            }
            FuzzOp::SetPosition {
                uid,
                comment,
                position,
            } => {
                let (Some((user, token)), Some(comment)) = (self.user(uid), self.comment(comment))
                else {
                    return;
                };
                let data = SetPosition {
                    position: position.map(i32::from),
                };
                let app_res = run_on_app(
                    &mut self.app,
                    "PUT",
                    &format!("/api/comments/{}/position", comment.0),
                    Some(token),
                    &data,
                )
                .await;
                compare(
                    "SetPosition",
                    app_res,
                    self.mock.set_position(user, comment, data),
                )
            }
            FuzzOp::ListComments {
                post,
                include_deleted,
                limit,
                offset,
            } => {
                let Some(post) = self.post(post) else {
                    return;
                };
                let options = ListOptions {
                    include_deleted,
                    limit: u32::from(limit),
                    offset: u32::from(offset),
                };
                let mut app_res: Result<NestedComments, ApiError> = run_on_app(
                    &mut self.app,
                    "GET",
                    &format!(
                        "/api/posts/{}/comments?include_deleted={include_deleted}&limit={limit}&offset={offset}",
                        post.0
                    ),
                    None,
                    &(),
                )
                .await;
                let mut mock_res = store::fetch_nested_comments(&self.mock, post, &options)
                    .await
                    .map_err(|e| ApiError::Unknown(format!("{e:?}")));
                for res in [&mut app_res, &mut mock_res] {
                    if let Ok(res) = res {
                        normalize(&mut res.comments);
                    }
                }
                compare("ListComments", app_res, mock_res)
            }
            FuzzOp::FetchThread { comment } => {
                let comment = comment
                    .and_then(|c| self.comment(c))
                    .unwrap_or_else(|| CommentId(Uuid::new_v4()));
                let mut app_res: Result<CommentNode, ApiError> = run_on_app(
                    &mut self.app,
                    "GET",
                    &format!("/api/comments/{}/thread", comment.0),
                    None,
                    &(),
                )
                .await;
                let mut mock_res = store::fetch_comment_thread(&self.mock, comment)
                    .await
                    .map_err(|e| ApiError::Unknown(format!("{e:?}")))
                    .and_then(|c| c.ok_or(ApiError::CommentNotFound(comment)));
                for res in [&mut app_res, &mut mock_res] {
                    if let Ok(res) = res {
                        normalize(std::slice::from_mut(res));
                    }
                }
                compare("FetchThread", app_res, mock_res)
            }
        }
    }
}

do_sqlx_test!(
    compare_with_mock,
    bolero::generator::gen_with::<Vec<FuzzOp>>().len(1..100usize),
    |pool, test: Vec<FuzzOp>| async move {
        let mut fuzzer = ComparativeFuzzer::new(pool).await;
        for op in test {
            fuzzer.execute_fuzz_op(op).await;
        }
    }
);

#[test]
fn comment_listing_over_http() {
    with_test_pool("comment_listing_over_http", |runtime, pool| {
        runtime.block_on(async move {
            let admin = Uuid::new_v4();
            let mut app = app(pool.clone(), Some(AuthToken(admin))).await;

            let alice = UserId(Uuid::new_v4());
            let new_user = NewUser::new(alice, String::from("alice"), None);
            let res: Result<(), _> = run_on_app(
                &mut app,
                "POST",
                "/api/admin/create-user",
                Some(admin),
                &new_user,
            )
            .await;
            res.expect("creating user");
            let token = create_session(&pool, alice).await;

            let who: UserId = run_on_app(&mut app, "GET", "/api/whoami", Some(token), &())
                .await
                .expect("calling whoami");
            assert_eq!(who, alice);

            let post = PostId(Uuid::new_v4());
            let new_post = NewPost {
                id: post,
                title: String::from("hello"),
                content: String::from("world"),
            };
            let res: Result<(), _> =
                run_on_app(&mut app, "POST", "/api/posts", Some(token), &new_post).await;
            res.expect("creating post");

            let ids = (0..4).map(|_| CommentId(Uuid::new_v4())).collect::<Vec<_>>();
            let parents = [None, None, Some(ids[0]), Some(ids[2])];
            for (id, parent_id) in ids.iter().zip(parents) {
                let new_comment = NewComment {
                    id: *id,
                    parent_id,
                    content: String::from("hi"),
                };
                let res: Result<(), _> = run_on_app(
                    &mut app,
                    "POST",
                    &format!("/api/posts/{}/comments", post.0),
                    Some(token),
                    &new_comment,
                )
                .await;
                res.expect("submitting comment");
            }
            let res: Result<(), _> = run_on_app(
                &mut app,
                "DELETE",
                &format!("/api/comments/{}", ids[1].0),
                Some(token),
                &(),
            )
            .await;
            res.expect("deleting comment");

            let listing: NestedComments = run_on_app(
                &mut app,
                "GET",
                &format!("/api/posts/{}/comments", post.0),
                None,
                &(),
            )
            .await
            .expect("listing comments");
            assert_eq!(listing.total_count, 4);
            assert_eq!(listing.comments.len(), 1);
            let root = &listing.comments[0];
            assert_eq!(root.comment.id, ids[0]);
            assert_eq!(root.comment.reply_count, 1);
            assert_eq!(root.comment.author_name, "alice");
            assert_eq!(root.replies[0].comment.id, ids[2]);
            assert_eq!(root.replies[0].replies[0].comment.id, ids[3]);
            assert_eq!(root.replies[0].replies[0].comment.path, vec![ids[0], ids[2]]);

            let thread: CommentNode = run_on_app(
                &mut app,
                "GET",
                &format!("/api/comments/{}/thread", ids[2].0),
                None,
                &(),
            )
            .await
            .expect("fetching thread");
            assert_eq!(thread.subtree_len(), 2);

            let missing = CommentId(Uuid::new_v4());
            let res: Result<CommentNode, _> = run_on_app(
                &mut app,
                "GET",
                &format!("/api/comments/{}/thread", missing.0),
                None,
                &(),
            )
            .await;
            assert_eq!(res, Err(ApiError::CommentNotFound(missing)));

            let unknown = PostId(Uuid::new_v4());
            let res: Result<NestedComments, _> = run_on_app(
                &mut app,
                "GET",
                &format!("/api/posts/{}/comments", unknown.0),
                None,
                &(),
            )
            .await;
            assert_eq!(res, Err(ApiError::PostNotFound(unknown)));

            let res: Result<NestedComments, _> = run_on_app(
                &mut app,
                "GET",
                &format!("/api/posts/{}/comments?limit=100000", post.0),
                None,
                &(),
            )
            .await;
            assert_eq!(res, Err(ApiError::IntegerOutOfRange(100000)));
        })
    });
}

#[test]
fn replies_past_max_depth_are_refused_over_http() {
    with_test_pool("replies_past_max_depth_are_refused_over_http", |runtime, pool| {
        runtime.block_on(async move {
            let admin = Uuid::new_v4();
            let mut app = app(pool.clone(), Some(AuthToken(admin))).await;

            let bob = UserId(Uuid::new_v4());
            let new_user = NewUser::new(bob, String::from("bob"), None);
            let res: Result<(), _> = run_on_app(
                &mut app,
                "POST",
                "/api/admin/create-user",
                Some(admin),
                &new_user,
            )
            .await;
            res.expect("creating user");
            let token = create_session(&pool, bob).await;

            let post = PostId(Uuid::new_v4());
            let new_post = NewPost {
                id: post,
                title: String::from("deep"),
                content: String::from("thread"),
            };
            let res: Result<(), _> =
                run_on_app(&mut app, "POST", "/api/posts", Some(token), &new_post).await;
            res.expect("creating post");

            let mut parent_id = None;
            for _ in 0..=amino_api::MAX_DEPTH {
                let new_comment = NewComment {
                    id: CommentId(Uuid::new_v4()),
                    parent_id,
                    content: String::from("deeper"),
                };
                let res: Result<(), _> = run_on_app(
                    &mut app,
                    "POST",
                    &format!("/api/posts/{}/comments", post.0),
                    Some(token),
                    &new_comment,
                )
                .await;
                res.expect("submitting comment");
                parent_id = Some(new_comment.id);
            }
            let last = parent_id.expect("at least one comment was posted");

            let too_deep = NewComment {
                id: CommentId(Uuid::new_v4()),
                parent_id: Some(last),
                content: String::from("one more"),
            };
            let res: Result<(), _> = run_on_app(
                &mut app,
                "POST",
                &format!("/api/posts/{}/comments", post.0),
                Some(token),
                &too_deep,
            )
            .await;
            assert_eq!(res, Err(ApiError::ReplyTooDeep(last)));

            let listing: NestedComments = run_on_app(
                &mut app,
                "GET",
                &format!("/api/posts/{}/comments", post.0),
                None,
                &(),
            )
            .await
            .expect("listing the deepest allowed thread");
            assert_eq!(listing.total_count, amino_api::MAX_DEPTH as u64 + 1);
            assert_eq!(
                listing.comments[0].subtree_len(),
                amino_api::MAX_DEPTH as usize + 1
            );
        })
    });
}
