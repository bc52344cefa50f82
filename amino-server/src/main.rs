use std::net::SocketAddr;

use amino_api::{AuthToken, Uuid};
use anyhow::Context;
use axum::{
    routing::{get, post, put},
    Router,
};

mod db;
mod error;
mod extractors;
mod fuzz;
mod handlers;

pub use error::Error;
use extractors::*;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(structopt::StructOpt)]
struct Opt {
    /// Address to listen on
    #[structopt(long, default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// Postgres url, the DATABASE_URL environment variable is used if unset
    #[structopt(long)]
    database_url: Option<String>,

    /// Token for the admin routes, the ADMIN_TOKEN environment variable is used if unset
    #[structopt(long)]
    admin_token: Option<Uuid>,

    /// Maximum number of simultaneous database connections
    #[structopt(long, default_value = "16")]
    max_connections: u32,
}

pub async fn create_sqlx_pool(url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    Ok(PgPool::new(
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .with_context(|| format!("Error opening database {:?}", url))?,
    ))
}

pub async fn app(db: PgPool, admin_token: Option<AuthToken>) -> Router {
    let state = AppState { db, admin_token };
    Router::new()
        .route("/api/admin/create-user", post(handlers::admin_create_user))
        .route("/api/whoami", get(handlers::whoami))
        .route("/api/posts", post(handlers::create_post))
        .route(
            "/api/posts/:post/comments",
            get(handlers::fetch_comments).post(handlers::submit_comment),
        )
        .route(
            "/api/comments/:comment",
            axum::routing::patch(handlers::edit_comment).delete(handlers::delete_comment),
        )
        .route("/api/comments/:comment/thread", get(handlers::fetch_thread))
        .route("/api/comments/:comment/position", put(handlers::set_position))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn admin_token(opt: Option<Uuid>) -> anyhow::Result<Option<AuthToken>> {
    if let Some(tok) = opt {
        return Ok(Some(AuthToken(tok)));
    }
    match std::env::var("ADMIN_TOKEN") {
        Err(_) => Ok(None),
        Ok(tok) => {
            let tok = Uuid::try_parse(&tok).context("parsing ADMIN_TOKEN as an auth token")?;
            Ok(Some(AuthToken(tok)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    let db_url = match opt.database_url {
        Some(url) => url,
        None => std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set when --database-url is not passed")?,
    };
    let admin_token = admin_token(opt.admin_token)?;
    if admin_token.is_none() {
        tracing::warn!("no admin token configured, admin routes will refuse all requests");
    }

    let db = create_sqlx_pool(&db_url, opt.max_connections).await?;
    MIGRATOR
        .run(&mut *db.acquire().await?)
        .await
        .context("running pending migrations")?;

    let app = app(db, admin_token).await;

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
