use std::ops::{Deref, DerefMut};

use amino_api::{AuthToken, UserId, Uuid};
use anyhow::Context;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{self, request, HeaderValue},
};

use crate::{db, Error};

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub db: PgPool,
    pub admin_token: Option<AuthToken>,
}

/// Connection pool; also the postgres-backed `CommentStore`
#[derive(Clone)]
pub struct PgPool(sqlx::PgPool);

impl PgPool {
    pub fn new(pool: sqlx::PgPool) -> PgPool {
        PgPool(pool)
    }

    pub async fn acquire(&self) -> Result<PgConn, Error> {
        Ok(PgConn(
            self.0
                .acquire()
                .await
                .context("acquiring db connection")?,
        ))
    }

    pub fn num_idle(&self) -> usize {
        self.0.num_idle()
    }
}

pub struct PgConn(sqlx::pool::PoolConnection<sqlx::Postgres>);

#[async_trait]
impl FromRequestParts<AppState> for PgConn {
    type Rejection = Error;

    async fn from_request_parts(
        _req: &mut request::Parts,
        state: &AppState,
    ) -> Result<PgConn, Error> {
        state.db.acquire().await
    }
}

impl Deref for PgConn {
    type Target = sqlx::PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PgConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Parses `bearer <uuid>`, the scheme being case-insensitive
fn bearer_token(header: &HeaderValue) -> Option<AuthToken> {
    let (scheme, token) = header.to_str().ok()?.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.contains(' ') {
        return None;
    }
    Uuid::try_parse(token).ok().map(AuthToken)
}

/// Token from the Authorization header, not checked against sessions yet
pub struct PreAuth(pub AuthToken);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for PreAuth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<PreAuth, Error> {
        req.headers
            .get(http::header::AUTHORIZATION)
            .and_then(bearer_token)
            .map(PreAuth)
            .ok_or_else(Error::permission_denied)
    }
}

/// A user with a live session
pub struct Auth(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for Auth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, state: &AppState) -> Result<Auth, Error> {
        let PreAuth(token) = PreAuth::from_request_parts(req, state).await?;
        let mut conn = state.db.acquire().await?;
        Ok(Auth(db::recover_session(&mut *conn, token).await?))
    }
}

/// The user behind the request for routes that anonymous visitors may use
///
/// An Authorization header that is present but invalid is still refused.
pub struct MaybeAuth(pub Option<UserId>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<MaybeAuth, Error> {
        if !req.headers.contains_key(http::header::AUTHORIZATION) {
            return Ok(MaybeAuth(None));
        }
        let Auth(user) = Auth::from_request_parts(req, state).await?;
        Ok(MaybeAuth(Some(user)))
    }
}

pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<AdminAuth, Error> {
        let PreAuth(token) = PreAuth::from_request_parts(req, state).await?;
        match state.admin_token {
            Some(admin) if admin == token => Ok(AdminAuth),
            _ => Err(Error::permission_denied()),
        }
    }
}
