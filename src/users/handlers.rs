use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::AuthUser,
    error::AppError,
    state::AppState,
    users::{
        dto::{ListQuery, LoginRequest, LoginResponse, UserPayload},
        repo_types::{Filter, User, DEFAULT_PAGE_SIZE},
        services::UserService,
    },
};

pub const CURSOR_HEADER: HeaderName = HeaderName::from_static("x-cursor");

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/user", get(list_users))
        .route(
            "/user/:id",
            get(get_user)
                .put(update_user)
                .patch(patch_user)
                .delete(delete_user),
        )
        .route("/me", get(get_me))
}

/// Path ids that are not positive integers address no user.
fn parse_id(raw: &str) -> Result<i64, AppError> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(AppError::NotFound),
    }
}

fn parse_non_negative(raw: Option<&str>, name: &str, default: i64) -> Result<i64, AppError> {
    match raw {
        None | Some("") => Ok(default),
        Some(v) => match v.parse::<i64>() {
            Ok(n) if n >= 0 => Ok(n),
            _ => Err(AppError::bad_request(format!("Invalid {name}"))),
        },
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.is_empty())
}

#[instrument(skip(svc, payload))]
pub async fn register(
    State(svc): State<UserService>,
    Json(payload): Json<UserPayload>,
) -> Result<Json<User>, AppError> {
    let user = svc.register(payload).await?;
    Ok(Json(user))
}

#[instrument(skip(svc, payload))]
pub async fn login(
    State(svc): State<UserService>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let res = svc.login(&payload.email, &payload.password).await?;
    Ok(Json(res))
}

/// Lists users newest first. `X-Cursor` carries the id to pass as `cursor`
/// for the next page, or the request cursor again when the page is empty.
#[instrument(skip(svc))]
pub async fn list_users(
    State(svc): State<UserService>,
    Query(q): Query<ListQuery>,
) -> Result<(HeaderMap, Json<Vec<User>>), AppError> {
    let filter = Filter {
        email: non_empty(q.email),
        password_hash: None,
        address: non_empty(q.address),
        cursor: parse_non_negative(q.cursor.as_deref(), "cursor", 0)?,
        num: parse_non_negative(q.num.as_deref(), "num", DEFAULT_PAGE_SIZE)?,
    };

    let users = svc.fetch(&filter).await?;
    let next_cursor = users.last().map_or(filter.cursor, |u| u.id);

    let mut headers = HeaderMap::new();
    headers.insert(CURSOR_HEADER, HeaderValue::from(next_cursor));
    Ok((headers, Json(users)))
}

#[instrument(skip(svc))]
pub async fn get_user(
    State(svc): State<UserService>,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    let user = svc.get_by_id(parse_id(&id)?).await?;
    Ok(Json(user))
}

#[instrument(skip(svc, actor, payload), fields(actor = actor.id))]
pub async fn update_user(
    State(svc): State<UserService>,
    actor: AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<UserPayload>,
) -> Result<Json<User>, AppError> {
    let user = svc.update(parse_id(&id)?, payload).await?;
    Ok(Json(user))
}

#[instrument(skip(svc, actor, body), fields(actor = actor.id))]
pub async fn patch_user(
    State(svc): State<UserService>,
    actor: AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<User>, AppError> {
    let user = svc.partial_update(parse_id(&id)?, &body).await?;
    Ok(Json(user))
}

#[instrument(skip(svc, actor), fields(actor = actor.id))]
pub async fn delete_user(
    State(svc): State<UserService>,
    actor: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    svc.delete(id).await?;
    info!(user_id = id, actor = actor.id, "user removed");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(svc))]
pub async fn get_me(
    State(svc): State<UserService>,
    actor: AuthUser,
) -> Result<Json<User>, AppError> {
    let user = svc.get_by_id(actor.id).await?;
    Ok(Json(user))
}
