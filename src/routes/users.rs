use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::parse_id;
use crate::auth::handlers::{self, email_conflict};
use crate::db::models::{User, UserChanges};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::filters::{Page, PageRequest, UserFilter, UserListQuery};
use crate::forms::user::ProfilePatch;
use crate::forms::FormData;
use crate::permissions::{can_modify_user, ensure};
use crate::relations::{self, Relation, RelationError};
use crate::state::AppState;
use crate::views::{render_profile, UserProfile};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/register", post(handlers::register))
        .route("/user/login", post(handlers::login))
        .route("/user/logout", delete(handlers::logout))
        .route("/user/list", get(list_users))
        .route(
            "/user/{id}",
            get(get_user)
                .put(update_user)
                .patch(update_user)
                .delete(delete_user),
        )
        .route("/user/follow/{id}", post(follow).delete(unfollow))
}

async fn load_user(state: &AppState, raw_id: &str) -> AppResult<User> {
    let id = parse_id(raw_id)?;
    state.store.find_user(id).await?.ok_or(AppError::NotFound)
}

async fn profile(state: &AppState, user: &User) -> AppResult<UserProfile> {
    let follows = state.store.edge_targets(Relation::Follows, user.id).await?;
    Ok(render_profile(user, follows))
}

async fn list_users(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<UserListQuery>,
) -> AppResult<Json<Page<UserProfile>>> {
    let filter = UserFilter::from_query(&query);
    let request = PageRequest::from_query(
        query.page.as_deref(),
        query.page_size.as_deref(),
        &state.config.pagination,
    )?;

    let count = state.store.count_users(&filter).await?;
    request.validate_against(count)?;
    let users = state.store.list_users(&filter, &request).await?;

    let mut results = Vec::with_capacity(users.len());
    for user in &users {
        results.push(profile(&state, user).await?);
    }
    Ok(Json(Page::new(
        results,
        count,
        &request,
        "/user/list",
        &filter.query_pairs(),
    )))
}

async fn get_user(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<UserProfile>> {
    let user = load_user(&state, &id).await?;
    Ok(Json(profile(&state, &user).await?))
}

/// PUT replaces the editable profile fields, PATCH updates the ones sent.
async fn update_user(
    State(state): State<AppState>,
    actor: CurrentUser,
    method: Method,
    Path(id): Path<String>,
    mut form: FormData,
) -> AppResult<Json<UserProfile>> {
    let target = load_user(&state, &id).await?;
    ensure(can_modify_user(&actor, &method, &target))?;

    let partial = method == Method::PATCH;
    let patch = ProfilePatch::validate(&mut form, &*state.store, target.id, partial).await?;

    // Avatar names are derived from the email the account ends up with.
    let email = patch.email.as_deref().unwrap_or(&target.email);
    let avatar = match patch.avatar {
        Some(Some(file)) => Some(Some(
            state.media.save(email, &file.filename, &file.data).await?,
        )),
        Some(None) => Some(None),
        None => None,
    };

    let updated = state
        .store
        .update_user(
            target.id,
            UserChanges {
                email: patch.email,
                username: patch.username,
                password_hash: None,
                avatar,
                bio: patch.bio,
                birthday: patch.birthday,
            },
        )
        .await
        .map_err(email_conflict)?;

    tracing::info!(user_id = updated.id, "profile updated");
    Ok(Json(profile(&state, &updated).await?))
}

async fn delete_user(
    State(state): State<AppState>,
    actor: CurrentUser,
    method: Method,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let target = load_user(&state, &id).await?;
    ensure(can_modify_user(&actor, &method, &target))?;

    state.store.delete_user(target.id).await?;
    tracing::info!(user_id = target.id, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn follow(
    State(state): State<AppState>,
    actor: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let target = load_user(&state, &id).await?;
    relations::add(&*state.store, Relation::Follows, actor.id, target.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User followed successfully." })),
    ))
}

async fn unfollow(
    State(state): State<AppState>,
    actor: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let target = load_user(&state, &id).await?;
    match relations::remove(&*state.store, Relation::Follows, actor.id, target.id).await {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(RelationError::SelfReference(_)) => {
            Err(AppError::BadRequest("You cannot unfollow yourself.".into()))
        }
        Err(e) => Err(e.into()),
    }
}
