use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::{hash_password, issue_token, verify_password};
use crate::db::models::{NewUser, User};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::forms::user::{LoginInput, RegisterInput};
use crate::forms::{FieldErrors, FormData};
use crate::repository::{RepositoryError, UserRepository};
use crate::state::AppState;
use crate::views::UserCreated;

const BAD_CREDENTIALS: &str = "Unable to log in with provided credentials.";

/// Validate and store a new account. `superuser` also grants staff.
pub async fn create_account<R: UserRepository + ?Sized>(
    repo: &R,
    form: &FormData,
    password_cost: u32,
    superuser: bool,
) -> AppResult<User> {
    let input = RegisterInput::validate(form, repo).await?;
    let password_hash = hash_password(&input.password, password_cost)?;

    let user = repo
        .create_user(NewUser {
            email: input.email,
            username: input.username,
            password_hash,
            bio: input.bio,
            birthday: input.birthday,
            is_staff: superuser,
            is_superuser: superuser,
        })
        .await
        .map_err(email_conflict)?;

    tracing::info!(user_id = user.id, superuser, "account created");
    Ok(user)
}

/// A unique-email violation that slipped past validation is reported the
/// same way the validator reports it.
pub fn email_conflict(err: RepositoryError) -> AppError {
    match err {
        RepositoryError::Conflict(msg) => AppError::Validation(FieldErrors::single("email", msg)),
        other => other.into(),
    }
}

pub async fn register(
    State(state): State<AppState>,
    form: FormData,
) -> AppResult<(StatusCode, Json<UserCreated>)> {
    let user = create_account(
        &*state.store,
        &form,
        state.config.auth.password_cost,
        false,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(UserCreated::from(&user))))
}

pub async fn login(State(state): State<AppState>, form: FormData) -> AppResult<Json<Value>> {
    let input = LoginInput::validate(&form)?;

    let user = state
        .store
        .find_by_email(&input.email)
        .await?
        .filter(|u| u.is_active && verify_password(&input.password, &u.password_hash))
        .ok_or_else(|| AppError::Validation(FieldErrors::single("non_field_errors", BAD_CREDENTIALS)))?;

    let token = issue_token(&*state.store, user.id).await?;
    tracing::debug!(user_id = user.id, "login");
    Ok(Json(json!({ "token": token })))
}

pub async fn logout(State(state): State<AppState>, user: CurrentUser) -> AppResult<StatusCode> {
    state.store.delete_token(&user.token).await?;
    tracing::debug!(user_id = user.id, "logout");
    Ok(StatusCode::NO_CONTENT)
}
