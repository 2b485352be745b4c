use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::routing::get;
use axum::{Json, Router};

use crate::db::models::Tag;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::forms::tag::TagInput;
use crate::forms::FormData;
use crate::permissions::{can_access_tags, ensure};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/post/tags", get(list_tags).post(create_tag))
}

async fn list_tags(
    State(state): State<AppState>,
    user: CurrentUser,
    method: Method,
) -> AppResult<Json<Vec<Tag>>> {
    ensure(can_access_tags(&user, &method))?;
    Ok(Json(state.store.list_tags().await?))
}

async fn create_tag(
    State(state): State<AppState>,
    user: CurrentUser,
    method: Method,
    form: FormData,
) -> AppResult<(StatusCode, Json<Tag>)> {
    ensure(can_access_tags(&user, &method))?;
    let input = TagInput::validate(&form)?;

    let tag = state.store.create_tag(&input.name).await?;
    tracing::info!(tag_id = tag.id, name = %tag.name, "tag created");
    Ok((StatusCode::CREATED, Json(tag)))
}
