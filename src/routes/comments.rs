use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::routing::get;
use axum::{Json, Router};

use super::parse_id;
use super::posts::load_post;
use crate::db::models::{Comment, NewComment};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::forms::comment::CommentInput;
use crate::forms::FormData;
use crate::permissions::{can_modify_comment, ensure};
use crate::state::AppState;
use crate::views::{CommentListItem, CommentView};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/post/{id}/comments", get(list_comments).post(create_comment))
        .route(
            "/post/comments/{id}",
            get(get_comment)
                .put(update_comment)
                .patch(update_comment)
                .delete(delete_comment),
        )
}

async fn load_comment(state: &AppState, raw_id: &str) -> AppResult<Comment> {
    let id = parse_id(raw_id)?;
    state.store.find_comment(id).await?.ok_or(AppError::NotFound)
}

async fn list_comments(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Json<Vec<CommentListItem>>> {
    let record = load_post(&state, &post_id).await?;
    let comments = state.store.list_comments(record.post.id).await?;
    Ok(Json(comments.iter().map(CommentListItem::from).collect()))
}

async fn create_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(post_id): Path<String>,
    form: FormData,
) -> AppResult<(StatusCode, Json<CommentView>)> {
    let record = load_post(&state, &post_id).await?;
    let input = CommentInput::validate(&form)?;

    let comment = state
        .store
        .create_comment(NewComment {
            content: input.content,
            writer_id: user.id,
            post_id: record.post.id,
        })
        .await?;

    tracing::info!(comment_id = comment.id, post_id = record.post.id, "comment added");
    Ok((StatusCode::CREATED, Json(CommentView::from(&comment))))
}

async fn get_comment(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<CommentView>> {
    let comment = load_comment(&state, &id).await?;
    Ok(Json(CommentView::from(&comment)))
}

async fn update_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    method: Method,
    Path(id): Path<String>,
    form: FormData,
) -> AppResult<Json<CommentView>> {
    let comment = load_comment(&state, &id).await?;
    ensure(can_modify_comment(&user, &method, &comment))?;

    let content = CommentInput::validate_patch(&form, method == Method::PATCH)?
        .map(|input| input.content)
        .unwrap_or(comment.content);
    let updated = state.store.update_comment(comment.id, &content).await?;
    Ok(Json(CommentView::from(&updated)))
}

async fn delete_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    method: Method,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let comment = load_comment(&state, &id).await?;
    ensure(can_modify_comment(&user, &method, &comment))?;

    state.store.delete_comment(comment.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
