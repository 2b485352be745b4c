use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::parse_id;
use crate::db::models::{NewPost, PostChanges, PostRecord};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::filters::{Page, PageRequest, PostFilter, PostListQuery, PostScope};
use crate::forms::post::{PostInput, PostPatch};
use crate::forms::{FormData, UploadedFile};
use crate::permissions::{can_modify_post, ensure};
use crate::relations::{self, Relation, ToggleOutcome};
use crate::schedule;
use crate::state::AppState;
use crate::views::{render_post, PostAction, PostView};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/post", get(list_posts).post(create_post))
        .route("/post/liked", get(liked_posts))
        .route("/post/my", get(my_posts))
        .route("/post/followings", get(followed_posts))
        .route("/post/schedule", post(schedule_post))
        .route(
            "/post/{id}",
            get(get_post)
                .put(update_post)
                .patch(update_post)
                .delete(delete_post),
        )
        .route("/post/{id}/like", post(like_post))
}

pub(crate) async fn load_post(state: &AppState, raw_id: &str) -> AppResult<PostRecord> {
    let id = parse_id(raw_id)?;
    state.store.find_post(id).await?.ok_or(AppError::NotFound)
}

async fn store_image(
    state: &AppState,
    title: &str,
    image: Option<UploadedFile>,
) -> AppResult<Option<String>> {
    match image {
        Some(file) => Ok(Some(
            state.media.save(title, &file.filename, &file.data).await?,
        )),
        None => Ok(None),
    }
}

async fn post_page(
    state: &AppState,
    query: &PostListQuery,
    scope: PostScope,
    action: PostAction,
    path: &str,
) -> AppResult<Json<Page<PostView>>> {
    let filter = PostFilter::from_query(query, scope)?;
    let request = PageRequest::from_query(
        query.page.as_deref(),
        query.page_size.as_deref(),
        &state.config.pagination,
    )?;

    let count = state.store.count_posts(&filter).await?;
    request.validate_against(count)?;
    let records = state.store.list_posts(&filter, &request).await?;

    let shape = action.shape();
    let page = Page::new(records, count, &request, path, &filter.query_pairs());
    Ok(Json(page.map(|record| render_post(shape, &record, &[]))))
}

async fn list_posts(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<PostListQuery>,
) -> AppResult<Json<Page<PostView>>> {
    post_page(&state, &query, PostScope::All, PostAction::List, "/post").await
}

async fn liked_posts(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PostListQuery>,
) -> AppResult<Json<Page<PostView>>> {
    let scope = PostScope::LikedBy(user.id);
    post_page(&state, &query, scope, PostAction::Liked, "/post/liked").await
}

async fn my_posts(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PostListQuery>,
) -> AppResult<Json<Page<PostView>>> {
    let scope = PostScope::CreatedBy(user.id);
    post_page(&state, &query, scope, PostAction::My, "/post/my").await
}

async fn followed_posts(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PostListQuery>,
) -> AppResult<Json<Page<PostView>>> {
    let scope = PostScope::FollowedBy(user.id);
    post_page(&state, &query, scope, PostAction::Followings, "/post/followings").await
}

async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    mut form: FormData,
) -> AppResult<(StatusCode, Json<PostView>)> {
    let input = PostInput::validate(&mut form, &*state.store).await?;
    let image = store_image(&state, &input.title, input.image).await?;

    let record = state
        .store
        .create_post(NewPost {
            title: input.title,
            content: input.content,
            image,
            creator_id: user.id,
            tag_ids: input.tag_ids,
        })
        .await?;

    tracing::info!(post_id = record.post.id, user_id = user.id, "post created");
    let shape = PostAction::Create.shape();
    Ok((StatusCode::CREATED, Json(render_post(shape, &record, &[]))))
}

async fn get_post(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<PostView>> {
    let record = load_post(&state, &id).await?;
    let comments = state.store.list_comments(record.post.id).await?;
    let shape = PostAction::Retrieve.shape();
    Ok(Json(render_post(shape, &record, &comments)))
}

/// PUT requires a title, PATCH takes any subset of fields.
async fn update_post(
    State(state): State<AppState>,
    user: CurrentUser,
    method: Method,
    Path(id): Path<String>,
    mut form: FormData,
) -> AppResult<Json<PostView>> {
    let record = load_post(&state, &id).await?;
    ensure(can_modify_post(&user, &method, &record.post))?;

    let partial = method == Method::PATCH;
    let patch = PostPatch::validate(&mut form, &*state.store, partial).await?;

    let image = match patch.image {
        Some(Some(file)) => {
            let title = patch.title.as_deref().unwrap_or(&record.post.title);
            Some(store_image(&state, title, Some(file)).await?)
        }
        Some(None) => Some(None),
        None => None,
    };

    let updated = state
        .store
        .update_post(
            record.post.id,
            PostChanges {
                title: patch.title,
                content: patch.content,
                image,
                tag_ids: patch.tag_ids,
            },
        )
        .await?;

    tracing::info!(post_id = updated.post.id, "post updated");
    let shape = PostAction::Update.shape();
    Ok(Json(render_post(shape, &updated, &[])))
}

async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    method: Method,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let record = load_post(&state, &id).await?;
    ensure(can_modify_post(&user, &method, &record.post))?;

    state.store.delete_post(record.post.id).await?;
    tracing::info!(post_id = record.post.id, "post deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn like_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let record = load_post(&state, &id).await?;
    let outcome = relations::toggle(&*state.store, Relation::Likes, user.id, record.post.id).await?;
    state.store.touch_post(record.post.id).await?;

    let message = match outcome {
        ToggleOutcome::Added => "You successfully liked this post.",
        ToggleOutcome::Removed => "You successfully unliked this post.",
    };
    Ok((StatusCode::CREATED, Json(json!({ "message": message }))))
}

async fn schedule_post(
    State(state): State<AppState>,
    user: CurrentUser,
    mut form: FormData,
) -> AppResult<(StatusCode, Json<Value>)> {
    schedule::submit(&*state.store, &*state.scheduler, &mut form, user.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Post scheduled successfully" })),
    ))
}
