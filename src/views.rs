//! JSON response shapes.
//!
//! Posts render differently per action; [`PostAction::shape`] is the single
//! table deciding which shape an endpoint returns.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::db::models::*;
use crate::media::MediaStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    Create,
    Update,
    List,
    Liked,
    My,
    Followings,
    Retrieve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostShape {
    Summary,
    ListItem,
    Detail,
}

impl PostAction {
    pub fn shape(self) -> PostShape {
        match self {
            PostAction::Create | PostAction::Update => PostShape::Summary,
            PostAction::List | PostAction::Liked | PostAction::My | PostAction::Followings => {
                PostShape::ListItem
            }
            PostAction::Retrieve => PostShape::Detail,
        }
    }
}

pub fn user_url(id: UserId) -> String {
    format!("/user/{}", id)
}

pub fn comments_url(post_id: PostId) -> String {
    format!("/post/{}/comments", post_id)
}

fn image_url(image: &Option<String>) -> Option<String> {
    image.as_deref().map(MediaStore::url_for)
}

#[derive(Debug, Clone, Serialize)]
pub struct PostSummary {
    pub id: PostId,
    pub image: Option<String>,
    pub title: String,
    pub content: String,
    pub tags: Vec<TagId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostListItem {
    pub id: PostId,
    pub image: Option<String>,
    pub title: String,
    pub content: String,
    pub creator: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub count_likes: i64,
    pub comments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    pub id: PostId,
    pub image: Option<String>,
    pub title: String,
    pub content: String,
    pub creator: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub count_likes: i64,
    pub comments: Vec<CommentView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PostView {
    Summary(PostSummary),
    ListItem(PostListItem),
    Detail(PostDetail),
}

/// `comments` is only read for the detail shape.
pub fn render_post(shape: PostShape, record: &PostRecord, comments: &[Comment]) -> PostView {
    let post = &record.post;
    let tag_names = || record.tags.iter().map(|t| t.name.clone()).collect();

    match shape {
        PostShape::Summary => PostView::Summary(PostSummary {
            id: post.id,
            image: image_url(&post.image),
            title: post.title.clone(),
            content: post.content.clone(),
            tags: record.tags.iter().map(|t| t.id).collect(),
            created_at: post.created_at,
        }),
        PostShape::ListItem => PostView::ListItem(PostListItem {
            id: post.id,
            image: image_url(&post.image),
            title: post.title.clone(),
            content: post.content.clone(),
            creator: user_url(post.creator_id),
            tags: tag_names(),
            created_at: post.created_at,
            count_likes: record.count_likes,
            comments: comments_url(post.id),
        }),
        PostShape::Detail => PostView::Detail(PostDetail {
            id: post.id,
            image: image_url(&post.image),
            title: post.title.clone(),
            content: post.content.clone(),
            creator: user_url(post.creator_id),
            tags: tag_names(),
            created_at: post.created_at,
            count_likes: record.count_likes,
            comments: comments.iter().map(CommentView::from).collect(),
        }),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    pub id: CommentId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Comment> for CommentView {
    fn from(comment: &Comment) -> Self {
        Self {
            id: comment.id,
            content: comment.content.clone(),
            created_at: comment.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentListItem {
    pub id: CommentId,
    pub writer: String,
    pub post: PostId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Comment> for CommentListItem {
    fn from(comment: &Comment) -> Self {
        Self {
            id: comment.id,
            writer: user_url(comment.writer_id),
            post: comment.post_id,
            content: comment.content.clone(),
            created_at: comment.created_at,
        }
    }
}

/// Returned by registration.
#[derive(Debug, Clone, Serialize)]
pub struct UserCreated {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub is_staff: bool,
}

impl From<&User> for UserCreated {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            is_staff: user.is_staff,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub username: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub follows: Vec<UserId>,
}

pub fn render_profile(user: &User, follows: Vec<UserId>) -> UserProfile {
    UserProfile {
        id: user.id,
        email: user.email.clone(),
        username: user.username.clone(),
        avatar: image_url(&user.avatar),
        bio: user.bio.clone(),
        birthday: user.birthday,
        follows,
    }
}
