//! Repository pattern: every database side effect goes through these traits.
//!
//! One trait per entity. Handlers hold a [`DynRepository`]; the relation and
//! scheduling logic is generic over just the traits it needs so it can run
//! against fakes in tests.

mod sqlite;

pub use sqlite::SqliteRepository;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::models::*;
use crate::filters::{PageRequest, PostFilter, UserFilter};
use crate::relations::EdgeStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    async fn count_users(&self, filter: &UserFilter) -> Result<i64, RepositoryError>;

    /// One page of users ordered by email.
    async fn list_users(
        &self,
        filter: &UserFilter,
        page: &PageRequest,
    ) -> Result<Vec<User>, RepositoryError>;

    async fn update_user(&self, id: UserId, changes: UserChanges) -> Result<User, RepositoryError>;

    /// Hard delete; posts, comments, tokens and edges cascade.
    async fn delete_user(&self, id: UserId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Store `candidate` as the user's token unless one already exists, and
    /// return whichever key is now on record.
    async fn get_or_create_token(
        &self,
        user_id: UserId,
        candidate: &str,
    ) -> Result<String, RepositoryError>;

    async fn user_for_token(&self, key: &str) -> Result<Option<User>, RepositoryError>;

    async fn delete_token(&self, key: &str) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Insert a post and its tag edges in one transaction.
    async fn create_post(&self, post: NewPost) -> Result<PostRecord, RepositoryError>;

    /// Insert a bare post row, without tags.
    async fn insert_post(
        &self,
        title: &str,
        content: &str,
        image: Option<&str>,
        creator_id: UserId,
    ) -> Result<Post, RepositoryError>;

    /// `NotFound` if the post or the tag does not exist.
    async fn attach_tag(&self, post_id: PostId, tag_id: TagId) -> Result<(), RepositoryError>;

    /// Re-save a post, refreshing `created_at`.
    async fn touch_post(&self, id: PostId) -> Result<(), RepositoryError>;

    async fn find_post(&self, id: PostId) -> Result<Option<PostRecord>, RepositoryError>;

    async fn count_posts(&self, filter: &PostFilter) -> Result<i64, RepositoryError>;

    async fn list_posts(
        &self,
        filter: &PostFilter,
        page: &PageRequest,
    ) -> Result<Vec<PostRecord>, RepositoryError>;

    async fn update_post(
        &self,
        id: PostId,
        changes: PostChanges,
    ) -> Result<PostRecord, RepositoryError>;

    async fn delete_post(&self, id: PostId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait TagRepository: Send + Sync {
    async fn create_tag(&self, name: &str) -> Result<Tag, RepositoryError>;

    async fn list_tags(&self) -> Result<Vec<Tag>, RepositoryError>;

    /// The ids among `ids` that have no tag row, in input order.
    async fn missing_tags(&self, ids: &[TagId]) -> Result<Vec<TagId>, RepositoryError>;
}

#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn create_comment(&self, comment: NewComment) -> Result<Comment, RepositoryError>;

    async fn find_comment(&self, id: CommentId) -> Result<Option<Comment>, RepositoryError>;

    /// Comments of a post, oldest first.
    async fn list_comments(&self, post_id: PostId) -> Result<Vec<Comment>, RepositoryError>;

    /// Replace the content, refreshing `created_at`.
    async fn update_comment(
        &self,
        id: CommentId,
        content: &str,
    ) -> Result<Comment, RepositoryError>;

    async fn delete_comment(&self, id: CommentId) -> Result<bool, RepositoryError>;
}

/// Everything the HTTP layer needs from storage.
pub trait Repository:
    UserRepository + TokenRepository + PostRepository + TagRepository + CommentRepository + EdgeStore
{
}

impl<T> Repository for T where
    T: UserRepository
        + TokenRepository
        + PostRepository
        + TagRepository
        + CommentRepository
        + EdgeStore
{
}

pub type DynRepository = Arc<dyn Repository>;
