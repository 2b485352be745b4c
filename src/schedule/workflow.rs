//! Request-time half of scheduled post creation: validate, build a
//! serializable payload, hand it to the scheduler.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::queue::{QueueError, Task, TaskId, TaskScheduler};
use crate::db::models::{TagId, UserId};
use crate::error::AppError;
use crate::forms::post::{FormError, PostInput, ScheduleInput};
use crate::forms::{FieldErrors, FormData, UploadedFile};
use crate::repository::{RepositoryError, TagRepository};

/// An uploaded image carried inside a task payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    pub filename: String,
    /// Standard-alphabet base64
    pub data: String,
}

impl EncodedImage {
    pub fn encode(file: &UploadedFile) -> Self {
        Self {
            filename: file.filename.clone(),
            data: STANDARD.encode(&file.data),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledPostPayload {
    pub title: String,
    pub content: String,
    pub creator_id: UserId,
    pub tag_ids: Vec<TagId>,
    pub image: Option<EncodedImage>,
}

impl ScheduledPostPayload {
    pub fn from_input(input: PostInput, creator_id: UserId) -> Self {
        Self {
            image: input.image.as_ref().map(EncodedImage::encode),
            title: input.title,
            content: input.content,
            creator_id,
            tag_ids: input.tag_ids,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("rejected: {0:?}")]
    Rejected(FieldErrors),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<FormError> for ScheduleError {
    fn from(err: FormError) -> Self {
        match err {
            FormError::Invalid(errors) => ScheduleError::Rejected(errors),
            FormError::Repository(e) => ScheduleError::Repository(e),
        }
    }
}

impl From<ScheduleError> for AppError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::Rejected(errors) => AppError::Validation(errors),
            ScheduleError::Repository(e) => e.into(),
            ScheduleError::Queue(e) => AppError::Queue(e),
        }
    }
}

/// Validate a schedule request and queue post creation for `creator_id`.
/// Nothing is queued when validation fails.
pub async fn submit<R, S>(
    repo: &R,
    scheduler: &S,
    form: &mut FormData,
    creator_id: UserId,
) -> Result<TaskId, ScheduleError>
where
    R: TagRepository + ?Sized,
    S: TaskScheduler + ?Sized,
{
    let ScheduleInput { post, run_at } = ScheduleInput::validate(form, repo).await?;
    let payload = ScheduledPostPayload::from_input(post, creator_id);
    let id = scheduler.schedule(Task::CreatePost(payload), run_at).await?;
    Ok(id)
}
