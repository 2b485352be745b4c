use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

use super::{id_list, required_text, FieldErrors, FormData, UploadedFile, BLANK, REQUIRED};
use crate::db::models::TagId;
use crate::error::AppError;
use crate::media;
use crate::repository::{RepositoryError, TagRepository};

pub const TITLE_MAX_CHARS: usize = 150;

/// Format of `scheduled_time`, read as local wall-clock time.
pub const SCHEDULE_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, thiserror::Error)]
pub enum FormError {
    #[error("invalid fields: {0:?}")]
    Invalid(FieldErrors),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<FieldErrors> for FormError {
    fn from(errors: FieldErrors) -> Self {
        FormError::Invalid(errors)
    }
}

impl From<FormError> for AppError {
    fn from(err: FormError) -> Self {
        match err {
            FormError::Invalid(errors) => AppError::Validation(errors),
            FormError::Repository(e) => e.into(),
        }
    }
}

/// A complete post as submitted for creation.
#[derive(Debug, Clone)]
pub struct PostInput {
    pub title: String,
    pub content: String,
    pub tag_ids: Vec<TagId>,
    pub image: Option<UploadedFile>,
}

/// Changes requested by PUT/PATCH. `image: Some(None)` clears the image.
#[derive(Debug, Clone, Default)]
pub struct PostPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tag_ids: Option<Vec<TagId>>,
    pub image: Option<Option<UploadedFile>>,
}

/// A post plus the time it should be created at.
#[derive(Debug, Clone)]
pub struct ScheduleInput {
    pub post: PostInput,
    pub run_at: DateTime<Utc>,
}

fn content_field(form: &FormData) -> Option<String> {
    form.text("content").map(|c| c.to_string())
}

fn image_field(form: &mut FormData, errors: &mut FieldErrors) -> Option<UploadedFile> {
    let file = form.take_file("image")?;
    if let Err(msg) = media::validate_image(&file) {
        errors.add("image", msg);
        return None;
    }
    Some(file)
}

fn tag_field(form: &FormData, errors: &mut FieldErrors) -> Option<Vec<TagId>> {
    if !form.has("tags") {
        return None;
    }
    id_list(form, "tags", errors)
}

async fn check_tags_exist<R: TagRepository + ?Sized>(
    repo: &R,
    tag_ids: &[TagId],
    errors: &mut FieldErrors,
) -> Result<(), RepositoryError> {
    for id in repo.missing_tags(tag_ids).await? {
        errors.add("tags", format!("Invalid pk \"{}\" - object does not exist.", id));
    }
    Ok(())
}

pub fn parse_scheduled_time(raw: &str) -> Result<DateTime<Utc>, String> {
    let wrong_format = || {
        "Datetime has wrong format. Use one of these formats instead: YYYY-MM-DDThh:mm."
            .to_string()
    };
    let naive = NaiveDateTime::parse_from_str(raw.trim(), SCHEDULE_FORMAT)
        .map_err(|_| wrong_format())?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| format!("\"{}\" does not exist in the server time zone.", raw))
}

impl PostInput {
    pub async fn validate<R: TagRepository + ?Sized>(
        form: &mut FormData,
        repo: &R,
    ) -> Result<Self, FormError> {
        let mut errors = FieldErrors::default();
        let input = Self::collect(form, &mut errors);
        if let Some(input) = &input {
            check_tags_exist(repo, &input.tag_ids, &mut errors).await?;
        }
        match input {
            Some(input) => Ok(errors.finish(input)?),
            None => Err(errors.into()),
        }
    }

    fn collect(form: &mut FormData, errors: &mut FieldErrors) -> Option<Self> {
        let title = required_text(form, "title", TITLE_MAX_CHARS, errors);
        let content = content_field(form).unwrap_or_default();
        let tag_ids = tag_field(form, errors);
        let image = image_field(form, errors);

        if !errors.is_empty() {
            return None;
        }
        Some(Self {
            title: title?,
            content,
            tag_ids: tag_ids.unwrap_or_default(),
            image,
        })
    }
}

impl PostPatch {
    /// `partial` is PATCH semantics; PUT still requires a title.
    pub async fn validate<R: TagRepository + ?Sized>(
        form: &mut FormData,
        repo: &R,
        partial: bool,
    ) -> Result<Self, FormError> {
        let mut errors = FieldErrors::default();

        let title = if partial && !form.has("title") {
            None
        } else {
            required_text(form, "title", TITLE_MAX_CHARS, &mut errors)
        };
        let content = content_field(form);
        let tag_ids = tag_field(form, &mut errors);
        let image = if form.is_null("image") {
            Some(None)
        } else {
            image_field(form, &mut errors).map(Some)
        };

        if let Some(ids) = &tag_ids {
            check_tags_exist(repo, ids, &mut errors).await?;
        }

        Ok(errors.finish(Self {
            title,
            content,
            tag_ids,
            image,
        })?)
    }
}

impl ScheduleInput {
    pub async fn validate<R: TagRepository + ?Sized>(
        form: &mut FormData,
        repo: &R,
    ) -> Result<Self, FormError> {
        let mut errors = FieldErrors::default();

        let run_at = match form.text("scheduled_time").map(str::trim) {
            None => {
                errors.add("scheduled_time", REQUIRED);
                None
            }
            Some("") => {
                errors.add("scheduled_time", BLANK);
                None
            }
            Some(raw) => match parse_scheduled_time(raw) {
                Ok(at) => Some(at),
                Err(msg) => {
                    errors.add("scheduled_time", msg);
                    None
                }
            },
        };

        let post = PostInput::collect(form, &mut errors);
        if let Some(post) = &post {
            check_tags_exist(repo, &post.tag_ids, &mut errors).await?;
        }

        match (post, run_at) {
            (Some(post), Some(run_at)) => Ok(errors.finish(Self { post, run_at })?),
            _ => Err(errors.into()),
        }
    }
}
