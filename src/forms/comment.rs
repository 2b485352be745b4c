use super::{required_text, FieldErrors, FormData};

pub const CONTENT_MAX_CHARS: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentInput {
    pub content: String,
}

impl CommentInput {
    pub fn validate(form: &FormData) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::default();
        let content = required_text(form, "content", CONTENT_MAX_CHARS, &mut errors);
        match content {
            Some(content) => errors.finish(Self { content }),
            None => Err(errors),
        }
    }

    /// PATCH without `content` changes nothing.
    pub fn validate_patch(form: &FormData, partial: bool) -> Result<Option<Self>, FieldErrors> {
        if partial && !form.has("content") {
            return Ok(None);
        }
        Self::validate(form).map(Some)
    }
}
