use super::{required_text, FieldErrors, FormData};

pub const NAME_MAX_CHARS: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInput {
    pub name: String,
}

impl TagInput {
    pub fn validate(form: &FormData) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::default();
        match required_text(form, "name", NAME_MAX_CHARS, &mut errors) {
            Some(name) => errors.finish(Self { name }),
            None => Err(errors),
        }
    }
}
