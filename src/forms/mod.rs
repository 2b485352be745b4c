//! Request bodies and field validation.
//!
//! Write endpoints accept JSON objects, urlencoded forms, or multipart
//! uploads. All three are normalized into [`FormData`] so the typed inputs in
//! the submodules validate one shape and report one error format.

pub mod comment;
pub mod post;
pub mod tag;
pub mod user;

use std::collections::{BTreeMap, HashMap};

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header;
use axum::Form;
use serde::Serialize;

use crate::error::AppError;

pub const REQUIRED: &str = "This field is required.";
pub const BLANK: &str = "This field may not be blank.";

/// Field name → messages, rendered as the body of a 400 response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `Ok(value)` when nothing was recorded.
    pub fn finish<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Bytes,
}

/// Text fields (repeatable) and uploaded files of one request body.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    fields: HashMap<String, Vec<String>>,
    nulls: Vec<String>,
    files: HashMap<String, UploadedFile>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields
            .entry(name.to_string())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_file(mut self, name: &str, file: UploadedFile) -> Self {
        self.files.insert(name.to_string(), file);
        self
    }

    /// Build from a JSON object. Arrays become repeated values and `null`
    /// marks the field as explicitly cleared.
    pub fn from_json(value: serde_json::Value) -> Result<Self, AppError> {
        let serde_json::Value::Object(map) = value else {
            return Err(AppError::BadRequest(
                "Expected a JSON object as the request body".into(),
            ));
        };

        let mut form = Self::default();
        for (name, value) in map {
            match value {
                serde_json::Value::Null => form.nulls.push(name),
                serde_json::Value::Array(items) => {
                    let values = items.into_iter().map(json_scalar).collect();
                    form.fields.insert(name, values);
                }
                other => {
                    form.fields.insert(name, vec![json_scalar(other)]);
                }
            }
        }
        Ok(form)
    }

    /// Whether the client sent the field at all (including as null or file).
    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
            || self.files.contains_key(name)
            || self.nulls.iter().any(|n| n == name)
    }

    pub fn is_null(&self, name: &str) -> bool {
        self.nulls.iter().any(|n| n == name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name)
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        self.files.remove(name)
    }
}

fn json_scalar(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

impl<S> FromRequest<S> for FormData
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            let mut form = Self::default();

            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?
            {
                let name = field.name().unwrap_or_default().to_string();
                match field.file_name().map(str::to_string) {
                    Some(filename) => {
                        let data = field
                            .bytes()
                            .await
                            .map_err(|e| AppError::BadRequest(e.body_text()))?;
                        // An empty file part is what browsers send for "no file".
                        if !data.is_empty() || !filename.is_empty() {
                            form.files.insert(
                                name,
                                UploadedFile {
                                    filename,
                                    data,
                                },
                            );
                        }
                    }
                    None => {
                        let text = field
                            .text()
                            .await
                            .map_err(|e| AppError::BadRequest(e.body_text()))?;
                        form.fields.entry(name).or_default().push(text);
                    }
                }
            }
            return Ok(form);
        }

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            let mut form = Self::default();
            for (name, value) in pairs {
                form.fields.entry(name).or_default().push(value);
            }
            return Ok(form);
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let value: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("JSON parse error - {}", e)))?;
        Self::from_json(value)
    }
}

// --- Field validators ---

/// A required, non-blank text field with a length cap.
pub fn required_text(
    form: &FormData,
    name: &str,
    max_chars: usize,
    errors: &mut FieldErrors,
) -> Option<String> {
    let Some(value) = form.text(name) else {
        errors.add(name, REQUIRED);
        return None;
    };
    let value = value.trim();
    if value.is_empty() {
        errors.add(name, BLANK);
        return None;
    }
    check_length(name, value, max_chars, errors)
}

/// An optional text field; absent or blank yields `None`.
pub fn optional_text(
    form: &FormData,
    name: &str,
    max_chars: usize,
    errors: &mut FieldErrors,
) -> Option<String> {
    let value = form.text(name)?.trim();
    if value.is_empty() {
        return None;
    }
    check_length(name, value, max_chars, errors)
}

fn check_length(
    name: &str,
    value: &str,
    max_chars: usize,
    errors: &mut FieldErrors,
) -> Option<String> {
    if value.chars().count() > max_chars {
        errors.add(
            name,
            format!("Ensure this field has no more than {} characters.", max_chars),
        );
        return None;
    }
    Some(value.to_string())
}

/// Integer ids given as repeated values (JSON array or repeated form field).
pub fn id_list(form: &FormData, name: &str, errors: &mut FieldErrors) -> Option<Vec<i64>> {
    let mut ids = Vec::new();
    for raw in form.values(name) {
        // Multipart clients sometimes send one "1,2" value instead of repeats.
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.parse::<i64>() {
                Ok(id) => {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                Err(_) => {
                    errors.add(
                        name,
                        format!("Incorrect type. Expected pk value, received \"{}\".", part),
                    );
                    return None;
                }
            }
        }
    }
    Some(ids)
}
