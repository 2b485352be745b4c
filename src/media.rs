//! Uploaded images on local disk.
//!
//! Files live under the media root at `uploads/users/<slug>-<uuid><ext>` and
//! are stored in the database by that relative path.

use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use image::{ImageFormat, ImageReader};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::forms::UploadedFile;
use crate::state::AppState;

pub const UPLOAD_DIR: &str = "uploads/users";
pub const MEDIA_URL: &str = "/media/";

const INVALID_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid media path: {0}")]
    InvalidPath(String),
}

/// Decode `data` completely and return its format. Truncated or corrupt
/// files fail here even when their signature looks right.
pub fn decode_image(data: &[u8]) -> Option<ImageFormat> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?;
    let format = reader.format()?;
    reader.decode().ok()?;
    Some(format)
}

/// The upload must decode as an image and carry an image file extension.
pub fn validate_image(file: &UploadedFile) -> Result<ImageFormat, String> {
    if file.data.is_empty() {
        return Err("The submitted file is empty.".to_string());
    }
    let format = decode_image(&file.data).ok_or_else(|| INVALID_IMAGE.to_string())?;

    let extension = Path::new(&file.filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    if ImageFormat::from_extension(extension).is_none() {
        return Err(format!(
            "File extension \"{}\" is not allowed.",
            extension.to_lowercase()
        ));
    }
    Ok(format)
}

/// URL slug: NFKD-transliterated to ASCII, lowercased, runs of spaces and
/// hyphens collapsed to one hyphen, other punctuation dropped.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.nfkd().filter(char::is_ascii) {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c.to_ascii_lowercase());
        } else if (c == '-' || c.is_ascii_whitespace()) && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches(|c| c == '-' || c == '_').to_string()
}

/// The original extension, case preserved.
fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}

/// Reject absolute paths and anything that climbs out of the media root.
fn safe_relative(path: &str) -> Result<PathBuf, MediaError> {
    let candidate = Path::new(path);
    if candidate
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        Ok(candidate.to_path_buf())
    } else {
        Err(MediaError::InvalidPath(path.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write the upload and return its path relative to the media root.
    pub async fn save(
        &self,
        slug_source: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<String, MediaError> {
        let mut slug = slugify(slug_source);
        if slug.is_empty() {
            slug = "upload".to_string();
        }
        let relative = format!(
            "{}/{}-{}{}",
            UPLOAD_DIR,
            slug,
            uuid::Uuid::new_v4(),
            extension_of(filename)
        );

        let full = self.root.join(&relative);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, data).await?;

        tracing::debug!(path = %relative, bytes = data.len(), "stored upload");
        Ok(relative)
    }

    pub async fn read(&self, relative: &str) -> Result<Option<Vec<u8>>, MediaError> {
        let full = self.root.join(safe_relative(relative)?);
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Public URL for a stored path.
    pub fn url_for(path: &str) -> String {
        format!("{}{}", MEDIA_URL, path)
    }
}

pub async fn serve(State(state): State<AppState>, UrlPath(path): UrlPath<String>) -> Response {
    match state.media.read(&path).await {
        Ok(Some(data)) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, mime.as_ref().to_string()),
                    (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
                ],
                data,
            )
                .into_response()
        }
        Ok(None) | Err(MediaError::InvalidPath(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("Failed to read media {}: {}", path, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// A valid 1x1 PNG for tests.
#[cfg(test)]
pub(crate) fn tiny_png() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbImage::new(1, 1)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
