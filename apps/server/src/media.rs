//! Post media: type classification, size limits, and the on-disk store that
//! backs the `/media` static route.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_VIDEO_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Unsupported media type '{0}'. Use JPEG, PNG, GIF, WebP, MP4, WebM or MOV")]
    UnsupportedType(String),
    #[error("File size too large: {actual} bytes (maximum {limit})")]
    TooLarge { limit: usize, actual: usize },
    #[error("Uploaded file is empty")]
    Empty,
    #[error("Invalid media path '{0}'")]
    InvalidPath(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    None,
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::None => "none",
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }

    pub fn max_bytes(self) -> usize {
        match self {
            MediaType::None => 0,
            MediaType::Image => MAX_IMAGE_BYTES,
            MediaType::Video => MAX_VIDEO_BYTES,
        }
    }
}

/// Maps a `Content-Type` to the media type and the file extension it is
/// stored under.
pub fn classify(content_type: &str) -> Result<(MediaType, &'static str), MediaError> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let kind = match essence.as_str() {
        "image/jpeg" => (MediaType::Image, "jpg"),
        "image/png" => (MediaType::Image, "png"),
        "image/gif" => (MediaType::Image, "gif"),
        "image/webp" => (MediaType::Image, "webp"),
        "video/mp4" => (MediaType::Video, "mp4"),
        "video/webm" => (MediaType::Video, "webm"),
        "video/mov" | "video/quicktime" => (MediaType::Video, "mov"),
        _ => return Err(MediaError::UnsupportedType(essence)),
    };
    Ok(kind)
}

pub fn check_size(kind: MediaType, len: usize) -> Result<(), MediaError> {
    if len == 0 {
        return Err(MediaError::Empty);
    }
    let limit = kind.max_bytes();
    if len > limit {
        return Err(MediaError::TooLarge { limit, actual: len });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub kind: MediaType,
    /// Path relative to the store root, always `/`-separated.
    pub path: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    public_base: String,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>, public_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base: format!("{}/media", public_url.trim_end_matches('/')),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn relative_path(user_id: Uuid, post_id: Uuid, millis: i64, ext: &str) -> String {
        format!("posts/{user_id}/{post_id}/{millis}.{ext}")
    }

    pub async fn save(
        &self,
        user_id: Uuid,
        post_id: Uuid,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<StoredMedia, MediaError> {
        let (kind, ext) = classify(content_type)?;
        check_size(kind, bytes.len())?;

        let path = Self::relative_path(user_id, post_id, Utc::now().timestamp_millis(), ext);
        let full = self.root.join(&path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;

        tracing::info!(
            component = "media",
            %user_id,
            %post_id,
            kind = kind.as_str(),
            size = bytes.len(),
            path = %path,
            "stored post media"
        );

        Ok(StoredMedia {
            kind,
            url: format!("{}/{}", self.public_base, path),
            path,
        })
    }

    /// Deletes a stored file. A file that is already gone is not an error.
    pub async fn remove(&self, path: &str) -> Result<(), MediaError> {
        if path.split('/').any(|segment| segment == ".." || segment.is_empty()) {
            return Err(MediaError::InvalidPath(path.to_string()));
        }
        match tokio::fs::remove_file(self.root.join(path)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes a freshly saved file when the step that should reference it
    /// failed, then hands the result back unchanged.
    pub async fn discard_on_error<T, E: std::fmt::Display>(
        &self,
        stored: &StoredMedia,
        result: Result<T, E>,
    ) -> Result<T, E> {
        if let Err(err) = &result {
            tracing::warn!(component = "media", path = %stored.path, error = %err, "discarding orphaned media");
            if let Err(remove_err) = self.remove(&stored.path).await {
                tracing::warn!(component = "media", path = %stored.path, error = %remove_err, "failed to discard media");
            }
        }
        result
    }
}
