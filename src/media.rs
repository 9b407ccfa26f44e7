//! Image storage. Handlers only see [`ImageStore`]: hand it bytes, get back a
//! URL the client can load.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Invalid image data")]
    InvalidDataUrl,

    #[error("Unsupported image type: {0}")]
    UnsupportedType(String),

    #[error("Image is empty")]
    Empty,

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFolder {
    Posts,
    ProfilePictures,
}

impl UploadFolder {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadFolder::Posts => "posts",
            UploadFolder::ProfilePictures => "profile_pictures",
        }
    }
}

/// Raw image bytes plus their declared MIME type.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Decode a `data:image/<type>;base64,<payload>` URL as sent by the
    /// profile editor.
    pub fn from_data_url(url: &str) -> Result<Self, MediaError> {
        let rest = url.strip_prefix("data:").ok_or(MediaError::InvalidDataUrl)?;
        let (meta, payload) = rest.split_once(',').ok_or(MediaError::InvalidDataUrl)?;
        let content_type = meta
            .strip_suffix(";base64")
            .ok_or(MediaError::InvalidDataUrl)?
            .to_string();
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|_| MediaError::InvalidDataUrl)?;
        Ok(Self {
            content_type,
            bytes,
        })
    }

    /// File extension for the declared type, e.g. `png` for `image/png`.
    fn extension(&self) -> Result<&'static str, MediaError> {
        if !self.content_type.starts_with("image/") {
            return Err(MediaError::UnsupportedType(self.content_type.clone()));
        }
        mime_guess::get_mime_extensions_str(&self.content_type)
            .and_then(|exts| {
                // prefer the canonical short form
                exts.iter()
                    .copied()
                    .find(|e| matches!(*e, "png" | "jpg" | "gif" | "webp" | "svg"))
                    .or_else(|| exts.first().copied())
            })
            .ok_or_else(|| MediaError::UnsupportedType(self.content_type.clone()))
    }
}

/// Is `value` an inline image rather than a URL?
pub fn is_data_url(value: &str) -> bool {
    value.starts_with("data:")
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persist the image and return the URL it is served from.
    async fn upload(&self, image: ImageUpload, folder: UploadFolder) -> Result<String, MediaError>;
}

/// Stores images under a local directory that the server exposes at
/// `url_prefix`.
pub struct LocalImageStore {
    root: PathBuf,
    url_prefix: String,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn upload(&self, image: ImageUpload, folder: UploadFolder) -> Result<String, MediaError> {
        if image.bytes.is_empty() {
            return Err(MediaError::Empty);
        }
        let ext = image.extension()?;

        let dir = self.root.join(folder.as_str());
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = format!("{}.{}", uuid::Uuid::now_v7(), ext);
        tokio::fs::write(dir.join(&file_name), &image.bytes).await?;
        tracing::info!(
            "Stored {} byte image as {}/{}",
            image.bytes.len(),
            folder.as_str(),
            file_name
        );

        Ok(format!("{}/{}/{}", self.url_prefix, folder.as_str(), file_name))
    }
}
