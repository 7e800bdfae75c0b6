use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{TryOnError, TryOnResult};

pub const SUPPORTED_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp"];

pub const DEFAULT_RESULT_STEM: &str = "virtual-try-on-result";

/// An image held in memory as base64 payload, MIME type and `data:` URI.
///
/// The three views are fixed at construction and always agree; a new
/// image replaces an old one rather than mutating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    base64: String,
    mime_type: String,
    data_uri: String,
}

impl EncodedImage {
    /// Builds an image from an inline payload returned by the service.
    pub fn from_inline(mime_type: impl Into<String>, base64: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        let base64 = base64.into();
        let data_uri = format!("data:{mime_type};base64,{base64}");
        Self {
            base64,
            mime_type,
            data_uri,
        }
    }

    pub fn base64(&self) -> &str {
        &self.base64
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data_uri(&self) -> &str {
        &self.data_uri
    }

    pub fn bytes(&self) -> TryOnResult<Vec<u8>> {
        BASE64
            .decode(self.base64.as_bytes())
            .map_err(|err| TryOnError::MalformedInput(format!("base64 decode failed: {err}")))
    }

    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }

    /// File name used when the caller does not pick one.
    pub fn default_file_name(&self) -> String {
        format!("{DEFAULT_RESULT_STEM}.{}", self.extension())
    }

    /// Writes the decoded image to `target`. A directory target receives
    /// the default file name.
    pub async fn save(&self, target: &Path) -> TryOnResult<PathBuf> {
        let path = if tokio::fs::metadata(target)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            target.join(self.default_file_name())
        } else {
            target.to_path_buf()
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, self.bytes()?).await?;
        Ok(path)
    }
}

/// Reads an image file from disk.
///
/// The declared type comes from the file extension and is checked before
/// anything is read.
pub async fn encode(path: &Path) -> TryOnResult<EncodedImage> {
    let Some(mime_type) = mime_for_path(path) else {
        return Err(TryOnError::InvalidInput(format!(
            "{} is not an image file",
            path.display()
        )));
    };
    ensure_supported(mime_type)?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| TryOnError::ReadError(format!("{}: {err}", path.display())))?;
    encode_bytes(&bytes, mime_type)
}

/// Encodes content that is already in memory, e.g. a downloaded garment.
pub fn encode_bytes(bytes: &[u8], mime_type: &str) -> TryOnResult<EncodedImage> {
    let mime_type = mime_type.trim().to_ascii_lowercase();
    if !mime_type.starts_with("image/") {
        return Err(TryOnError::InvalidInput(format!(
            "declared type {mime_type:?} is not an image type"
        )));
    }
    ensure_supported(&mime_type)?;
    if bytes.is_empty() {
        return Err(TryOnError::ReadError("file is empty".to_string()));
    }
    Ok(EncodedImage::from_inline(mime_type, BASE64.encode(bytes)))
}

/// Parses a `data:<mime>;base64,<payload>` URI. No I/O.
pub fn decode(data_uri: &str) -> TryOnResult<EncodedImage> {
    let trimmed = data_uri.trim();
    let Some(rest) = trimmed.strip_prefix("data:") else {
        return Err(TryOnError::MalformedInput(
            "expected a data: URI".to_string(),
        ));
    };
    let Some((header, payload)) = rest.split_once(',') else {
        return Err(TryOnError::MalformedInput(
            "data URI has no payload segment".to_string(),
        ));
    };
    if payload.is_empty() {
        return Err(TryOnError::MalformedInput(
            "data URI payload is empty".to_string(),
        ));
    }
    let Some(mime_type) = header.strip_suffix(";base64") else {
        return Err(TryOnError::MalformedInput(
            "data URI is not base64-encoded".to_string(),
        ));
    };
    let mime_type = mime_type.trim();
    if mime_type.is_empty() {
        return Err(TryOnError::MalformedInput(
            "data URI has no MIME type".to_string(),
        ));
    }
    BASE64
        .decode(payload.as_bytes())
        .map_err(|err| TryOnError::MalformedInput(format!("base64 decode failed: {err}")))?;
    Ok(EncodedImage::from_inline(mime_type, payload))
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    "png"
}

fn ensure_supported(mime_type: &str) -> TryOnResult<()> {
    if SUPPORTED_MIME_TYPES.contains(&mime_type) {
        return Ok(());
    }
    Err(TryOnError::InvalidInput(format!(
        "unsupported image type {mime_type}; expected one of {}",
        SUPPORTED_MIME_TYPES.join(", ")
    )))
}
