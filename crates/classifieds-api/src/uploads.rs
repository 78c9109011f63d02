//! Listing image uploads: content checks and on-disk storage.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageFormat, ImageReader};
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{AppError, FieldErrors};

const DANGEROUS_EXTENSIONS: [&str; 11] = [
    "php", "phtml", "php3", "php4", "php5", "pl", "py", "jsp", "asp", "sh", "cgi",
];

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("File upload failed")]
    Empty,
    #[error("File size exceeds maximum allowed size")]
    TooLarge,
    #[error("Executable files are not allowed")]
    DangerousExtension,
    #[error("File type not allowed")]
    UnsupportedType,
    #[error("Invalid image file")]
    InvalidImage,
    #[error("image storage failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Io(e) => AppError::Internal(e.into()),
            other => {
                let mut fields = FieldErrors::new();
                fields.insert("image", other.to_string());
                AppError::Fields(fields)
            }
        }
    }
}

/// An upload that passed validation. `extension` comes from the sniffed
/// content, never from the client's filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageKind {
    pub extension: &'static str,
}

pub fn validate_image(filename: &str, bytes: &[u8], max_bytes: usize) -> Result<ImageKind, UploadError> {
    if bytes.is_empty() {
        return Err(UploadError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(UploadError::TooLarge);
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if DANGEROUS_EXTENSIONS.contains(&extension.as_str()) {
        warn!(target: "security", filename, "Attempt to upload executable file");
        return Err(UploadError::DangerousExtension);
    }

    let kind = match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => ImageKind { extension: "jpg" },
        Ok(ImageFormat::Png) => ImageKind { extension: "png" },
        Ok(ImageFormat::Gif) => ImageKind { extension: "gif" },
        Ok(ImageFormat::WebP) => ImageKind { extension: "webp" },
        _ => return Err(UploadError::UnsupportedType),
    };

    // The header must actually decode, not just carry the right magic bytes.
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|_| UploadError::InvalidImage)?
        .into_dimensions()
        .map_err(|_| UploadError::InvalidImage)?;

    Ok(kind)
}

/// Uploaded images, stored flat under one directory as `{uuid}.{ext}`.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the image and returns the generated filename.
    pub async fn save(&self, kind: ImageKind, bytes: &[u8]) -> Result<String, UploadError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            error!("Failed to create upload directory {}: {}", self.dir.display(), e);
            e
        })?;

        let filename = format!("{}.{}", Uuid::new_v4(), kind.extension);
        let path = self.dir.join(&filename);
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            error!("Failed to write image {}: {}", path.display(), e);
            e
        })?;
        Ok(filename)
    }

    /// Removes a stored image. A file that is already gone is not an error.
    pub async fn delete(&self, filename: &str) {
        // Only names this store generated are ever touched.
        if filename.contains(['/', '\\']) || filename.starts_with('.') {
            warn!(target: "security", filename, "Refusing to delete suspicious image path");
            return;
        }
        let path = self.dir.join(filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!("Failed to delete image {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image::RgbImage::new(2, 2)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn accepts_real_png() {
        let kind = validate_image("photo.PNG", &png_bytes(), 1024 * 1024).unwrap();
        assert_eq!(kind.extension, "png");
    }

    #[test]
    fn rejects_executable_extensions_even_with_image_content() {
        assert!(matches!(
            validate_image("shell.php", &png_bytes(), 1024 * 1024),
            Err(UploadError::DangerousExtension)
        ));
    }

    #[test]
    fn rejects_empty_oversized_and_non_images() {
        assert!(matches!(validate_image("a.png", &[], 10), Err(UploadError::Empty)));
        assert!(matches!(
            validate_image("a.png", &png_bytes(), 8),
            Err(UploadError::TooLarge)
        ));
        assert!(matches!(
            validate_image("a.png", b"%PDF-1.7 not an image", 1024),
            Err(UploadError::UnsupportedType)
        ));
    }

    #[test]
    fn rejects_truncated_image() {
        let bytes = png_bytes();
        assert!(matches!(
            validate_image("a.png", &bytes[..12], 1024),
            Err(UploadError::InvalidImage)
        ));
    }

    #[test]
    fn validation_errors_map_to_image_field() {
        match AppError::from(UploadError::UnsupportedType) {
            AppError::Fields(fields) => assert_eq!(fields["image"], "File type not allowed"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn store_saves_and_deletes() {
        let dir = std::env::temp_dir().join(format!("classifieds-uploads-{}", Uuid::new_v4()));
        let store = ImageStore::new(&dir);
        let kind = validate_image("a.png", &png_bytes(), 1024 * 1024).unwrap();

        let name = store.save(kind, &png_bytes()).await.unwrap();
        assert!(name.ends_with(".png"));
        assert!(dir.join(&name).exists());

        store.delete(&name).await;
        assert!(!dir.join(&name).exists());
        // Deleting twice is harmless.
        store.delete(&name).await;

        let _ = std::fs::remove_dir_all(&dir);
    }
}
