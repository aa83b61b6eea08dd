//! Image metadata and content hashing.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Extensions the pipeline accepts, lower-case.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// Facts derived from one image source. Computed once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub filename: String,
    /// Filename without extension.
    pub basename: String,
    /// Lower-case extension without the dot.
    pub extension: String,
    /// Sniffed format (e.g. "PNG"), falling back to the extension.
    pub format: String,
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bytes: u64,
    /// Human readable size, e.g. "1.5 MB".
    pub size: String,
    /// SHA-256 of the raw bytes, lower-case hex.
    pub hash: String,
}

impl ImageMetadata {
    /// Derive metadata from bytes already in memory.
    pub fn from_bytes(bytes: &[u8], filename: &str) -> Self {
        let path = Path::new(filename);
        let extension = extension_of(path);
        let basename = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());

        let (detected, dimensions) = sniff(bytes);
        let format = match detected {
            Some(f) => f
                .extensions_str()
                .first()
                .map(|e| e.to_uppercase())
                .unwrap_or_else(|| extension.to_uppercase()),
            None => extension.to_uppercase(),
        };
        let mime_type = match detected {
            Some(f) => f.to_mime_type().to_string(),
            None => mime_for_extension(&extension).to_string(),
        };

        Self {
            filename: filename.to_string(),
            basename,
            extension,
            format,
            mime_type,
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            bytes: bytes.len() as u64,
            size: format_size(bytes.len() as u64),
            hash: sha256_hex(bytes),
        }
    }

    /// "WIDTHxHEIGHT", or empty when the dimensions are unknown.
    pub fn dimensions(&self) -> String {
        match (self.width, self.height) {
            (Some(w), Some(h)) => format!("{}x{}", w, h),
            _ => String::new(),
        }
    }
}

/// Read a file once and derive its metadata.
pub async fn read_image(path: &Path) -> Result<(Vec<u8>, ImageMetadata)> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
        _ => Error::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let metadata = ImageMetadata::from_bytes(&bytes, &filename);
    Ok((bytes, metadata))
}

/// Fail fast when the extension is not on the allow-list.
pub fn ensure_supported(path: &Path) -> Result<String> {
    let extension = extension_of(path);
    if SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(Error::UnsupportedFormat {
            path: PathBuf::from(path),
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                extension
            },
            supported: SUPPORTED_EXTENSIONS.join(", "),
        })
    }
}

pub fn is_supported(path: &Path) -> bool {
    ensure_supported(path).is_ok()
}

pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Format a byte count with binary units ("512 B", "1.5 KB", "3.2 MB").
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Guess the format from magic bytes and read the header dimensions.
/// Corrupt or unknown data yields `None` rather than an error.
fn sniff(bytes: &[u8]) -> (Option<ImageFormat>, Option<(u32, u32)>) {
    let reader = match ImageReader::new(Cursor::new(bytes)).with_guessed_format() {
        Ok(r) => r,
        Err(_) => return (None, None),
    };
    let format = reader.format();
    let dimensions = reader.into_dimensions().ok();
    (format, dimensions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::new(width, height);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn metadata_from_png() {
        let bytes = png_bytes(4, 3);
        let meta = ImageMetadata::from_bytes(&bytes, "Shot.PNG");
        assert_eq!(meta.basename, "Shot");
        assert_eq!(meta.extension, "png");
        assert_eq!(meta.format, "PNG");
        assert_eq!(meta.mime_type, "image/png");
        assert_eq!(meta.dimensions(), "4x3");
        assert_eq!(meta.hash.len(), 64);
    }

    #[test]
    fn corrupt_bytes_have_no_dimensions() {
        let meta = ImageMetadata::from_bytes(b"not an image", "broken.jpg");
        assert_eq!(meta.width, None);
        assert_eq!(meta.format, "JPG");
        assert_eq!(meta.mime_type, "image/jpeg");
        assert_eq!(meta.dimensions(), "");
    }

    #[test]
    fn hash_depends_only_on_content() {
        let a = ImageMetadata::from_bytes(b"same", "a.png");
        let b = ImageMetadata::from_bytes(b"same", "elsewhere/b.gif");
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn allow_list_is_case_insensitive() {
        assert!(is_supported(Path::new("x.JPEG")));
        assert!(is_supported(Path::new("x.webp")));
        assert!(!is_supported(Path::new("x.tiff")));
        assert!(!is_supported(Path::new("noext")));
    }

    #[test]
    fn unsupported_error_names_extension() {
        let err = ensure_supported(Path::new("scan.bmp")).unwrap_err();
        assert!(err.to_string().contains("bmp"));
        assert!(err.is_preflight());
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = read_image(Path::new("/definitely/not/here.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
