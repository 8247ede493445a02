//! Package photo validation and storage
//!
//! Content type is inferred from leading bytes, never from the client's
//! filename or declared MIME. Stored names are freshly generated opaque
//! identifiers; the original filename is kept as metadata only and never
//! influences the path.

use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::error::{Error, Result};

/// An uploaded file as received from the multipart form
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// A validated upload, ready to persist
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    pub original_filename: String,
    /// Path relative to the upload root, `packages/YYYY/MM/<opaque>.<ext>`
    pub relative_path: String,
    pub mime_type: String,
    pub byte_size: u64,
}

/// Detect the image type from magic bytes
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

fn extension_for(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Validate an upload against size and content rules
pub fn validate_upload(config: &UploadConfig, file: &UploadedFile) -> Result<ValidatedUpload> {
    if file.bytes.len() as u64 > config.max_upload_bytes {
        return Err(Error::Validation(format!(
            "File exceeds the maximum size of {} bytes",
            config.max_upload_bytes
        )));
    }

    let mime = sniff_mime(&file.bytes)
        .ok_or_else(|| Error::Validation("File is not a recognized image".into()))?;
    if !config.allowed_types().iter().any(|t| t == mime) {
        return Err(Error::Validation(format!(
            "Image type {} is not allowed",
            mime
        )));
    }

    let ext = extension_for(mime)
        .ok_or_else(|| Error::Validation(format!("Image type {} is not allowed", mime)))?;

    let now = Utc::now();
    let relative_path = format!(
        "packages/{:04}/{:02}/{}.{}",
        now.year(),
        now.month(),
        Uuid::new_v4().simple(),
        ext
    );

    Ok(ValidatedUpload {
        original_filename: sanitize_filename(&file.filename),
        relative_path,
        mime_type: mime.to_string(),
        byte_size: file.bytes.len() as u64,
    })
}

/// Resolve the absolute destination, refusing anything that escapes the root
pub fn destination(config: &UploadConfig, relative_path: &str) -> Result<PathBuf> {
    let relative = Path::new(relative_path);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(Error::Validation("Invalid attachment path".into()));
    }
    Ok(config.dir.join(relative))
}

/// Write validated bytes to disk, creating the dated directory as needed
pub async fn persist(
    config: &UploadConfig,
    upload: &ValidatedUpload,
    bytes: &[u8],
) -> Result<PathBuf> {
    let dest = destination(config, &upload.relative_path)?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&dest, bytes).await?;
    Ok(dest)
}

/// Keep only the final path component of a client-supplied filename
fn sanitize_filename(name: &str) -> String {
    let trimmed = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .to_string();
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00];

    fn webp_bytes() -> Vec<u8> {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&[0x24, 0x00, 0x00, 0x00]);
        bytes.extend_from_slice(b"WEBP");
        bytes.extend_from_slice(b"VP8 ");
        bytes
    }

    #[test]
    fn test_sniff_known_types() {
        assert_eq!(sniff_mime(JPEG), Some("image/jpeg"));
        assert_eq!(sniff_mime(PNG), Some("image/png"));
        assert_eq!(sniff_mime(&webp_bytes()), Some("image/webp"));
        assert_eq!(sniff_mime(b"GIF89a...."), None);
        assert_eq!(sniff_mime(b"<html></html>"), None);
    }

    #[test]
    fn test_extension_never_trusted() {
        let config = UploadConfig::default();
        let file = UploadedFile {
            filename: "totally-a-photo.jpg".into(),
            bytes: b"#!/bin/sh\necho pwned".to_vec(),
        };
        assert!(validate_upload(&config, &file).is_err());
    }

    #[test]
    fn test_size_boundary() {
        let config = UploadConfig {
            max_upload_bytes: 64,
            ..Default::default()
        };

        let mut exact = JPEG.to_vec();
        exact.resize(64, 0);
        let accepted = validate_upload(
            &config,
            &UploadedFile {
                filename: "p.jpg".into(),
                bytes: exact,
            },
        );
        assert!(accepted.is_ok());

        let mut over = JPEG.to_vec();
        over.resize(65, 0);
        let rejected = validate_upload(
            &config,
            &UploadedFile {
                filename: "p.jpg".into(),
                bytes: over,
            },
        );
        assert!(rejected.is_err());
    }

    #[test]
    fn test_stored_path_is_opaque_and_dated() {
        let config = UploadConfig::default();
        let upload = validate_upload(
            &config,
            &UploadedFile {
                filename: "../../etc/passwd.png".into(),
                bytes: PNG.to_vec(),
            },
        )
        .unwrap();

        assert!(upload.relative_path.starts_with("packages/"));
        assert!(upload.relative_path.ends_with(".png"));
        assert!(!upload.relative_path.contains(".."));
        // Original name keeps only the basename
        assert_eq!(upload.original_filename, "passwd.png");
    }

    #[test]
    fn test_destination_rejects_traversal() {
        let config = UploadConfig::default();
        assert!(destination(&config, "packages/2026/08/x.jpg").is_ok());
        assert!(destination(&config, "../outside.jpg").is_err());
        assert!(destination(&config, "/etc/passwd").is_err());
    }

    #[test]
    fn test_allowed_set_respected() {
        let config = UploadConfig {
            allowed_image_types: "image/png".into(),
            ..Default::default()
        };
        let jpeg = UploadedFile {
            filename: "p.jpg".into(),
            bytes: JPEG.to_vec(),
        };
        assert!(validate_upload(&config, &jpeg).is_err());

        let png = UploadedFile {
            filename: "p.png".into(),
            bytes: PNG.to_vec(),
        };
        assert!(validate_upload(&config, &png).is_ok());
    }
}
