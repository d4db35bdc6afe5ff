//! Asset Loader - Raster Images as Inline Data
//!
//! Assets are read fully into memory before binding. Nothing is resolved at
//! render time.

use std::fs;
use std::path::Path;

use base64::Engine;

use crate::error::{PipelineError, ResourceKind, Result};

pub const LOGO_FILE: &str = "logo.png";
pub const QR_FILE: &str = "qr-code.png";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedAsset {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl EmbeddedAsset {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Reads the whole file. A missing file is `ResourceNotFound`.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).map_err(|e| PipelineError::from_read(ResourceKind::Asset, path, e))?;
        log::debug!("Loaded asset {} ({} bytes)", path.display(), bytes.len());
        Ok(Self::new(mime_for_path(path), bytes))
    }

    /// Self-contained `data:` reference.
    pub fn data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// The two images every kit document embeds.
#[derive(Debug, Clone)]
pub struct AssetSet {
    pub logo: EmbeddedAsset,
    pub qr: EmbeddedAsset,
}

impl AssetSet {
    /// Loads `logo.png` and `qr-code.png` from `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load(&dir.join(LOGO_FILE), &dir.join(QR_FILE))
    }

    pub fn load(logo: &Path, qr: &Path) -> Result<Self> {
        Ok(Self {
            logo: EmbeddedAsset::load(logo)?,
            qr: EmbeddedAsset::load(qr)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_uri_is_inline() {
        let asset = EmbeddedAsset::new("image/png", vec![0x89, b'P', b'N', b'G']);
        assert_eq!(asset.data_uri(), "data:image/png;base64,iVBORw==");
        assert!(asset.is_image());
    }

    #[test]
    fn test_missing_asset_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = AssetSet::load_from_dir(dir.path()).unwrap_err();
        assert!(err.is_resource_not_found());
        assert!(err.to_string().contains(LOGO_FILE));
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOGO_FILE), b"logo").unwrap();
        fs::write(dir.path().join(QR_FILE), b"qr").unwrap();

        let set = AssetSet::load_from_dir(dir.path()).unwrap();
        assert_eq!(set.logo.bytes, b"logo");
        assert_eq!(set.qr.mime_type, "image/png");
    }

    #[test]
    fn test_mime_by_extension() {
        assert_eq!(mime_for_path(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("a.svg")), "image/svg+xml");
        assert_eq!(mime_for_path(Path::new("a")), "application/octet-stream");
    }
}
