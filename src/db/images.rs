use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::Url;

use crate::error::StoreError;
use crate::models::ImageUpload;

/// Directory next to the database where the host keeps uploaded images.
#[derive(Debug, Clone)]
pub struct ImageDir {
    root: PathBuf,
}

impl ImageDir {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create image directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the image under a fresh name and return its `file://` URL.
    pub fn store(&self, image: &ImageUpload) -> Result<String> {
        let path = self.root.join(image.storage_name());
        std::fs::write(&path, &image.bytes)
            .with_context(|| format!("Failed to write image {}", path.display()))?;

        let absolute = std::fs::canonicalize(&path)?;
        let url = Url::from_file_path(&absolute)
            .map_err(|_| StoreError::InvalidUrl(absolute.display().to_string()))?;
        tracing::debug!("Stored image at {}", absolute.display());
        Ok(url.to_string())
    }

    /// Remove the image a URL refers to. Only the final path segment is used,
    /// so a URL can never reach outside this directory. Missing files are ignored.
    pub fn remove(&self, url: &str) -> Result<()> {
        let Some(name) = file_name_from_url(url) else {
            tracing::debug!("Ignoring delete of unrecognized image URL {}", url);
            return Ok(());
        };

        let path = self.root.join(&name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Removed image {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn file_name_from_url(url: &str) -> Option<String> {
    let last = match Url::parse(url) {
        Ok(parsed) => parsed.path_segments()?.last()?.to_string(),
        Err(_) => url.rsplit(['/', '\\']).next()?.to_string(),
    };

    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_last_segment() {
        assert_eq!(
            file_name_from_url("file:///data/images/abc.png").as_deref(),
            Some("abc.png")
        );
        assert_eq!(file_name_from_url("abc.png").as_deref(), Some("abc.png"));
        assert_eq!(file_name_from_url("file:///data/images/"), None);
        assert_eq!(file_name_from_url("../.."), None);
    }

    #[test]
    fn store_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let images = ImageDir::open(dir.path().join("images")).unwrap();

        let url = images
            .store(&ImageUpload::new("photo.PNG", vec![1, 2, 3]))
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with(".png"));

        let stored: Vec<_> = std::fs::read_dir(images.root()).unwrap().collect();
        assert_eq!(stored.len(), 1);

        images.remove(&url).unwrap();
        assert_eq!(std::fs::read_dir(images.root()).unwrap().count(), 0);

        // Second delete is a no-op
        images.remove(&url).unwrap();
    }
}
