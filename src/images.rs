use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Where room pictures live. Uploading is someone else's job; the engine only
/// checks references and cleans up files it no longer points to.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Reject references that are not a relative image path.
    fn validate(&self, reference: &str) -> Result<(), String>;

    /// Remove a stored image. `NotFound` is reported as an error; callers treat it as benign.
    async fn remove(&self, reference: &str) -> io::Result<()>;
}

pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

pub fn validate_reference(reference: &str) -> Result<(), String> {
    if reference.is_empty() {
        return Err("empty image reference".into());
    }
    let path = Path::new(reference);
    if !path
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(format!("image reference must be a relative path: {reference}"));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(format!("unsupported image type: {reference}"));
    }
    Ok(())
}

#[async_trait]
impl ImageStore for FsImageStore {
    fn validate(&self, reference: &str) -> Result<(), String> {
        validate_reference(reference)
    }

    async fn remove(&self, reference: &str) -> io::Result<()> {
        validate_reference(reference).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        tokio::fs::remove_file(self.root.join(reference)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn accepts_relative_images() {
        assert_ok!(validate_reference("rooms/101/front.jpg"));
        assert_ok!(validate_reference("a.PNG"));
    }

    #[test]
    fn rejects_traversal_and_other_types() {
        assert_err!(validate_reference("../etc/passwd.jpg"));
        assert_err!(validate_reference("/abs/pic.png"));
        assert_err!(validate_reference("notes.txt"));
        assert_err!(validate_reference("noext"));
        assert_err!(validate_reference(""));
    }

    #[tokio::test]
    async fn remove_deletes_file_and_reports_missing() {
        let dir = std::env::temp_dir().join(format!("innkeep_test_images_{}", ulid::Ulid::new()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("pic.jpg"), b"jpeg").unwrap();

        let store = FsImageStore::new(dir.clone());
        store.remove("pic.jpg").await.unwrap();
        assert!(!dir.join("pic.jpg").exists());

        let err = store.remove("pic.jpg").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
