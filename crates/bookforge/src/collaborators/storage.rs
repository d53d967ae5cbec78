use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{ArtifactKind, CollaboratorError, ObjectStore};

/// Stores artifacts on the local filesystem at `<root>/<book_id>/<file>`
/// and hands out `file://` URLs.
pub struct FileSystemStore {
    root: PathBuf,
}

impl FileSystemStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where an artifact of `kind` for `book_id` lives.
    pub fn artifact_path(&self, book_id: &str, kind: ArtifactKind) -> Result<PathBuf, CollaboratorError> {
        validate_key(book_id)?;
        Ok(self.root.join(book_id).join(kind.file_name()))
    }
}

/// Book ids become directory names; only plain identifiers are allowed.
fn validate_key(book_id: &str) -> Result<(), CollaboratorError> {
    let valid = !book_id.is_empty()
        && book_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(CollaboratorError::InvalidKey(book_id.to_string()));
    }
    Ok(())
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[async_trait]
impl ObjectStore for FileSystemStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        book_id: &str,
        kind: ArtifactKind,
    ) -> Result<String, CollaboratorError> {
        let path = self.artifact_path(book_id, kind)?;
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CollaboratorError::Storage {
                path: dir.clone(),
                source: e,
            })?;

        // Write next to the target and rename, so a reader never sees a
        // half-written file and a retried upload simply replaces it.
        let tmp = dir.join(format!(".{}.tmp", kind.file_name()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| CollaboratorError::Storage {
                path: tmp.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CollaboratorError::Storage {
                path: path.clone(),
                source: e,
            })?;

        log::debug!("Stored {} bytes at {}", bytes.len(), path.display());

        // Absolute URL even when the configured root is relative.
        let absolute = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        Ok(file_url(&absolute))
    }
}
