use std::path::{Path, PathBuf};

/// Normalized upload stored next to the overlays.
pub const ORIGINAL_FILE: &str = "original.png";
/// Output of the overlay compositor.
pub const COMPOSED_FILE: &str = "overlayed.png";

#[derive(Debug, thiserror::Error)]
#[error("Invalid identifier: {0:?}")]
pub struct InvalidIdentifier(pub String);

/// Maps remote file identifiers to `<root>/<id>/<subdir>` on disk.
#[derive(Debug, Clone)]
pub struct ResultLayout {
    root: PathBuf,
    subdir: String,
}

impl ResultLayout {
    pub fn new(root: impl Into<PathBuf>, subdir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            subdir: subdir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remote ids are base64-like and may carry `/`. `_` is the escape
    /// character, so `/` becomes `_2F` and `_` becomes `_5F`, keeping distinct
    /// ids in distinct directories.
    pub fn directory_name(id: &str) -> Result<String, InvalidIdentifier> {
        let valid = !id.is_empty()
            && id.len() <= 256
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '=' | '_' | '-' | '/'));
        if !valid {
            return Err(InvalidIdentifier(id.to_string()));
        }
        Ok(id.replace('_', "_5F").replace('/', "_2F"))
    }

    pub fn task_dir(&self, id: &str) -> Result<PathBuf, InvalidIdentifier> {
        Ok(self.root.join(Self::directory_name(id)?))
    }

    pub fn overlay_dir(&self, id: &str) -> Result<PathBuf, InvalidIdentifier> {
        Ok(self.task_dir(id)?.join(&self.subdir))
    }

    pub fn original_path(&self, id: &str) -> Result<PathBuf, InvalidIdentifier> {
        Ok(self.overlay_dir(id)?.join(ORIGINAL_FILE))
    }

    pub fn composed_path(&self, id: &str) -> Result<PathBuf, InvalidIdentifier> {
        Ok(self.overlay_dir(id)?.join(COMPOSED_FILE))
    }
}
