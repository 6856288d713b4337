use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use reqwest::Client as HttpClient;

use super::layout::{InvalidIdentifier, ResultLayout, COMPOSED_FILE, ORIGINAL_FILE};
use crate::text::truncate;

/// Maximum size of a single extracted member (25 MB).
const MAX_ENTRY_SIZE: u64 = 25 * 1024 * 1024;

const IMAGE_SUFFIXES: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Archive download failed with status {status}")]
    Download { status: u16, body: String },
    #[error("Archive download failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Not a valid ZIP archive: {0}")]
    Invalid(#[from] zip::result::ZipError),
    #[error("Unsafe path in archive: {0}")]
    UnsafeEntry(String),
    #[error("Archive entry too large: {name} ({size} bytes)")]
    EntryTooLarge { name: String, size: u64 },
    #[error("Archive contains no image members")]
    NoImages,
    #[error(transparent)]
    Identifier(#[from] InvalidIdentifier),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Extraction worker failed: {0}")]
    Worker(String),
}

impl ArchiveError {
    pub fn is_download(&self) -> bool {
        matches!(self, ArchiveError::Download { .. } | ArchiveError::Transport(_))
    }
}

/// Downloads result archives and unpacks their images into the overlay directory.
#[derive(Clone)]
pub struct ArchiveFetcher {
    http_client: HttpClient,
    layout: ResultLayout,
}

impl ArchiveFetcher {
    pub fn new(http_client: HttpClient, layout: ResultLayout) -> Self {
        Self {
            http_client,
            layout,
        }
    }

    pub fn layout(&self) -> &ResultLayout {
        &self.layout
    }

    pub async fn fetch_and_extract(
        &self,
        id: &str,
        archive_url: &str,
    ) -> Result<PathBuf, ArchiveError> {
        let target = self.layout.overlay_dir(id)?;

        log::info!("Downloading result archive for {}", id);
        let response = self.http_client.get(archive_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                "Archive download for {} failed [{}]: {}",
                id,
                status,
                truncate(&body, 512)
            );
            return Err(ArchiveError::Download {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        log::debug!("Archive for {} is {} bytes", id, bytes.len());

        let dir = target.clone();
        let extracted = tokio::task::spawn_blocking(move || extract_images(&bytes, &dir))
            .await
            .map_err(|e| ArchiveError::Worker(e.to_string()))??;

        log::info!(
            "Extracted {} images for {} into {}",
            extracted.len(),
            id,
            target.display()
        );
        Ok(target)
    }
}

/// Writes every image member of `archive` into `target`, flattened by file name.
///
/// All member names are validated before anything is written; a single
/// escaping name rejects the whole archive.
pub fn extract_images(archive: &[u8], target: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;

    let mut members = Vec::new();
    for index in 0..zip.len() {
        let entry = zip.by_index(index)?;
        let name = entry.name().to_string();
        let Some(enclosed) = entry.enclosed_name() else {
            log::warn!("Rejecting archive with unsafe entry {:?}", name);
            return Err(ArchiveError::UnsafeEntry(name));
        };
        if entry.is_dir() || !has_image_suffix(&enclosed) {
            continue;
        }
        let Some(file_name) = enclosed.file_name().map(|n| n.to_owned()) else {
            continue;
        };
        if file_name == ORIGINAL_FILE || file_name == COMPOSED_FILE {
            log::warn!("Skipping archive entry with reserved name {:?}", name);
            continue;
        }
        if entry.size() > MAX_ENTRY_SIZE {
            return Err(ArchiveError::EntryTooLarge {
                name,
                size: entry.size(),
            });
        }
        members.push((index, file_name));
    }

    if members.is_empty() {
        return Err(ArchiveError::NoImages);
    }

    fs::create_dir_all(target)?;
    let mut written = Vec::with_capacity(members.len());
    for (index, file_name) in members {
        let entry = zip.by_index(index)?;
        let declared = entry.size();
        let buffer = read_limited(entry, declared, MAX_ENTRY_SIZE, &file_name.to_string_lossy())?;
        let path = target.join(&file_name);
        if written.contains(&path) {
            log::warn!("Archive entry {:?} overwrites an earlier member", file_name);
        }
        fs::write(&path, &buffer)?;
        written.push(path);
    }
    Ok(written)
}

/// Reads at most `limit` bytes; a member whose actual size exceeds its
/// header is rejected rather than truncated.
fn read_limited<R: Read>(
    reader: R,
    declared: u64,
    limit: u64,
    name: &str,
) -> Result<Vec<u8>, ArchiveError> {
    let mut buffer = Vec::with_capacity(declared.min(limit) as usize);
    reader.take(limit + 1).read_to_end(&mut buffer)?;
    if buffer.len() as u64 > limit {
        log::warn!(
            "Archive entry {:?} inflates past {} bytes (declared {})",
            name,
            limit,
            declared
        );
        return Err(ArchiveError::EntryTooLarge {
            name: name.to_string(),
            size: buffer.len() as u64,
        });
    }
    Ok(buffer)
}

fn has_image_suffix(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_SUFFIXES.iter().any(|s| ext.eq_ignore_ascii_case(s)))
}
