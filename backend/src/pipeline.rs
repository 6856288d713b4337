//! Upload → remote analysis → overlay composition, end to end.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use shared::UploadResponse;
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::imaging::codec::{self, CodecError};
use crate::imaging::compositor::{self, ComposeError};
use crate::skin_api::{PollPolicy, SkinAnalysisClient, SourceRef, TaskClientError};
use crate::storage::archive::{ArchiveError, ArchiveFetcher};
use crate::storage::layout::{InvalidIdentifier, ResultLayout};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    TaskClient(#[from] TaskClientError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Identifier(#[from] InvalidIdentifier),
    #[error("No stored original image for {0}")]
    MissingOriginal(String),
    #[error("No composed image for {0}")]
    MissingComposition(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub file_id: String,
    pub url: String,
    pub cached: bool,
    pub composed_path: Option<PathBuf>,
}

impl From<AnalysisOutcome> for UploadResponse {
    fn from(outcome: AnalysisOutcome) -> Self {
        UploadResponse {
            file_id: outcome.file_id,
            url: outcome.url,
        }
    }
}

#[derive(Clone)]
pub struct AnalysisPipeline {
    client: SkinAnalysisClient,
    fetcher: ArchiveFetcher,
    cache: ResultCache,
    actions: BTreeSet<String>,
    poll_policy: PollPolicy,
}

impl AnalysisPipeline {
    pub fn new(
        client: SkinAnalysisClient,
        fetcher: ArchiveFetcher,
        cache: ResultCache,
        actions: BTreeSet<String>,
        poll_policy: PollPolicy,
    ) -> Self {
        Self {
            client,
            fetcher,
            cache,
            actions,
            poll_policy,
        }
    }

    pub fn layout(&self) -> &ResultLayout {
        self.fetcher.layout()
    }

    pub fn api_endpoint(&self) -> &str {
        self.client.endpoint()
    }

    pub async fn api_reachable(&self) -> bool {
        self.client.check_connection().await
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn process_upload(
        &self,
        file_name: &str,
        raw: Vec<u8>,
    ) -> Result<AnalysisOutcome, PipelineError> {
        let png = run_blocking(move || codec::normalize_to_png(&raw)).await?;
        let png_name = png_file_name(file_name);

        let file_id = self.client.upload_file(&png_name, &png).await?;

        let original = self.layout().original_path(&file_id).map_err(|e| {
            TaskClientError::FileUpload(format!("service issued an unusable file id: {}", e))
        })?;
        if let Some(dir) = original.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&original, &png).await?;
        log::info!("Stored original for {} at {}", file_id, original.display());

        self.analyze_file(&file_id).await
    }

    /// Runs the remote analysis for an already uploaded file and composes the
    /// returned overlays onto its stored original.
    pub async fn analyze_file(&self, file_id: &str) -> Result<AnalysisOutcome, PipelineError> {
        let original = self.layout().original_path(file_id)?;

        if let Some(hit) = self.cache.get(file_id) {
            log::info!("Using cached result for {}", file_id);
            return Ok(AnalysisOutcome {
                file_id: file_id.to_string(),
                url: hit.url,
                cached: true,
                composed_path: None,
            });
        }

        if !tokio::fs::try_exists(&original).await? {
            return Err(PipelineError::MissingOriginal(file_id.to_string()));
        }

        let source = SourceRef::FileId(file_id.to_string());
        let result = self
            .client
            .run_task(&source, &self.actions, self.poll_policy)
            .await?;
        let Some(url) = result.results_url().map(str::to_string) else {
            log::error!("Task {} succeeded without a results url", result.task_id);
            return Err(TaskClientError::RemoteTaskFailed {
                task_id: result.task_id,
                payload: result.payload,
            }
            .into());
        };

        let overlay_dir = self.fetcher.fetch_and_extract(file_id, &url).await?;
        let base = tokio::fs::read(&original).await?;
        let dir = overlay_dir.clone();
        run_blocking(move || compositor::compose(&base, &dir)).await?;

        let entry = self.cache.insert(file_id, url);
        Ok(AnalysisOutcome {
            file_id: file_id.to_string(),
            url: entry.url,
            cached: false,
            composed_path: Some(self.layout().composed_path(file_id)?),
        })
    }

    /// Original and composed PNGs previously stored for `file_id`.
    pub async fn stored_images(&self, file_id: &str) -> Result<(Vec<u8>, Vec<u8>), PipelineError> {
        let original = read_if_present(&self.layout().original_path(file_id)?)
            .await?
            .ok_or_else(|| PipelineError::MissingOriginal(file_id.to_string()))?;
        let composed = read_if_present(&self.layout().composed_path(file_id)?)
            .await?
            .ok_or_else(|| PipelineError::MissingComposition(file_id.to_string()))?;
        Ok((original, composed))
    }
}

async fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>, std::io::Error> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn run_blocking<T, E, F>(job: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<PipelineError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))?
        .map_err(Into::into)
}

/// `IMG 01.jpeg` becomes `IMG 01.png`; names without a usable stem get a random one.
fn png_file_name(original: &str) -> String {
    Path::new(original)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.trim().is_empty())
        .map(|stem| format!("{}.png", stem))
        .unwrap_or_else(|| format!("{}.png", Uuid::new_v4()))
}
