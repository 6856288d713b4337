use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::UploadResponse;
use std::path::{Path, PathBuf};

use crate::imaging::codec::CodecError;
use crate::imaging::compositor::ComposeError;
use crate::pipeline::{AnalysisPipeline, PipelineError};
use crate::recommendations::{RecommendationError, RecommendationRequester};
use crate::skin_api::TaskClientError;
use crate::storage::archive::ArchiveError;

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_json(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: message.into(),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_bytes: usize,
}

#[derive(Deserialize)]
pub struct FileIdQuery {
    file_id: Option<String>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, results_dir: PathBuf) {
    cfg.service(web::resource("/upload/hero-image").route(web::post().to(upload_hero_image)))
        .service(web::resource("/recommendations").route(web::get().to(recommendations)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(Files::new("/results", results_dir));
}

#[derive(Debug)]
enum UploadError {
    MissingFile,
    MissingFilename,
    EmptyFile,
    InvalidExtension(String),
    TooLarge(usize),
    Multipart(String),
}

impl UploadError {
    fn response(&self) -> HttpResponse {
        match self {
            UploadError::MissingFile => {
                error_json(StatusCode::BAD_REQUEST, "Multipart field 'file' is required")
            }
            UploadError::MissingFilename => {
                error_json(StatusCode::BAD_REQUEST, "Filename is required")
            }
            UploadError::EmptyFile => error_json(StatusCode::BAD_REQUEST, "File is empty"),
            UploadError::InvalidExtension(_) => error_json(
                StatusCode::BAD_REQUEST,
                format!("Invalid file type. Allowed: {}", ALLOWED_EXTENSIONS.join(", ")),
            ),
            UploadError::TooLarge(max) => error_json(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("File too large. Max size: {}MB", max / 1024 / 1024),
            ),
            UploadError::Multipart(_) => {
                error_json(StatusCode::BAD_REQUEST, "Malformed multipart upload")
            }
        }
    }
}

struct Upload {
    file_name: String,
    data: Vec<u8>,
}

async fn read_upload(mut payload: Multipart, max_bytes: usize) -> Result<Upload, UploadError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| UploadError::Multipart(e.to_string()))?
    {
        if field.name() != Some("file") {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
            }
            continue;
        }

        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string)
            .filter(|name| !name.trim().is_empty())
            .ok_or(UploadError::MissingFilename)?;

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| UploadError::Multipart(e.to_string()))?;
            if data.len() + chunk.len() > max_bytes {
                return Err(UploadError::TooLarge(max_bytes));
            }
            data.extend_from_slice(&chunk);
        }
        return Ok(Upload { file_name, data });
    }
    Err(UploadError::MissingFile)
}

fn validate_upload(upload: &Upload) -> Result<(), UploadError> {
    let extension = Path::new(&upload.file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(UploadError::InvalidExtension(extension));
    }
    if upload.data.is_empty() {
        return Err(UploadError::EmptyFile);
    }
    Ok(())
}

fn pipeline_error_response(err: &PipelineError) -> HttpResponse {
    let (status, message) = match err {
        PipelineError::Codec(CodecError::UnsupportedFormat(_)) => {
            (StatusCode::BAD_REQUEST, "File is not a valid image")
        }
        PipelineError::Identifier(_) | PipelineError::Archive(ArchiveError::Identifier(_)) => {
            (StatusCode::BAD_REQUEST, "Invalid file_id")
        }
        PipelineError::MissingOriginal(_) => {
            (StatusCode::NOT_FOUND, "No uploaded image for this file_id")
        }
        PipelineError::MissingComposition(_) => (
            StatusCode::NOT_FOUND,
            "No analysis result for this file_id yet",
        ),
        PipelineError::TaskClient(TaskClientError::PollTimeout { .. }) => {
            (StatusCode::GATEWAY_TIMEOUT, "Skin analysis timed out")
        }
        PipelineError::TaskClient(TaskClientError::RemoteTaskFailed { .. }) => {
            (StatusCode::BAD_GATEWAY, "Skin analysis failed")
        }
        PipelineError::TaskClient(_) => {
            (StatusCode::BAD_GATEWAY, "Skin analysis service unavailable")
        }
        PipelineError::Archive(e) if e.is_download() => {
            (StatusCode::BAD_GATEWAY, "Failed to download analysis results")
        }
        PipelineError::Archive(_) | PipelineError::Compose(ComposeError::Decode { .. }) => {
            (StatusCode::BAD_GATEWAY, "Analysis results were malformed")
        }
        PipelineError::Codec(_)
        | PipelineError::Compose(_)
        | PipelineError::Io(_)
        | PipelineError::Worker(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Image processing failed"),
    };

    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        warn!("Request rejected: {}", err);
    }
    error_json(status, message)
}

async fn upload_hero_image(
    pipeline: web::Data<AnalysisPipeline>,
    limits: web::Data<UploadLimits>,
    query: web::Query<FileIdQuery>,
    payload: Multipart,
) -> HttpResponse {
    let known_file_id = query
        .into_inner()
        .file_id
        .filter(|id| !id.trim().is_empty());

    let outcome = if let Some(file_id) = known_file_id {
        info!("Re-running analysis for known file_id {}", file_id);
        pipeline.analyze_file(&file_id).await
    } else {
        let upload = match read_upload(payload, limits.max_bytes).await {
            Ok(upload) => upload,
            Err(e) => {
                warn!("Rejected upload: {:?}", e);
                return e.response();
            }
        };
        if let Err(e) = validate_upload(&upload) {
            warn!("Rejected upload {}: {:?}", upload.file_name, e);
            return e.response();
        }
        info!(
            "Received {} ({} bytes)",
            upload.file_name,
            upload.data.len()
        );
        pipeline.process_upload(&upload.file_name, upload.data).await
    };

    match outcome {
        Ok(outcome) => {
            info!(
                "Analysis for {} ready (cached: {})",
                outcome.file_id, outcome.cached
            );
            HttpResponse::Ok().json(UploadResponse::from(outcome))
        }
        Err(e) => pipeline_error_response(&e),
    }
}

async fn recommendations(
    pipeline: web::Data<AnalysisPipeline>,
    requester: web::Data<Option<RecommendationRequester>>,
    query: web::Query<FileIdQuery>,
) -> HttpResponse {
    let Some(requester) = requester.get_ref() else {
        return error_json(
            StatusCode::SERVICE_UNAVAILABLE,
            "Recommendations are not configured",
        );
    };
    let Some(file_id) = query.into_inner().file_id.filter(|id| !id.trim().is_empty()) else {
        return error_json(StatusCode::BAD_REQUEST, "file_id is required");
    };

    let (original, composed) = match pipeline.stored_images(&file_id).await {
        Ok(images) => images,
        Err(e) => return pipeline_error_response(&e),
    };

    match requester.request_recommendations(&original, &composed).await {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => {
            error!("Recommendations for {} failed: {}", file_id, e);
            let message = match e {
                RecommendationError::ModelRequest(_) => "Recommendation service unavailable",
                RecommendationError::ResponseParse(_) => "Recommendation service returned an invalid answer",
            };
            error_json(StatusCode::BAD_GATEWAY, message)
        }
    }
}

async fn health(pipeline: web::Data<AnalysisPipeline>) -> HttpResponse {
    let reachable = pipeline.api_reachable().await;
    let status = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    HttpResponse::build(status).json(json!({
        "status": if reachable { "ok" } else { "degraded" },
        "api_endpoint": pipeline.api_endpoint(),
        "api_connection": if reachable { "ok" } else { "error" },
        "cached_results": pipeline.cache().len(),
    }))
}
