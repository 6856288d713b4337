mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use backend::pipeline::PipelineError;
use backend::storage::archive::ArchiveError;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use common::*;

const FILE_ID: &str = "f/id+1=";
const FILE_DIR: &str = "f_2Fid+1=";

async fn mount_file_api(server: &MockServer) {
    mount_file_api_issuing(server, FILE_ID).await;
}

async fn mount_file_api_issuing(server: &MockServer, file_id: &str) {
    Mock::given(method("POST"))
        .and(path("/s2s/v2.0/file/skin-analysis"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "data": {"files": [{
                "file_id": file_id,
                "requests": [{
                    "url": format!("{}/presigned/upload", server.uri()),
                    "method": "PUT",
                    "headers": {"Content-Type": "image/png"}
                }]
            }]}
        })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/presigned/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_task(server: &MockServer, archive: Vec<u8>) {
    Mock::given(method("POST"))
        .and(path("/s2s/v2.0/task/skin-analysis"))
        .and(body_partial_json(json!({
            "src_file_id": FILE_ID,
            "dst_actions": ["acne", "pore", "redness"]
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"task_id": "task-9"}})),
        )
        .expect(1)
        .mount(server)
        .await;

    let calls = Arc::new(AtomicUsize::new(0));
    let results_url = format!("{}/results/task-9.zip", server.uri());
    Mock::given(method("GET"))
        .and(path("/s2s/v2.0/task/skin-analysis/task-9"))
        .respond_with(move |_: &Request| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                status_response("running")
            } else {
                success_response(&results_url)
            }
        })
        .expect(3)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/results/task-9.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/zip")
                .set_body_bytes(archive),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn upload_is_analyzed_and_composed() {
    let server = MockServer::start().await;
    let results = tempfile::tempdir().unwrap();
    mount_file_api(&server).await;
    mount_task(
        &server,
        zip_archive(&[
            ("skinanalysisResult/b_pore.png", png(&top_row_green())),
            ("skinanalysisResult/a_acne.png", png(&left_half_blue())),
            ("skinanalysisResult/score_info.json", b"{}".to_vec()),
        ]),
    )
    .await;

    let pipeline = pipeline(&server.uri(), results.path(), 10);
    let outcome = pipeline.process_upload("selfie.bmp", red_bmp()).await.unwrap();

    assert_eq!(outcome.file_id, FILE_ID);
    assert_eq!(outcome.url, format!("{}/results/task-9.zip", server.uri()));
    assert!(!outcome.cached);

    let overlay_dir = results.path().join(FILE_DIR).join(SUBDIR);
    assert_eq!(
        outcome.composed_path.as_deref(),
        Some(overlay_dir.join("overlayed.png").as_path())
    );
    assert!(overlay_dir.join("original.png").is_file());
    assert!(overlay_dir.join("a_acne.png").is_file());
    assert!(!overlay_dir.join("score_info.json").exists());

    let composed = image::open(overlay_dir.join("overlayed.png"))
        .unwrap()
        .to_rgba8();
    assert_eq!(composed.dimensions(), (4, 4));
    assert_eq!(*composed.get_pixel(0, 0), GREEN);
    assert_eq!(*composed.get_pixel(3, 0), GREEN);
    assert_eq!(*composed.get_pixel(1, 2), BLUE);
    assert_eq!(*composed.get_pixel(3, 3), RED);

    let (original, composed_bytes) = pipeline.stored_images(FILE_ID).await.unwrap();
    assert_eq!(image::load_from_memory(&original).unwrap().to_rgba8(), filled(4, 4, RED));
    assert_eq!(image::load_from_memory(&composed_bytes).unwrap().to_rgba8(), composed);
}

#[tokio::test]
async fn second_request_is_served_from_cache() {
    let server = MockServer::start().await;
    let results = tempfile::tempdir().unwrap();
    mount_file_api(&server).await;
    mount_task(
        &server,
        zip_archive(&[("overlay.png", png(&left_half_blue()))]),
    )
    .await;

    let pipeline = pipeline(&server.uri(), results.path(), 10);
    let first = pipeline.process_upload("selfie.bmp", red_bmp()).await.unwrap();
    let second = pipeline.analyze_file(FILE_ID).await.unwrap();

    assert!(second.cached);
    assert_eq!(second.url, first.url);
    assert_eq!(pipeline.cache().len(), 1);
}

#[tokio::test]
async fn unknown_file_is_reported_before_any_remote_call() {
    let server = MockServer::start().await;
    let results = tempfile::tempdir().unwrap();

    let err = pipeline(&server.uri(), results.path(), 3)
        .analyze_file("never-uploaded")
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::MissingOriginal(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn traversal_file_id_is_rejected() {
    let server = MockServer::start().await;
    let results = tempfile::tempdir().unwrap();

    let err = pipeline(&server.uri(), results.path(), 3)
        .analyze_file("../../etc")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Identifier(_)));
}

#[tokio::test]
async fn unsafe_archive_is_not_cached() {
    let server = MockServer::start().await;
    let results = tempfile::tempdir().unwrap();
    mount_file_api(&server).await;
    mount_task(
        &server,
        zip_archive(&[
            ("ok.png", png(&left_half_blue())),
            ("../../escape.png", png(&top_row_green())),
        ]),
    )
    .await;

    let pipeline = pipeline(&server.uri(), results.path(), 10);
    let err = pipeline.process_upload("selfie.bmp", red_bmp()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Archive(ArchiveError::UnsafeEntry(_))));
    assert!(pipeline.cache().is_empty());
    assert!(!results.path().join(FILE_DIR).join(SUBDIR).join("ok.png").exists());
    assert!(!results.path().join("escape.png").exists());
}

#[tokio::test]
async fn success_without_results_url_is_a_failed_task() {
    let server = MockServer::start().await;
    let results = tempfile::tempdir().unwrap();
    mount_file_api(&server).await;
    Mock::given(method("POST"))
        .and(path("/s2s/v2.0/task/skin-analysis"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"task_id": "task-x"}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/s2s/v2.0/task/skin-analysis/task-x"))
        .respond_with(status_response("success"))
        .expect(1)
        .mount(&server)
        .await;

    let err = pipeline(&server.uri(), results.path(), 3)
        .process_upload("selfie.bmp", red_bmp())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::TaskClient(backend::skin_api::TaskClientError::RemoteTaskFailed { .. })
    ));
}

#[tokio::test]
async fn non_image_upload_never_reaches_the_service() {
    let server = MockServer::start().await;
    let results = tempfile::tempdir().unwrap();

    let err = pipeline(&server.uri(), results.path(), 3)
        .process_upload("notes.png", b"definitely not an image".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Codec(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn unusable_remote_file_id_is_an_upstream_failure() {
    let server = MockServer::start().await;
    let results = tempfile::tempdir().unwrap();
    mount_file_api_issuing(&server, "../issued/by/service").await;

    let err = pipeline(&server.uri(), results.path(), 3)
        .process_upload("selfie.bmp", red_bmp())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::TaskClient(backend::skin_api::TaskClientError::FileUpload(_))
    ));
    assert!(!results.path().join("issued").exists());
}
