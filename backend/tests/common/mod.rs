#![allow(dead_code)]

use std::collections::BTreeSet;
use std::io::{Cursor, Write};
use std::path::Path;
use std::time::Duration;

use backend::cache::ResultCache;
use backend::imaging::codec;
use backend::pipeline::AnalysisPipeline;
use backend::skin_api::{PollPolicy, SkinAnalysisClient};
use backend::storage::archive::ArchiveFetcher;
use backend::storage::layout::ResultLayout;
use image::{Rgba, RgbaImage};
use serde_json::{json, Value};
use wiremock::ResponseTemplate;
use zip::write::SimpleFileOptions;

pub const SUBDIR: &str = "skinanalysisResult";

pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
pub const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

pub fn fast_policy(max_attempts: u32) -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(5),
        max_attempts,
    }
}

pub fn actions(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

pub fn client(endpoint: &str) -> SkinAnalysisClient {
    SkinAnalysisClient::new(
        reqwest::Client::new(),
        "test-api-key".to_string(),
        endpoint.to_string(),
    )
}

pub fn pipeline(endpoint: &str, results_root: &Path, max_attempts: u32) -> AnalysisPipeline {
    let layout = ResultLayout::new(results_root, SUBDIR);
    AnalysisPipeline::new(
        client(endpoint),
        ArchiveFetcher::new(reqwest::Client::new(), layout),
        ResultCache::new(chrono::Duration::hours(2)),
        actions(&["acne", "pore", "redness"]),
        fast_policy(max_attempts),
    )
}

pub fn status_body(status: &str) -> Value {
    json!({"status": 200, "data": {"task_status": status}})
}

pub fn status_response(status: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(status_body(status))
}

pub fn success_response(results_url: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "status": 200,
        "data": {
            "task_status": "success",
            "results": {"url": results_url}
        }
    }))
}

pub fn filled(width: u32, height: u32, color: Rgba<u8>) -> RgbaImage {
    RgbaImage::from_pixel(width, height, color)
}

/// 4x4 overlay, blue on the left half.
pub fn left_half_blue() -> RgbaImage {
    RgbaImage::from_fn(4, 4, |x, _| if x < 2 { BLUE } else { CLEAR })
}

/// 4x4 overlay, green along the top row.
pub fn top_row_green() -> RgbaImage {
    RgbaImage::from_fn(4, 4, |_, y| if y == 0 { GREEN } else { CLEAR })
}

pub fn png(image: &RgbaImage) -> Vec<u8> {
    codec::encode_png(image).unwrap()
}

/// Solid red 4x4 photo in BMP, a format the backend has to normalize.
pub fn red_bmp() -> Vec<u8> {
    let rgb = image::RgbImage::from_pixel(4, 4, image::Rgb([255, 0, 0]));
    let mut buffer = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(rgb)
        .write_to(&mut buffer, image::ImageFormat::Bmp)
        .unwrap();
    buffer.into_inner()
}

pub fn zip_archive(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, bytes) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
