//! Converts every image in a directory to PNG and uploads it to an
//! S3-compatible bucket.

use backend::config::{R2Config, Settings};
use backend::imaging::codec;
use backend::storage::s3_service::S3Service;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "bulk-upload", about = "Convert a directory of images to PNG and upload them")]
struct Args {
    /// Directory holding the source images
    #[arg(long, default_value = "hero-photos")]
    src: PathBuf,

    /// key=value file with R2_* settings; environment variables win
    #[arg(long, default_value = "r2_config.txt")]
    config: PathBuf,
}

#[derive(Debug, Default)]
struct Summary {
    uploaded: usize,
    errors: usize,
}

async fn upload_one(service: &S3Service, path: &Path) -> Result<(String, usize), String> {
    let key = S3Service::png_key_for(path).map_err(|e| e.to_string())?;
    let raw = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
    let png = tokio::task::spawn_blocking(move || codec::normalize_to_png(&raw))
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())?;

    service
        .upload_png(&png, &key)
        .await
        .map_err(|e| e.to_string())?;
    Ok((key, png.len()))
}

async fn run(args: Args) -> Result<Summary, String> {
    let settings = Settings::load(&args.config).map_err(|e| e.to_string())?;
    let config = R2Config::from_settings(&settings).map_err(|e| e.to_string())?;
    let service = S3Service::from_r2_config(&config);

    if !args.src.is_dir() {
        return Err(format!("directory {} does not exist", args.src.display()));
    }
    log::info!("Scanning images in {}", args.src.display());

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(&args.src)
        .await
        .map_err(|e| e.to_string())?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| e.to_string())? {
        if entry.file_type().await.map_err(|e| e.to_string())?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    let mut summary = Summary::default();
    for path in files {
        match upload_one(&service, &path).await {
            Ok((key, size)) => {
                println!(
                    "{:30} -> {:6.1}KB -> {}",
                    key,
                    size as f64 / 1024.0,
                    service.public_url(&key)
                );
                summary.uploaded += 1;
            }
            Err(e) => {
                log::warn!("{} failed: {}", path.display(), e);
                summary.errors += 1;
            }
        }
    }
    Ok(summary)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    match run(Args::parse()).await {
        Ok(summary) => {
            println!(
                "Done. Uploaded {} images, {} errors.",
                summary.uploaded, summary.errors
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
