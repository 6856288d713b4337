use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use backend::cache::ResultCache;
use backend::config::{AppConfig, Settings};
use backend::pipeline::AnalysisPipeline;
use backend::recommendations::RecommendationRequester;
use backend::routes::{configure_routes, UploadLimits};
use backend::skin_api::{PollPolicy, SkinAnalysisClient};
use backend::storage::archive::ArchiveFetcher;
use backend::storage::layout::ResultLayout;
use std::env;
use std::path::PathBuf;

fn startup_error(message: String) -> std::io::Error {
    log::error!("{}", message);
    std::io::Error::other(message)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let config_file =
        PathBuf::from(env::var("CONFIG_FILE").unwrap_or_else(|_| "skinscan.conf".to_string()));
    let settings = Settings::load(&config_file)
        .map_err(|e| startup_error(format!("Failed to load settings: {}", e)))?;
    let config = AppConfig::from_settings(&settings)
        .map_err(|e| startup_error(format!("Invalid configuration: {}", e)))?;

    let client = SkinAnalysisClient::with_timeout(
        config.api_key.clone(),
        config.api_endpoint.clone(),
        config.request_timeout,
    )
    .map_err(|e| startup_error(format!("Failed to build HTTP client: {}", e)))?;

    let http_client = reqwest::Client::builder()
        .timeout(
            config
                .request_timeout
                .checked_mul(4)
                .unwrap_or(config.request_timeout),
        )
        .build()
        .map_err(|e| startup_error(format!("Failed to build HTTP client: {}", e)))?;

    std::fs::create_dir_all(&config.results_dir)?;
    let layout = ResultLayout::new(config.results_dir.clone(), config.result_subdir.clone());
    let fetcher = ArchiveFetcher::new(http_client.clone(), layout);

    let cache = match &config.cache_file {
        Some(path) => ResultCache::with_file(config.cache_ttl, path.clone())
            .map_err(|e| startup_error(format!("Failed to load result cache: {}", e)))?,
        None => ResultCache::new(config.cache_ttl),
    };

    let pipeline = AnalysisPipeline::new(
        client,
        fetcher,
        cache,
        config.actions.clone(),
        PollPolicy {
            interval: config.poll_interval,
            max_attempts: config.poll_max_attempts,
        },
    );

    let requester = config
        .openai
        .as_ref()
        .map(|openai| RecommendationRequester::new(http_client.clone(), openai));
    if requester.is_none() {
        log::warn!("OPENAI_API_KEY not set, /recommendations will answer 503");
    }

    log::info!("Skin analysis API: {}", config.api_endpoint);
    log::info!(
        "Polling every {:?}, at most {} attempts, actions: {:?}",
        config.poll_interval,
        config.poll_max_attempts,
        config.actions
    );

    let limits = UploadLimits {
        max_bytes: config.max_upload_bytes,
    };
    let results_dir = config.results_dir.clone();
    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::new(pipeline.clone()))
            .app_data(web::Data::new(requester.clone()))
            .app_data(web::Data::new(limits))
            .configure(|cfg| configure_routes(cfg, results_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
