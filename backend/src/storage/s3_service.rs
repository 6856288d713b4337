use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;

use crate::config::R2Config;

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    bucket_name: String,
    public_base: String,
}

#[derive(Debug, thiserror::Error)]
pub enum S3ServiceError {
    #[error("S3 error: {0}")]
    S3(String),
    #[error("Invalid object name: {0}")]
    InvalidName(String),
}

impl S3Service {
    pub fn new(client: Client, bucket_name: String, public_base: String) -> Self {
        Self {
            client,
            bucket_name,
            public_base,
        }
    }

    /// Client for an S3-compatible endpoint (Cloudflare R2) with static keys.
    pub fn from_r2_config(config: &R2Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_key.clone(),
            None,
            None,
            "r2-config",
        );
        let s3_config = S3ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new("auto"))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self::new(
            Client::from_conf(s3_config),
            config.bucket.clone(),
            config.public_base.clone(),
        )
    }

    /// `photos/Jane Doe.jpeg` becomes `Jane Doe.png`.
    pub fn png_key_for(path: &Path) -> Result<String, S3ServiceError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| S3ServiceError::InvalidName(path.display().to_string()))?;
        Ok(format!("{}.png", stem))
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base.trim_end_matches('/'), key)
    }

    pub async fn upload_png(&self, png_data: &[u8], key: &str) -> Result<(), S3ServiceError> {
        let body = ByteStream::from(png_data.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .body(body)
            .content_type("image/png")
            .send()
            .await
            .map_err(|e| S3ServiceError::S3(e.to_string()))?;

        Ok(())
    }
}
