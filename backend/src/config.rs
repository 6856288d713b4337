use std::collections::{BTreeSet, HashMap};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(String),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
    #[error("Failed to read config file {path}: {message}")]
    File { path: String, message: String },
}

/// Key=value settings where the process environment wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    file_values: HashMap<String, String>,
    use_env: bool,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut file_values = HashMap::new();

        if path.exists() {
            let iter = dotenv::from_path_iter(path).map_err(|e| ConfigError::File {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            for item in iter {
                let (key, value) = item.map_err(|e| ConfigError::File {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                file_values.insert(key, value);
            }
            log::info!(
                "Loaded {} settings from {}",
                file_values.len(),
                path.display()
            );
        } else {
            log::debug!("Config file {} not found, using environment only", path.display());
        }

        Ok(Self {
            file_values,
            use_env: true,
        })
    }

    /// Settings backed only by the given pairs; the environment is ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            file_values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            use_env: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if self.use_env {
            if let Ok(value) = env::var(key) {
                if !value.trim().is_empty() {
                    return Some(value.trim().to_string());
                }
            }
        }
        self.file_values
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value,
            }),
            None => Ok(default),
        }
    }
}

const DEFAULT_ACTIONS: &str = "acne,droopy_lower_eyelid,pore,redness";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_TIMEOUT_SECS: u64 = 3600;
/// One year.
const MAX_CACHE_TTL_SECS: i64 = 365 * 24 * 3600;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub api_endpoint: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub actions: BTreeSet<String>,
    pub results_dir: PathBuf,
    pub result_subdir: String,
    pub cache_ttl: chrono::Duration,
    pub cache_file: Option<PathBuf>,
    pub openai: Option<OpenAiConfig>,
    pub max_upload_bytes: usize,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl AppConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let actions = parse_actions(
            &settings
                .get("SKIN_ACTIONS")
                .unwrap_or_else(|| DEFAULT_ACTIONS.to_string()),
        );
        if actions.is_empty() {
            return Err(ConfigError::Invalid {
                key: "SKIN_ACTIONS".to_string(),
                value: String::new(),
            });
        }

        let poll_max_attempts: u32 = settings.parse_or("POLL_MAX_ATTEMPTS", 300)?;
        if poll_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "POLL_MAX_ATTEMPTS".to_string(),
                value: "0".to_string(),
            });
        }

        let timeout_secs: u64 = settings.parse_or("PERFECTCORP_TIMEOUT", 30)?;
        if timeout_secs == 0 || timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::Invalid {
                key: "PERFECTCORP_TIMEOUT".to_string(),
                value: timeout_secs.to_string(),
            });
        }
        let request_timeout = Duration::from_secs(timeout_secs);

        let ttl_secs: i64 = settings.parse_or("RESULT_CACHE_TTL_SECS", 7200)?;
        let cache_ttl = (0..=MAX_CACHE_TTL_SECS)
            .contains(&ttl_secs)
            .then(|| chrono::Duration::try_seconds(ttl_secs))
            .flatten()
            .ok_or_else(|| ConfigError::Invalid {
                key: "RESULT_CACHE_TTL_SECS".to_string(),
                value: ttl_secs.to_string(),
            })?;

        let openai = settings.get("OPENAI_API_KEY").map(|api_key| OpenAiConfig {
            api_key,
            base_url: settings
                .get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            model: settings
                .get("OPENAI_MODEL")
                .unwrap_or_else(|| "gpt-4o".to_string()),
        });

        Ok(Self {
            api_key: settings.required("PERFECTCORP_API_KEY")?,
            api_endpoint: settings.required("PERFECTCORP_ENDPOINT")?,
            request_timeout,
            poll_interval: Duration::from_millis(settings.parse_or("POLL_INTERVAL_MS", 2000)?),
            poll_max_attempts,
            actions,
            results_dir: PathBuf::from(
                settings
                    .get("RESULTS_DIR")
                    .unwrap_or_else(|| "extracted_files".to_string()),
            ),
            result_subdir: settings
                .get("RESULT_SUBDIR")
                .unwrap_or_else(|| "skinanalysisResult".to_string()),
            cache_ttl,
            cache_file: settings.get("RESULT_CACHE_FILE").map(PathBuf::from),
            openai,
            max_upload_bytes: settings.parse_or("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            port: settings.parse_or("PORT", 8080)?,
        })
    }
}

/// Credentials and target bucket for the bulk PNG uploader.
#[derive(Debug, Clone)]
pub struct R2Config {
    pub access_key_id: String,
    pub secret_key: String,
    pub endpoint: String,
    pub bucket: String,
    pub public_base: String,
}

impl R2Config {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let endpoint = settings.required("R2_ENDPOINT")?;
        let bucket = settings.required("R2_BUCKET")?;
        let public_base = settings
            .get("R2_PUBLIC_BASE")
            .unwrap_or_else(|| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));

        Ok(Self {
            access_key_id: settings.required("R2_ACCESS_KEY_ID")?,
            secret_key: settings.required("R2_SECRET_KEY")?,
            endpoint,
            bucket,
            public_base,
        })
    }
}

fn parse_actions(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("PERFECTCORP_API_KEY", "test-key"),
            ("PERFECTCORP_ENDPOINT", "http://localhost:9999"),
        ]
    }

    #[test]
    fn app_config_defaults() {
        let config = AppConfig::from_settings(&Settings::from_pairs(minimal())).unwrap();
        assert_eq!(config.poll_interval, Duration::from_millis(2000));
        assert_eq!(config.poll_max_attempts, 300);
        assert_eq!(config.actions.len(), 4);
        assert!(config.actions.contains("pore"));
        assert_eq!(config.result_subdir, "skinanalysisResult");
        assert!(config.openai.is_none());
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn missing_api_key_is_reported() {
        let settings = Settings::from_pairs(vec![("PERFECTCORP_ENDPOINT", "http://x")]);
        match AppConfig::from_settings(&settings) {
            Err(ConfigError::Missing(key)) => assert_eq!(key, "PERFECTCORP_API_KEY"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn invalid_number_is_rejected() {
        let mut pairs = minimal();
        pairs.push(("POLL_INTERVAL_MS", "soon"));
        assert!(matches!(
            AppConfig::from_settings(&Settings::from_pairs(pairs)),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut pairs = minimal();
        pairs.push(("POLL_MAX_ATTEMPTS", "0"));
        assert!(AppConfig::from_settings(&Settings::from_pairs(pairs)).is_err());
    }

    #[test]
    fn cache_ttl_out_of_range_is_rejected() {
        for value in ["9223372036854775807", "9000000000000", "-5"] {
            let mut pairs = minimal();
            pairs.push(("RESULT_CACHE_TTL_SECS", value));
            match AppConfig::from_settings(&Settings::from_pairs(pairs)) {
                Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "RESULT_CACHE_TTL_SECS"),
                other => panic!("{} accepted: {:?}", value, other),
            }
        }
    }

    #[test]
    fn cache_ttl_within_range_is_kept() {
        let mut pairs = minimal();
        pairs.push(("RESULT_CACHE_TTL_SECS", "31536000"));
        let config = AppConfig::from_settings(&Settings::from_pairs(pairs)).unwrap();
        assert_eq!(config.cache_ttl, chrono::Duration::days(365));
    }

    #[test]
    fn request_timeout_out_of_range_is_rejected() {
        for value in ["0", "3601", "18446744073709551615"] {
            let mut pairs = minimal();
            pairs.push(("PERFECTCORP_TIMEOUT", value));
            match AppConfig::from_settings(&Settings::from_pairs(pairs)) {
                Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "PERFECTCORP_TIMEOUT"),
                other => panic!("{} accepted: {:?}", value, other),
            }
        }
    }

    #[test]
    fn actions_are_trimmed_and_deduplicated() {
        let actions = parse_actions(" acne, pore ,acne,, redness");
        assert_eq!(
            actions.into_iter().collect::<Vec<_>>(),
            vec!["acne", "pore", "redness"]
        );
    }

    #[test]
    fn r2_public_base_defaults_to_endpoint_and_bucket() {
        let settings = Settings::from_pairs(vec![
            ("R2_ACCESS_KEY_ID", "id"),
            ("R2_SECRET_KEY", "secret"),
            ("R2_ENDPOINT", "https://r2.example.com/"),
            ("R2_BUCKET", "hero"),
        ]);
        let config = R2Config::from_settings(&settings).unwrap();
        assert_eq!(config.public_base, "https://r2.example.com/hero");
    }

    #[test]
    fn loads_key_value_file_with_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# skin analysis").unwrap();
        writeln!(file, "SKINSCAN_TEST_ONLY_KEY=from-file").unwrap();
        writeln!(file).unwrap();
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(
            settings.get("SKINSCAN_TEST_ONLY_KEY").as_deref(),
            Some("from-file")
        );
        assert!(settings.get("SKINSCAN_TEST_ABSENT_KEY").is_none());
    }

    #[test]
    fn missing_file_falls_back_to_environment() {
        let settings = Settings::load(Path::new("/nonexistent/skinscan.conf")).unwrap();
        assert!(settings.get("SKINSCAN_TEST_ABSENT_KEY").is_none());
    }
}
