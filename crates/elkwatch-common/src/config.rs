use anyhow::{bail, Result};
use base64::{engine::general_purpose, Engine as _};

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub es: ElasticsearchConfig,
    pub worker: WorkerConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: String,
    pub query_timeout_secs: u64,
}

/// Connection settings for the process-wide default Elasticsearch source.
/// Rules without a data-source reference fall back to this.
#[derive(Debug, Clone)]
pub struct ElasticsearchConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub use_ssl: bool,
    pub skip_verify: bool,
    pub ca_certificate: String,
    pub query_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// Reconcile cadence in seconds.
    pub check_interval_secs: u64,
    /// Webhook notification retry attempts.
    pub retry_times: u32,
    /// Elasticsearch scroll page size.
    pub batch_size: usize,
    /// Global evaluation concurrency cap (minimum 1).
    pub max_concurrency: usize,
    /// Total wall-clock budget for one alert notification.
    pub alert_send_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Decoded `APP_ENCRYPTION_KEY`, when configured. Must be 32 bytes.
    pub encryption_key: Option<Vec<u8>>,
}

impl AppConfig {
    /// Loads configuration from environment variables and validates it.
    pub fn from_env() -> Result<Self> {
        let es_url = get_env("ES_URL", "http://localhost:9200");

        let config = Self {
            database: DatabaseConfig {
                path: get_env("DATABASE_PATH", "data/elkwatch.db"),
                query_timeout_secs: parse_u64_with_default(
                    &get_env("DB_QUERY_TIMEOUT_SECONDS", ""),
                    5,
                ),
            },
            es: ElasticsearchConfig {
                use_ssl: parse_bool_with_default(
                    &get_env("ES_USE_SSL", ""),
                    es_url.starts_with("https://"),
                ),
                url: es_url,
                username: get_env("ES_USERNAME", ""),
                password: get_env("ES_PASSWORD", ""),
                skip_verify: parse_bool_with_default(&get_env("ES_SKIP_VERIFY", ""), false),
                ca_certificate: get_env("ES_CA_CERTIFICATE", ""),
                query_timeout_secs: parse_u64_with_default(
                    &get_env("ES_QUERY_TIMEOUT_SECONDS", ""),
                    30,
                ),
            },
            worker: WorkerConfig {
                enabled: parse_bool_with_default(&get_env("WORKER_ENABLED", ""), true),
                check_interval_secs: parse_u64_with_default(
                    &get_env("WORKER_CHECK_INTERVAL", ""),
                    30,
                ),
                retry_times: parse_u64_with_default(&get_env("WORKER_RETRY_TIMES", ""), 3) as u32,
                batch_size: parse_u64_with_default(&get_env("WORKER_BATCH_SIZE", ""), 200) as usize,
                max_concurrency: parse_u64_with_default(&get_env("WORKER_MAX_CONCURRENCY", ""), 10)
                    .max(1) as usize,
                alert_send_timeout_secs: parse_u64_with_default(
                    &get_env("ALERT_SEND_TIMEOUT_SECONDS", ""),
                    20,
                ),
            },
            security: SecurityConfig {
                encryption_key: decode_encryption_key(&get_env("APP_ENCRYPTION_KEY", ""))?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates invariants that must hold before the process starts.
    pub fn validate(&self) -> Result<()> {
        if self.es.url.trim().is_empty() {
            bail!("ES_URL is required");
        }
        if let Some(key) = &self.security.encryption_key {
            if key.len() != 32 {
                bail!(
                    "APP_ENCRYPTION_KEY must decode to 32 bytes (got {})",
                    key.len()
                );
            }
        }
        Ok(())
    }
}

fn decode_encryption_key(encoded: &str) -> Result<Option<Vec<u8>>> {
    if encoded.is_empty() {
        return Ok(None);
    }
    // Accept both padded and unpadded base64.
    let decoded = general_purpose::STANDARD_NO_PAD
        .decode(encoded)
        .or_else(|_| general_purpose::STANDARD.decode(encoded));
    match decoded {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) => bail!("invalid APP_ENCRYPTION_KEY (base64 decode failed): {e}"),
    }
}

fn get_env(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn parse_u64_with_default(s: &str, default: u64) -> u64 {
    match s.trim().parse::<u64>() {
        Ok(v) if v > 0 => v,
        _ => default,
    }
}

fn parse_bool_with_default(s: &str, default: bool) -> bool {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => true,
        "0" | "false" | "no" | "n" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_u64_falls_back_on_garbage_and_zero() {
        assert_eq!(parse_u64_with_default("", 30), 30);
        assert_eq!(parse_u64_with_default("abc", 30), 30);
        assert_eq!(parse_u64_with_default("0", 30), 30);
        assert_eq!(parse_u64_with_default("15", 30), 15);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool_with_default("yes", false));
        assert!(parse_bool_with_default("On", false));
        assert!(!parse_bool_with_default("off", true));
        assert!(!parse_bool_with_default("0", true));
        assert!(parse_bool_with_default("", true));
        assert!(parse_bool_with_default("maybe", true));
    }

    #[test]
    fn validate_rejects_bad_encryption_key_length() {
        let mut config = test_config();
        config.security.encryption_key = Some(vec![0u8; 16]);
        assert!(config.validate().is_err());

        config.security.encryption_key = Some(vec![0u8; 32]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_es_url() {
        let mut config = test_config();
        config.es.url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn decode_key_accepts_padded_and_unpadded() {
        use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
        use base64::Engine as _;
        let key = [7u8; 32];
        assert_eq!(
            decode_encryption_key(&STANDARD.encode(key)).unwrap().unwrap(),
            key.to_vec()
        );
        assert_eq!(
            decode_encryption_key(&STANDARD_NO_PAD.encode(key))
                .unwrap()
                .unwrap(),
            key.to_vec()
        );
        assert!(decode_encryption_key("not-base64!!!").is_err());
    }

    fn test_config() -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                path: "data/test.db".into(),
                query_timeout_secs: 5,
            },
            es: ElasticsearchConfig {
                url: "http://localhost:9200".into(),
                username: String::new(),
                password: String::new(),
                use_ssl: false,
                skip_verify: false,
                ca_certificate: String::new(),
                query_timeout_secs: 30,
            },
            worker: WorkerConfig {
                enabled: true,
                check_interval_secs: 30,
                retry_times: 3,
                batch_size: 200,
                max_concurrency: 10,
                alert_send_timeout_secs: 20,
            },
            security: SecurityConfig {
                encryption_key: None,
            },
        }
    }
}
