//! Service configuration.
//!
//! Every component receives its slice of `ServiceConfig` at construction
//! time. Values come from the process environment (optionally seeded from a
//! `.env` file by the binary), with defaults matching a single-host
//! deployment next to a local Ollama instance.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "clincode";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "clincode=info,clincode_lib=info,tower_http=warn"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0} must name at least one model")]
    EmptyModelList(&'static str),
}

/// Connection settings for the inference service.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub base_url: String,
    /// Upper bound for a single generation request.
    pub request_timeout: Duration,
    /// Upper bound for the liveness probe issued before every dispatch.
    pub probe_timeout: Duration,
}

/// Model selection and fan-out limits for the coding pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub summarizer_model: String,
    pub diagnostic_models: Vec<String>,
    /// Model used for per-code detail lookups.
    pub lookup_model: String,
    pub detail_max_in_flight: usize,
    pub lookup_timeout: Duration,
    /// Diagnostic models whose prescription_cpt stage reuses the
    /// prescription prompt text.
    pub prescription_cpt_reuse_models: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    pub enabled: bool,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret exchanged for a bearer token. `None` disables login.
    pub shared_secret: Option<String>,
    pub identity: String,
    pub token_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub inference: InferenceConfig,
    pub pipeline: PipelineConfig,
    pub encryption: EncryptionConfig,
    pub api: ApiConfig,
    pub database_path: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            inference: InferenceConfig {
                base_url: "http://localhost:11434".into(),
                request_timeout: Duration::from_secs(300),
                probe_timeout: Duration::from_secs(5),
            },
            pipeline: PipelineConfig {
                summarizer_model: "phi4".into(),
                diagnostic_models: vec!["medllama2".into()],
                lookup_model: "llama2".into(),
                detail_max_in_flight: 4,
                lookup_timeout: Duration::from_secs(120),
                prescription_cpt_reuse_models: vec!["meditron".into()],
            },
            encryption: EncryptionConfig {
                enabled: true,
                key_path: PathBuf::from("encryption.key"),
            },
            api: ApiConfig {
                host: "0.0.0.0".into(),
                port: 5001,
                shared_secret: None,
                identity: "billing-gpt".into(),
                token_ttl: Duration::from_secs(2 * 24 * 60 * 60),
            },
            database_path: PathBuf::from("clincode.db"),
        }
    }
}

impl ServiceConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup, overriding defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("OLLAMA_API_URL") {
            config.inference.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("INFERENCE_TIMEOUT_SECS") {
            config.inference.request_timeout = parse_secs("INFERENCE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("PROBE_TIMEOUT_SECS") {
            config.inference.probe_timeout = parse_secs("PROBE_TIMEOUT_SECS", &v)?;
        }

        if let Some(v) = get("SUMMARIZER_MODEL") {
            config.pipeline.summarizer_model = v.trim().to_string();
        }
        if let Some(v) = get("MEDLLMS") {
            config.pipeline.diagnostic_models = parse_list(&v);
            if config.pipeline.diagnostic_models.is_empty() {
                return Err(ConfigError::EmptyModelList("MEDLLMS"));
            }
        }
        if let Some(v) = get("LOOKUP_MODEL") {
            config.pipeline.lookup_model = v.trim().to_string();
        }
        if let Some(v) = get("DETAIL_MAX_IN_FLIGHT") {
            let n = parse_u64("DETAIL_MAX_IN_FLIGHT", &v)?;
            if n == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "DETAIL_MAX_IN_FLIGHT",
                    value: v,
                });
            }
            config.pipeline.detail_max_in_flight = n as usize;
        }
        if let Some(v) = get("LOOKUP_TIMEOUT_SECS") {
            config.pipeline.lookup_timeout = parse_secs("LOOKUP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("PRESCRIPTION_CPT_REUSE_MODELS") {
            config.pipeline.prescription_cpt_reuse_models = parse_list(&v);
        }

        if let Some(v) = get("PATIENT_DATA_ENCRYPTION_ENABLED") {
            config.encryption.enabled = parse_bool("PATIENT_DATA_ENCRYPTION_ENABLED", &v)?;
        }
        if let Some(v) = get("ENCRYPTION_KEY") {
            config.encryption.key_path = PathBuf::from(v);
        }

        if let Some(v) = get("API_HOST") {
            config.api.host = v;
        }
        if let Some(v) = get("API_PORT") {
            config.api.port = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "API_PORT",
                value: v.clone(),
            })?;
        }
        config.api.shared_secret = get("SRVC_SHARED_SECRET");
        if let Some(v) = get("IDENTITY") {
            config.api.identity = v;
        }
        if let Some(v) = get("TOKEN_TTL_SECS") {
            config.api.token_ttl = parse_secs("TOKEN_TTL_SECS", &v)?;
        }

        if let Some(v) = get("DATABASE_PATH") {
            config.database_path = PathBuf::from(v);
        }

        Ok(config)
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
        }),
    }
}

fn parse_u64(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}

fn parse_secs(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    parse_u64(key, raw).map(Duration::from_secs)
}
