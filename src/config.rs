//! Service configuration loaded from the environment.
//!
//! Credentials can be supplied once for all products (`RTMS_CLIENT_ID`,
//! `RTMS_CLIENT_SECRET`, `RTMS_SECRET_TOKEN`) or per product with a
//! `RTMS_<PRODUCT>_` prefix. Lookups fall back to the meeting record.

use crate::domain::models::{Credentials, MediaMask, ProductKind};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Logging verbosity, `off` by default
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "off" => Some(LogLevel::Off),
            "error" => Some(LogLevel::Error),
            "warn" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }

    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
        }
    }
}

/// Optional external service endpoint with an API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    pub api_key: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Per-product credential records; `meeting` acts as the fallback
    pub credentials: HashMap<ProductKind, Credentials>,
    /// Requested media subscription mask
    pub media_mask: MediaMask,
    /// Route audio/video through the jitter fillers instead of passthrough
    pub enable_fillers: bool,
    pub log_level: LogLevel,
    pub bind_addr: String,
    pub db_path: String,
    /// Search-index HTTP endpoint; absent means SQLite only
    pub index: Option<EndpointConfig>,
    /// OpenAI-compatible completion + embedding endpoint
    pub inference: Option<InferenceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub embedding_model: String,
}

const PRODUCT_ENV_KEYS: [(ProductKind, &str); 5] = [
    (ProductKind::Meeting, "MEETING"),
    (ProductKind::Webinar, "WEBINAR"),
    (ProductKind::VideoSdk, "VIDEOSDK"),
    (ProductKind::ContactCenter, "CONTACTCENTER"),
    (ProductKind::Phone, "PHONE"),
];

impl AppConfig {
    /// Loads configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Loads configuration through an injectable lookup (used by tests)
    pub fn from_lookup(get: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let mut credentials = HashMap::new();

        // Shorthand record applies to every product unless overridden
        let shorthand = Self::read_credentials(get, "RTMS");
        for (product, key) in PRODUCT_ENV_KEYS {
            let prefixed = Self::read_credentials(get, &format!("RTMS_{}", key));
            if let Some(creds) = prefixed.or_else(|| shorthand.clone()) {
                credentials.insert(product, creds);
            }
        }

        if !credentials.contains_key(&ProductKind::Meeting) {
            return Err(AppError::Config(
                "no meeting credentials configured (set RTMS_CLIENT_ID / RTMS_CLIENT_SECRET / RTMS_SECRET_TOKEN)"
                    .to_string(),
            ));
        }

        let media_mask = match get("RTMS_MEDIA_TYPES") {
            Some(raw) => MediaMask(raw.trim().parse::<u32>().map_err(|_| {
                AppError::Config(format!("invalid RTMS_MEDIA_TYPES value: {}", raw))
            })?),
            None => MediaMask(1 | 8), // audio | transcript
        };

        let log_level = match get("RTMS_LOG_LEVEL") {
            Some(raw) => LogLevel::parse(&raw)
                .ok_or_else(|| AppError::Config(format!("invalid RTMS_LOG_LEVEL: {}", raw)))?,
            None => LogLevel::Off,
        };

        let index = get("INDEX_URL").map(|url| EndpointConfig {
            url,
            api_key: get("INDEX_API_KEY"),
        });

        let inference = get("INFERENCE_URL").map(|url| InferenceConfig {
            url,
            api_key: get("INFERENCE_API_KEY"),
            model: get("INFERENCE_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            embedding_model: get("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
        });

        Ok(Self {
            credentials,
            media_mask,
            enable_fillers: get("RTMS_ENABLE_FILLERS")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            log_level,
            bind_addr: get("RTMS_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8787".to_string()),
            db_path: get("RTMS_DB_PATH").unwrap_or_else(|| "rtms-scribe.db".to_string()),
            index,
            inference,
        })
    }

    fn read_credentials(get: &dyn Fn(&str) -> Option<String>, prefix: &str) -> Option<Credentials> {
        let client_id = get(&format!("{}_CLIENT_ID", prefix))?;
        let client_secret = get(&format!("{}_CLIENT_SECRET", prefix))?;
        let secret_token = get(&format!("{}_SECRET_TOKEN", prefix))?;
        Some(Credentials {
            client_id,
            client_secret,
            secret_token,
        })
    }

    /// Resolves credentials for a product, falling back to the meeting record
    pub fn credentials_for(&self, product: ProductKind) -> Option<&Credentials> {
        self.credentials
            .get(&product)
            .or_else(|| self.credentials.get(&ProductKind::Meeting))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_shorthand_applies_to_all_products() {
        let lookup = env(&[
            ("RTMS_CLIENT_ID", "c"),
            ("RTMS_CLIENT_SECRET", "s"),
            ("RTMS_SECRET_TOKEN", "t"),
        ]);
        let config = AppConfig::from_lookup(&lookup).unwrap();
        assert_eq!(config.credentials.len(), 5);
        assert_eq!(
            config.credentials_for(ProductKind::Phone).unwrap().client_id,
            "c"
        );
    }

    #[test]
    fn test_product_override_wins() {
        let lookup = env(&[
            ("RTMS_CLIENT_ID", "c"),
            ("RTMS_CLIENT_SECRET", "s"),
            ("RTMS_SECRET_TOKEN", "t"),
            ("RTMS_WEBINAR_CLIENT_ID", "wc"),
            ("RTMS_WEBINAR_CLIENT_SECRET", "ws"),
            ("RTMS_WEBINAR_SECRET_TOKEN", "wt"),
        ]);
        let config = AppConfig::from_lookup(&lookup).unwrap();
        assert_eq!(
            config.credentials_for(ProductKind::Webinar).unwrap().client_id,
            "wc"
        );
        assert_eq!(
            config.credentials_for(ProductKind::Meeting).unwrap().client_id,
            "c"
        );
    }

    #[test]
    fn test_missing_meeting_credentials_rejected() {
        let lookup = env(&[("RTMS_PHONE_CLIENT_ID", "p")]);
        assert!(AppConfig::from_lookup(&lookup).is_err());
    }

    #[test]
    fn test_defaults() {
        let lookup = env(&[
            ("RTMS_CLIENT_ID", "c"),
            ("RTMS_CLIENT_SECRET", "s"),
            ("RTMS_SECRET_TOKEN", "t"),
        ]);
        let config = AppConfig::from_lookup(&lookup).unwrap();
        assert_eq!(config.media_mask, MediaMask(9));
        assert!(!config.enable_fillers);
        assert_eq!(config.log_level, LogLevel::Off);
        assert!(config.index.is_none());
        assert!(config.inference.is_none());
    }
}
