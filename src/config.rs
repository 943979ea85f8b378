//! 用戶端設定，可從 JSON 檔案載入。

use std::{fs, io, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::{backoff::BackoffPolicy, challenge::ChallengeType, key_pair::KeyType};

/// Let's Encrypt 正式環境的目錄 URL。
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt 測試環境的目錄 URL。
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

type Result<T> = std::result::Result<T, ConfigError>;

/// 用戶端設定。所有欄位皆有預設值，未知欄位會被拒絕。
///
/// ```
/// use racme_issuer::config::ClientConfig;
///
/// let config = ClientConfig::from_json(r#"{
///     "email": "admin@example.org",
///     "key_type": "ec256",
///     "exclude": ["tls-alpn-01"]
/// }"#).unwrap();
/// assert_eq!(config.exclude.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub directory_url: String,
    pub email: Option<String>,
    /// 帳戶金鑰與證書金鑰的類型。
    pub key_type: KeyType,
    /// 不可使用的挑戰類型。
    pub exclude: Vec<ChallengeType>,
    pub request_timeout_secs: u64,
    pub order_timeout_secs: u64,
    pub backoff: BackoffConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            directory_url: LETS_ENCRYPT_PRODUCTION.to_string(),
            email: None,
            key_type: KeyType::default(),
            exclude: Vec::new(),
            request_timeout_secs: 30,
            order_timeout_secs: 600,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.directory_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "directory_url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        self.backoff.to_policy().map(|_| ())
    }
}

/// [`BackoffPolicy`] 的 JSON 形式，時間以毫秒表示。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            max_attempts: policy.max_attempts,
        }
    }
}

impl BackoffConfig {
    pub fn to_policy(&self) -> Result<BackoffPolicy> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "backoff.multiplier",
                reason: format!("{} is not a finite value >= 1", self.multiplier),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "backoff.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigError::Invalid {
                field: "backoff.max_delay_ms",
                reason: "must not be smaller than initial_delay_ms".to_string(),
            });
        }
        Ok(BackoffPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        })
    }
}
