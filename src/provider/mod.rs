//! 挑戰提供者：發布與移除網域控制權證明的後端。
//!
//! 每個後端只需要實作 [`ChallengeProvider`] 的兩個方法；後端如何向自己的基礎設施認證，
//! 由它從 [`ProviderOptions`] 讀取設定自行決定。

use std::{
    collections::BTreeMap,
    env, fmt, io,
    str::FromStr,
};

use thiserror::Error;

pub mod cloudflare;
pub mod dns01;
pub mod exec;
pub mod httpreq;
pub mod manual;
pub mod registry;
pub mod webroot;

pub use registry::{ChallengeRegistry, ProviderFactory, RegistryError};

/// 提供者在發布或移除證明時可能發生的錯誤。
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Provider API error: {0}")]
    Api(String),
    #[error("Missing provider option: {0}")]
    MissingOption(String),
    #[error("Invalid provider option {name}: {reason}")]
    InvalidOption { name: String, reason: String },
    #[error("Command {program} exited with {status}")]
    Command { program: String, status: String },
    #[error("Aborted: {0}")]
    Aborted(String),
    #[error("Refusing malformed challenge token {0:?}")]
    InvalidToken(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// 所有挑戰提供者都必須滿足的契約。
///
/// `present` 必須可以安全地重複呼叫，因為前一次可能只完成了一部分。
/// `clean_up` 的失敗只會被記錄，不會影響驗證結果。
pub trait ChallengeProvider: Send + Sync + fmt::Debug {
    fn present(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()>;

    fn clean_up(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()>;
}

/// 提供者的扁平字串設定，鍵名不分大小寫（統一轉為大寫）。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderOptions {
    values: BTreeMap<String, String>,
}

impl ProviderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 從目前行程的環境變數載入所有設定。
    pub fn from_env() -> Self {
        env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .fold(Self::new(), |options, (k, v)| options.with(&k, v))
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_uppercase(), value.into());
        self
    }

    /// 取得設定值，空字串視為未設定。
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_uppercase())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// 依序嘗試多個鍵名，回傳第一個有值的設定。
    pub fn get_any(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.get(name))
    }

    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| ProviderError::MissingOption(name.to_string()))
    }

    /// 解析設定值；未設定時回傳 `default`。
    pub fn parse_or<T: FromStr>(&self, name: &str, default: T) -> Result<T>
    where
        T::Err: fmt::Display,
    {
        match self.get(name) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ProviderError::InvalidOption {
                name: name.to_string(),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }
}
