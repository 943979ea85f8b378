use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::{Transport, TransportError};

/// 表示處理目錄操作時可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// JSON 解析或序列化錯誤。
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// HTTP 請求錯誤。
    #[error("Request error: {0}")]
    Transport(#[from] TransportError),
    #[error("Directory request failed: {status}, {body}")]
    Http { status: StatusCode, body: String },
}

/// 簡化目錄操作結果的型別。
type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// ACME 目錄文件，列出各項操作的端點 URL。
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    /// 用於新帳號註冊的 API 路徑。
    pub new_account: String,
    /// 用於取得新的 nonce 值的 API 路徑。
    pub new_nonce: String,
    /// 用於建立訂單的 API 路徑。
    pub new_order: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoke_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_change: Option<String>,
    /// 用於取得續期資訊的 API 路徑，可能不存在。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewal_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DirectoryMeta>,
}

/// 目錄中的 `meta` 區塊。
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caa_identities: Vec<String>,
    #[serde(default)]
    pub external_account_required: bool,
}

impl Directory {
    /// 從指定 URL 取得目錄文件。
    pub fn fetch(transport: &dyn Transport, url: &str) -> DirectoryResult<Self> {
        let response = transport.get(url)?;
        if !response.is_success() {
            return Err(DirectoryError::Http {
                status: response.status,
                body: response.text(),
            });
        }

        let directory: Directory = response.json()?;
        debug!("Fetched ACME directory from {}", url);
        Ok(directory)
    }

    /// CA 公布的服務條款 URL，存在時表示註冊前必須同意。
    pub fn terms_of_service(&self) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|meta| meta.terms_of_service.as_deref())
    }
}
