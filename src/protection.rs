use crate::{
    base64::Base64,
    key_pair::KeyType,
    nonce::{NonceError, NonceT},
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// 定義保護機制中可能產生的錯誤類型。
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// JSON 序列化錯誤
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Nonce 相關錯誤
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
}

/// 自定義的結果型別，錯誤類型為 [`ProtectionError`]
type Result<T> = std::result::Result<T, ProtectionError>;

/// 用於生成保護頭（Protected Header）的結構體，
/// 該頭部包含數字簽章中必要的參數，如演算法、nonce、目標 URL 等。
pub struct Protection<'a> {
    nonce: &'a dyn NonceT,
    alg: &'static str,
    value: Option<JsonValue>,
}

/// 表示數字簽章保護頭部的資料結構，
/// 此結構體可序列化為 JSON，並可轉換為 Base64 編碼字串。
#[derive(Debug, Serialize, Deserialize)]
pub struct ProtectedHeader {
    /// 簽章演算法
    pub alg: String,
    /// 用於防止重放攻擊的隨機數
    pub nonce: String,
    /// 請求目標 URL
    pub url: String,
    /// 可選的 JSON Web Key (JWK)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwk: Option<JsonValue>,
    /// 可選的密鑰標識符 (Key ID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl ProtectedHeader {
    /// 將 [`ProtectedHeader`] 序列化後轉換為 Base64 格式。
    pub fn to_base64(&self) -> Result<Base64> {
        let json_str = serde_json::to_string(self)?;
        Ok(Base64::new(json_str.as_bytes()))
    }
}

impl<'a> Protection<'a> {
    /// 建立一個新的 [`Protection`] 實例，演算法由金鑰類型決定。
    pub fn new(nonce: &'a dyn NonceT, key_type: KeyType) -> Self {
        Self {
            nonce,
            alg: key_type.jws_alg(),
            value: None,
        }
    }

    /// 為保護頭設定一個附加值，該值會在生成保護頭時用於填充 `jwk` 或 `kid` 欄位。
    ///
    /// 當 `value` 為 JSON 物件時填充到 `jwk` 欄位，否則填充到 `kid` 欄位。
    pub fn set_value<T: Serialize>(&mut self, value: T) -> Result<&mut Self> {
        self.value = Some(serde_json::to_value(value)?);
        Ok(self)
    }

    /// 根據目前設定的參數生成一個 [`ProtectedHeader`]。
    ///
    /// 每次呼叫都會從 `nonce` 提供器中取得新的 nonce 值。
    pub fn create_header(&self, url: impl Into<String>) -> Result<ProtectedHeader> {
        let nonce = self.nonce.get()?;
        let url = url.into();

        let (jwk, kid) = match &self.value {
            Some(value) if value.is_object() => (Some(value.clone()), None),
            Some(value) => (
                None,
                Some(
                    value
                        .as_str()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| value.to_string()),
                ),
            ),
            None => (None, None),
        };

        Ok(ProtectedHeader {
            alg: self.alg.to_string(),
            nonce,
            url,
            jwk,
            kid,
        })
    }
}

impl std::fmt::Display for ProtectedHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        serde_json::to_string(self)
            .map_err(|_| std::fmt::Error)
            .and_then(|s| write!(f, "{}", s))
    }
}
