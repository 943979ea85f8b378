//! JOSE 使用的 Base64 URL 安全編碼（無填充）封裝。

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use thiserror::Error;

/// Base64 解碼失敗時的錯誤。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid base64url input: {0}")]
    Invalid(String),
}

/// 持有原始位元組，並依需求輸出 URL 安全或標準編碼的值類型。
///
/// ```
/// # use racme_issuer::base64::Base64;
/// let b64 = Base64::new("Hello, World!");
/// assert_eq!(b64.base64_url(), "SGVsbG8sIFdvcmxkIQ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    bytes: Vec<u8>,
}

impl Base64 {
    /// 以任何可轉為位元組切片的輸入建立實例。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        Self {
            bytes: input.as_ref().to_vec(),
        }
    }

    /// 從 URL 安全、無填充的字串解碼。
    ///
    /// # Errors
    ///
    /// 輸入含有非法字元或長度不正確時回傳 [`DecodeError::Invalid`]。
    pub fn from_url(url_encoded: &str) -> Result<Self, DecodeError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(url_encoded.trim_end_matches('='))
            .map_err(|e| DecodeError::Invalid(e.to_string()))?;
        Ok(Self { bytes })
    }

    /// URL 安全、無填充的編碼結果，JWS 各段都使用這個格式。
    pub fn base64_url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.bytes)
    }

    /// 標準（含填充）編碼結果。
    pub fn standard(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
