use std::sync::Arc;

use thiserror::Error;

use crate::transport::{Transport, TransportError};

const REPLAY_NONCE: &str = "Replay-Nonce";

/// 表示在取得 Nonce 時可能發生的錯誤狀況。
#[derive(Error, Debug)]
pub enum NonceError {
    /// 當請求過程中發生錯誤時回傳此錯誤。
    #[error("Failed to make request: {0}")]
    Transport(#[from] TransportError),
    /// 當回應中缺少 `Replay-Nonce` 標頭時回傳此錯誤。
    #[error("No Replay-Nonce header found in response")]
    NoNonceHeader,
}

/// 定義取得 Nonce 的行為。
pub trait NonceT: Send + Sync {
    /// 取得一個全新的 Nonce。每次呼叫都必須向 CA 重新索取，不可重用。
    fn get(&self) -> Result<String, NonceError>;
}

/// 透過對 `newNonce` 發送 HEAD 請求取得 `Replay-Nonce` 的實作。
///
/// 不快取任何值，因此多個執行緒可以同時使用同一個實例。
#[derive(Clone)]
pub struct Nonce {
    transport: Arc<dyn Transport>,
    url: String,
}

impl Nonce {
    pub fn new(transport: Arc<dyn Transport>, url: impl Into<String>) -> Self {
        Nonce {
            transport,
            url: url.into(),
        }
    }
}

impl std::fmt::Debug for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nonce").field("url", &self.url).finish()
    }
}

impl NonceT for Nonce {
    fn get(&self) -> Result<String, NonceError> {
        let response = self.transport.head(&self.url)?;

        match response.header(REPLAY_NONCE) {
            Some(nonce) => Ok(nonce.to_string()),
            None => Err(NonceError::NoNonceHeader),
        }
    }
}

/// 回傳固定值的 Nonce，用於測試保護頭。
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct MockNonce {
    value: String,
}

#[cfg(test)]
impl MockNonce {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[cfg(test)]
impl NonceT for MockNonce {
    fn get(&self) -> Result<String, NonceError> {
        Ok(self.value.clone())
    }
}
