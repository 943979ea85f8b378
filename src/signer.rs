//! 對 CA 的每一個 POST 請求進行 JWS 簽名與送出。
//!
//! 每次呼叫都會重新索取 nonce，簽名後送出；若 CA 以 `badNonce` 拒絕或傳輸層失敗，
//! 會用新的 nonce 重試恰好一次，第二次失敗就直接回報。

use std::sync::Arc;

use log::{debug, warn};
use reqwest::StatusCode;
use thiserror::Error;

use crate::{
    base64::Base64,
    jwk::{Jwk, JwkError},
    jws::Jws,
    key_pair::KeyPair,
    nonce::{Nonce, NonceError, NonceT},
    payload::PayloadT,
    problem::Problem,
    protection::{Protection, ProtectionError},
    signature::{create_signature, SignatureError},
    transport::{HttpResponse, Transport, TransportError},
};

/// 簽名請求可能的錯誤。
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// CA 回傳的 problem 文件，內容不做任何修改。
    #[error("ACME problem: {0}")]
    Protocol(Problem),
    #[error("Request failed: {status}, {body}")]
    Http { status: StatusCode, body: String },
}

impl SignerError {
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            SignerError::Protocol(problem) => Some(problem),
            _ => None,
        }
    }

    /// 傳輸層失敗（包含取得 nonce 時的傳輸失敗）。
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SignerError::Transport(_) | SignerError::Nonce(NonceError::Transport(_))
        )
    }

    fn is_retryable(&self) -> bool {
        self.is_transport() || self.problem().is_some_and(Problem::is_bad_nonce)
    }
}

type Result<T> = std::result::Result<T, SignerError>;

/// 保護頭中用來識別帳戶的方式。
#[derive(Debug, Clone, Copy)]
pub enum KeyId<'a> {
    /// 尚未註冊時，直接內嵌公鑰 JWK（僅用於 `newAccount`）。
    Jwk,
    /// 已註冊帳戶的 URL。
    Kid(&'a str),
}

/// 請求簽名器。本身不保存任何可變狀態，可被多個執行緒共享。
#[derive(Clone)]
pub struct RequestSigner {
    transport: Arc<dyn Transport>,
    nonce: Nonce,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("nonce", &self.nonce)
            .finish()
    }
}

impl RequestSigner {
    /// 每個已簽名請求最多嘗試的次數（首次加上一次重試）。
    pub const MAX_ATTEMPTS: u32 = 2;

    pub fn new(transport: Arc<dyn Transport>, new_nonce_url: &str) -> Self {
        let nonce = Nonce::new(transport.clone(), new_nonce_url);
        Self { transport, nonce }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// 產生一份簽好名的 JWS。每次呼叫都會取得新的 nonce。
    pub fn sign(
        &self,
        payload_b64: &Base64,
        url: &str,
        key_pair: &KeyPair,
        key_id: KeyId<'_>,
    ) -> Result<Jws> {
        let mut protection = Protection::new(&self.nonce, key_pair.key_type);
        match key_id {
            KeyId::Jwk => protection.set_value(Jwk::new(key_pair)?)?,
            KeyId::Kid(kid) => protection.set_value(kid)?,
        };
        let header = protection.create_header(url)?.to_base64()?;
        let signature = create_signature(&header, payload_b64, key_pair)?;
        Ok(Jws::new(&header, payload_b64, &signature))
    }

    /// 簽名並送出帶有載荷的請求。
    pub fn post<P: PayloadT>(
        &self,
        url: &str,
        payload: &P,
        key_pair: &KeyPair,
        key_id: KeyId<'_>,
    ) -> Result<HttpResponse> {
        let payload_b64 = payload.to_base64()?;
        self.send(url, &payload_b64, key_pair, key_id)
    }

    /// POST-as-GET：載荷為空字串的已簽名請求，用來讀取訂單、授權與憑證。
    pub fn post_as_get(
        &self,
        url: &str,
        key_pair: &KeyPair,
        key_id: KeyId<'_>,
    ) -> Result<HttpResponse> {
        self.send(url, &Base64::new(""), key_pair, key_id)
    }

    fn send(
        &self,
        url: &str,
        payload_b64: &Base64,
        key_pair: &KeyPair,
        key_id: KeyId<'_>,
    ) -> Result<HttpResponse> {
        let mut attempt = 1;
        loop {
            match self.send_once(url, payload_b64, key_pair, key_id) {
                Err(e) if e.is_retryable() && attempt < Self::MAX_ATTEMPTS => {
                    warn!("Signed request to {} failed ({}), retrying with a fresh nonce", url, e);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn send_once(
        &self,
        url: &str,
        payload_b64: &Base64,
        key_pair: &KeyPair,
        key_id: KeyId<'_>,
    ) -> Result<HttpResponse> {
        let jws = self.sign(payload_b64, url, key_pair, key_id)?;
        let response = self.transport.post_jose(url, &jws.to_json()?)?;
        debug!("POST {} -> {}", url, response.status);

        if response.is_success() {
            return Ok(response);
        }
        match response.problem() {
            Some(problem) => Err(SignerError::Protocol(problem)),
            None => Err(SignerError::Http {
                status: response.status,
                body: response.text(),
            }),
        }
    }
}
