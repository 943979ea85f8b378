//! 一次簽發交易中，所有執行緒共用的唯讀資料。

use std::time::{Duration, Instant};

use chrono::Utc;

use crate::{
    backoff::{parse_retry_after, BackoffPolicy, Clock},
    key_pair::KeyPair,
    provider::ChallengeRegistry,
    signer::{KeyId, RequestSigner, SignerError},
    transport::HttpResponse,
};

const RETRY_AFTER: &str = "Retry-After";

/// 已註冊帳戶在一次訂單中需要的一切：簽名器、帳戶金鑰、提供者設定、退避策略與期限。
///
/// 只包含借用的唯讀資料，可以同時交給多個網域的驗證執行緒。
#[derive(Clone, Copy)]
pub struct Session<'a> {
    pub signer: &'a RequestSigner,
    pub key_pair: &'a KeyPair,
    pub account_url: &'a str,
    pub thumbprint: &'a str,
    pub registry: &'a ChallengeRegistry,
    pub backoff: &'a BackoffPolicy,
    pub clock: &'a dyn Clock,
    pub deadline: Instant,
}

impl Session<'_> {
    pub fn key_id(&self) -> KeyId<'_> {
        KeyId::Kid(self.account_url)
    }

    /// 以帳戶身分對資源發送 POST-as-GET。
    pub fn fetch(&self, url: &str) -> Result<HttpResponse, SignerError> {
        self.signer
            .post_as_get(url, self.key_pair, self.key_id())
    }
}

/// 回應中的 `Retry-After` 提示。
pub fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .header(RETRY_AFTER)
        .and_then(|value| parse_retry_after(value, Utc::now()))
}
