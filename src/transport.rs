//! 與 CA 之間的 HTTP 傳輸層。
//!
//! 協議引擎只透過 [`Transport`] 發送請求，正式環境使用 [`HttpTransport`]（`reqwest` 阻塞客戶端），
//! 測試則可以換成記憶體中的假 CA。

use std::time::Duration;

use reqwest::{
    blocking::Client,
    header::{HeaderMap, ACCEPT, CONTENT_TYPE, LOCATION, USER_AGENT},
    StatusCode,
};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::problem::Problem;

/// 傳輸層錯誤，代表請求根本沒有得到 CA 的回應。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Connection failed: {0}")]
    Connection(String),
}

/// CA 的 HTTP 回應，已完整讀取本文。
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// 取得標頭值；無法轉為字串的值視為不存在。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn location(&self) -> Option<&str> {
        self.header(LOCATION.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 若回應本文是 problem 文件（RFC 7807）則解析出來。
    pub fn problem(&self) -> Option<Problem> {
        let is_problem = self
            .header(CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.starts_with("application/problem+json"));
        if !is_problem && self.is_success() {
            return None;
        }
        serde_json::from_slice::<Problem>(&self.body)
            .ok()
            .filter(|p| !p.problem_type.is_empty())
    }
}

/// 發送請求到 CA 的最小介面。
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;

    fn head(&self, url: &str) -> Result<HttpResponse, TransportError>;

    /// 以 `application/jose+json` 送出已簽名的 JWS。
    fn post_jose(&self, url: &str, body: &str) -> Result<HttpResponse, TransportError>;
}

/// 以 `reqwest` 阻塞客戶端實作的傳輸層，每個請求都有獨立的逾時。
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    const AGENT_NAME: &'static str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

    /// 建立傳輸層。
    ///
    /// # Errors
    ///
    /// 當底層 TLS 後端無法初始化時回傳 [`TransportError::Request`]。
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    fn read(response: reqwest::blocking::Response) -> Result<HttpResponse, TransportError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().map_err(Self::classify)?.to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    fn classify(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(e.to_string())
        } else if e.is_connect() {
            TransportError::Connection(e.to_string())
        } else {
            TransportError::Request(e)
        }
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, Self::AGENT_NAME)
            .send()
            .map_err(Self::classify)?;
        Self::read(response)
    }

    fn head(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .head(url)
            .header(USER_AGENT, Self::AGENT_NAME)
            .send()
            .map_err(Self::classify)?;
        Self::read(response)
    }

    fn post_jose(&self, url: &str, body: &str) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .header(USER_AGENT, Self::AGENT_NAME)
            .header(CONTENT_TYPE, "application/jose+json")
            .header(ACCEPT, "application/json, application/pem-certificate-chain")
            .body(body.to_string())
            .send()
            .map_err(Self::classify)?;
        Self::read(response)
    }
}
