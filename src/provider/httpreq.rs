//! 把 DNS-01 記錄交給外部 HTTP 服務處理的通用提供者。
//!
//! 對 `<endpoint>/present` 與 `<endpoint>/cleanup` 發送 JSON：預設為
//! `{"fqdn": ..., "value": ...}`，RAW 模式則為 `{"domain": ..., "token": ..., "keyAuth": ...}`。

use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use serde::Serialize;

use super::{dns01, ChallengeProvider, ProviderError, ProviderOptions, Result};

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
enum RequestBody {
    Default {
        fqdn: String,
        value: String,
    },
    Raw {
        domain: String,
        token: String,
        #[serde(rename = "keyAuth")]
        key_auth: String,
    },
}

#[derive(Debug, Clone)]
pub struct HttpReqProvider {
    client: Client,
    endpoint: String,
    raw: bool,
    credentials: Option<(String, String)>,
}

impl HttpReqProvider {
    pub const ENDPOINT_OPTION: &'static str = "HTTPREQ_ENDPOINT";
    pub const MODE_OPTION: &'static str = "HTTPREQ_MODE";
    pub const USERNAME_OPTION: &'static str = "HTTPREQ_USERNAME";
    pub const PASSWORD_OPTION: &'static str = "HTTPREQ_PASSWORD";
    pub const TIMEOUT_OPTION: &'static str = "HTTPREQ_HTTP_TIMEOUT";
    const DEFAULT_TIMEOUT_SECS: u64 = 30;

    pub fn from_options(options: &ProviderOptions) -> Result<Self> {
        let endpoint = options.require(Self::ENDPOINT_OPTION)?;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ProviderError::InvalidOption {
                name: Self::ENDPOINT_OPTION.to_string(),
                reason: format!("not an http(s) URL: {}", endpoint),
            });
        }

        let raw = match options.get(Self::MODE_OPTION) {
            None => false,
            Some(mode) if mode.eq_ignore_ascii_case("RAW") => true,
            Some(mode) => {
                return Err(ProviderError::InvalidOption {
                    name: Self::MODE_OPTION.to_string(),
                    reason: format!("unknown mode {}", mode),
                })
            }
        };

        let credentials = match (
            options.get(Self::USERNAME_OPTION),
            options.get(Self::PASSWORD_OPTION),
        ) {
            (Some(user), Some(pass)) => Some((user.to_string(), pass.to_string())),
            (None, None) => None,
            _ => {
                return Err(ProviderError::MissingOption(format!(
                    "{} and {} must be set together",
                    Self::USERNAME_OPTION,
                    Self::PASSWORD_OPTION
                )))
            }
        };

        let timeout = options.parse_or(Self::TIMEOUT_OPTION, Self::DEFAULT_TIMEOUT_SECS)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            raw,
            credentials,
        })
    }

    fn body(&self, domain: &str, token: &str, key_authorization: &str) -> RequestBody {
        if self.raw {
            RequestBody::Raw {
                domain: domain.to_string(),
                token: token.to_string(),
                key_auth: key_authorization.to_string(),
            }
        } else {
            RequestBody::Default {
                fqdn: dns01::fqdn(domain),
                value: dns01::txt_value(key_authorization),
            }
        }
    }

    fn send(&self, action: &str, body: &RequestBody) -> Result<()> {
        let url = format!("{}/{}", self.endpoint, action);
        let mut request = self.client.post(&url).json(body);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api(format!(
                "{} returned {}: {}",
                url,
                status,
                response.text().unwrap_or_default()
            )));
        }
        debug!("{} -> {}", url, status);
        Ok(())
    }
}

impl ChallengeProvider for HttpReqProvider {
    fn present(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()> {
        self.send("present", &self.body(domain, token, key_authorization))
    }

    fn clean_up(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()> {
        self.send("cleanup", &self.body(domain, token, key_authorization))
    }
}
