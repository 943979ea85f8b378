//! 透過 Cloudflare API 管理 DNS-01 TXT 記錄的提供者。

use std::time::Duration;

use log::{debug, info};
use reqwest::blocking::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{dns01, ChallengeProvider, ProviderError, ProviderOptions, Result};

const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Clone)]
pub struct CloudflareProvider {
    client: Client,
    api_base: String,
    token: String,
    ttl: u32,
}

impl CloudflareProvider {
    pub const TOKEN_OPTIONS: [&'static str; 2] = ["CLOUDFLARE_DNS_API_TOKEN", "CF_DNS_API_TOKEN"];
    pub const TTL_OPTION: &'static str = "CLOUDFLARE_TTL";
    pub const API_BASE_OPTION: &'static str = "CLOUDFLARE_API_BASE";
    const DEFAULT_TTL: u32 = 120;

    pub fn from_options(options: &ProviderOptions) -> Result<Self> {
        let token = options
            .get_any(&Self::TOKEN_OPTIONS)
            .ok_or_else(|| ProviderError::MissingOption(Self::TOKEN_OPTIONS[0].to_string()))?;
        let ttl = options.parse_or(Self::TTL_OPTION, Self::DEFAULT_TTL)?;
        let api_base = options
            .get(Self::API_BASE_OPTION)
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_base,
            token: token.to_string(),
            ttl,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }

    fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let envelope: Envelope<T> = self.authorized(request).send()?.json()?;
        if !envelope.success {
            return Err(ProviderError::Api(format_errors(&envelope.errors)));
        }
        envelope
            .result
            .ok_or_else(|| ProviderError::Api("response without result".to_string()))
    }

    /// 從完整名稱開始逐層往上查找，回傳第一個 Cloudflare 認得的 zone ID。
    fn zone_id(&self, domain: &str) -> Result<String> {
        for candidate in zone_candidates(domain) {
            let zones: Vec<Zone> = self.call(
                self.client
                    .get(format!("{}/zones", self.api_base))
                    .query(&[("name", candidate)]),
            )?;
            if let Some(zone) = zones.into_iter().next() {
                debug!("Cloudflare zone for {} is {} ({})", domain, candidate, zone.id);
                return Ok(zone.id);
            }
        }
        Err(ProviderError::Api(format!("no Cloudflare zone found for {}", domain)))
    }

    fn matching_records(&self, zone_id: &str, name: &str, value: &str) -> Result<Vec<Record>> {
        let records: Vec<Record> = self.call(
            self.client
                .get(format!("{}/zones/{}/dns_records", self.api_base, zone_id))
                .query(&[("type", "TXT"), ("name", name)]),
        )?;
        Ok(records
            .into_iter()
            .filter(|r| r.content.trim_matches('"') == value)
            .collect())
    }
}

impl ChallengeProvider for CloudflareProvider {
    fn present(&self, domain: &str, _token: &str, key_authorization: &str) -> Result<()> {
        let name = dns01::fqdn(domain);
        let name = name.trim_end_matches('.');
        let value = dns01::txt_value(key_authorization);
        let zone_id = self.zone_id(domain)?;

        if !self.matching_records(&zone_id, name, &value)?.is_empty() {
            debug!("TXT record {} already present", name);
            return Ok(());
        }

        let record = NewRecord {
            record_type: "TXT",
            name,
            content: format!("\"{}\"", value),
            ttl: self.ttl,
        };
        let _: Record = self.call(
            self.client
                .post(format!("{}/zones/{}/dns_records", self.api_base, zone_id))
                .json(&record),
        )?;
        info!("Created Cloudflare TXT record {}", name);
        Ok(())
    }

    fn clean_up(&self, domain: &str, _token: &str, key_authorization: &str) -> Result<()> {
        let name = dns01::fqdn(domain);
        let name = name.trim_end_matches('.');
        let value = dns01::txt_value(key_authorization);
        let zone_id = self.zone_id(domain)?;

        for record in self.matching_records(&zone_id, name, &value)? {
            let _: serde_json::Value = self.call(self.client.delete(format!(
                "{}/zones/{}/dns_records/{}",
                self.api_base, zone_id, record.id
            )))?;
            debug!("Deleted Cloudflare TXT record {}", record.id);
        }
        Ok(())
    }
}

/// `a.b.example.org` 依序產生 `a.b.example.org`、`b.example.org`、`example.org`。
fn zone_candidates(domain: &str) -> Vec<&str> {
    let domain = domain
        .strip_prefix("*.")
        .unwrap_or(domain)
        .trim_end_matches('.');
    let labels = domain.split('.').count();
    let mut candidates = Vec::new();
    let mut rest = domain;
    for _ in 0..labels.saturating_sub(1) {
        candidates.push(rest);
        match rest.split_once('.') {
            Some((_, parent)) => rest = parent,
            None => break,
        }
    }
    candidates
}

fn format_errors(errors: &[ApiError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: u32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct NewRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: String,
    ttl: u32,
}
