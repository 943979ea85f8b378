use chrono::{DateTime, Duration, Utc};
use openssl::{asn1::Asn1Time, nid::Nid, x509::X509};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::key_pair::{KeyError, KeyPair};

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("Certificate chain is empty")]
    EmptyChain,
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
    #[error("Certificate key error: {0}")]
    Key(#[from] KeyError),
}

type Result<T> = std::result::Result<T, CertificateError>;

/// X.509 證書封裝結構，提供基本的證書解析與續約檢查功能
pub struct Certificate {
    pub cert: X509,
}

impl Certificate {
    /// 解析 PEM 中的第一張證書。
    pub fn new(pem: &str) -> Result<Self> {
        let cert = X509::from_pem(pem.as_bytes())?;
        Ok(Certificate { cert })
    }

    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        let epoch = Asn1Time::from_unix(0)?;
        let diff = epoch.diff(self.cert.not_after())?;
        let secs = diff.days as i64 * 86400 + diff.secs as i64;
        DateTime::from_timestamp(secs, 0).ok_or(CertificateError::InvalidTimestamp)
    }

    /// 證書的 DNS SAN 項目。
    pub fn dns_names(&self) -> Vec<String> {
        self.cert
            .subject_alt_names()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.dnsname().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn common_name(&self) -> Option<String> {
        self.cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|e| e.data().as_utf8().ok())
            .map(|s| s.to_string())
    }

    /// 剩餘有效時間不超過 `threshold_days` 天（或已過期）時需要續約。
    pub fn should_renew(&self, threshold_days: u32) -> Result<bool> {
        self.should_renew_at(threshold_days, Utc::now())
    }

    pub fn should_renew_at(&self, threshold_days: u32, now: DateTime<Utc>) -> Result<bool> {
        let remaining = self.not_after()? - now;
        Ok(remaining <= Duration::days(threshold_days as i64))
    }
}

/// 一次成功簽發的結果：證書鏈與對應的私鑰。
///
/// 兩者都以 PEM 保存，呼叫端可以直接寫入檔案或交給伺服器。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    pub domains: Vec<String>,
    pub certificate_url: String,
    pub chain_pem: String,
    pub private_key_pem: String,
}

impl CertificateBundle {
    /// 建立前會先確認證書鏈至少含有一張可解析的證書。
    pub fn new(
        domains: Vec<String>,
        certificate_url: impl Into<String>,
        chain_pem: impl Into<String>,
        key_pair: &KeyPair,
    ) -> Result<Self> {
        let bundle = Self {
            domains,
            certificate_url: certificate_url.into(),
            chain_pem: chain_pem.into(),
            private_key_pem: String::from_utf8_lossy(&key_pair.to_pem()?).into_owned(),
        };
        bundle.leaf()?;
        Ok(bundle)
    }

    /// 依 PEM 順序排列的證書鏈，第一張是終端證書。
    pub fn chain(&self) -> Result<Vec<Certificate>> {
        let chain = X509::stack_from_pem(self.chain_pem.as_bytes())?;
        if chain.is_empty() {
            return Err(CertificateError::EmptyChain);
        }
        Ok(chain.into_iter().map(|cert| Certificate { cert }).collect())
    }

    pub fn leaf(&self) -> Result<Certificate> {
        self.chain()?
            .into_iter()
            .next()
            .ok_or(CertificateError::EmptyChain)
    }

    pub fn key_pair(&self) -> Result<KeyPair> {
        Ok(KeyPair::from_pem(self.private_key_pem.as_bytes())?)
    }

    pub fn should_renew(&self, threshold_days: u32) -> Result<bool> {
        self.leaf()?.should_renew(threshold_days)
    }
}
