use std::result;

use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::{base64::Base64, key_pair::KeyPair};

/// CN 欄位的長度上限（RFC 5280 ub-common-name）。
const MAX_COMMON_NAME_LEN: usize = 64;

/// 建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("No SAN entries")]
    NoSanEntries,
}

type Result<T> = result::Result<T, CsrError>;

/// CSR 建構器，為每個網域加入一筆 DNS 主體替代名稱 (SAN)。
///
/// 第一個網域在不超過 64 個字元時同時作為 CN；較長時省略 CN，只靠 SAN 識別。
///
/// # 範例
///
/// ```
/// use racme_issuer::{csr::CsrBuilder, key_pair::{KeyPair, KeyType}};
///
/// let key_pair = KeyPair::generate(KeyType::Ec256).unwrap();
/// let der = CsrBuilder::new()
///     .add_san("example.com")
///     .add_san("www.example.com")
///     .build(&key_pair)
///     .unwrap()
///     .to_der()
///     .unwrap();
/// assert!(!der.is_empty());
/// ```
#[derive(Debug, Default, Clone)]
pub struct CsrBuilder {
    san_entries: Vec<String>,
}

impl CsrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以一組網域建立，保留原本順序。
    pub fn with_domains<S: AsRef<str>>(domains: &[S]) -> Self {
        domains
            .iter()
            .fold(Self::new(), |builder, d| builder.add_san(d.as_ref()))
    }

    pub fn add_san(mut self, dns_name: &str) -> Self {
        self.san_entries.push(dns_name.to_string());
        self
    }

    /// 以 `key_pair` 的私鑰簽署 CSR。未加入任何 SAN 時回傳 [`CsrError::NoSanEntries`]。
    pub fn build(self, key_pair: &KeyPair) -> Result<Csr> {
        let first = self.san_entries.first().ok_or(CsrError::NoSanEntries)?;
        let mut req_builder = X509Req::builder()?;

        if first.len() <= MAX_COMMON_NAME_LEN {
            let mut name = X509NameBuilder::new()?;
            name.append_entry_by_text("CN", first)?;
            req_builder.set_subject_name(&name.build())?;
        }

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(Csr {
            req: req_builder.build(),
        })
    }
}

/// 已簽署的 CSR。
pub struct Csr {
    req: X509Req,
}

impl Csr {
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.req.to_der()?)
    }

    /// finalize 請求所需的 base64url DER。
    pub fn to_base64(&self) -> Result<Base64> {
        Ok(Base64::new(self.to_der()?))
    }

    pub fn request(&self) -> &X509Req {
        &self.req
    }
}
