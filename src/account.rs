//! ACME 帳戶身分與註冊流程。

use log::info;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    directory::Directory,
    key_pair::{KeyError, KeyPair, KeyType},
    payload::{NewAccountPayload, PayloadT},
    signer::{KeyId, RequestSigner, SignerError},
};

/// 錯誤類型，用於描述在處理 ACME 帳戶相關操作時可能發生的各類錯誤。
#[derive(Debug, Error)]
pub enum AccountError {
    /// CA 要求同意服務條款，但呼叫端沒有同意。
    #[error("The authority requires agreement to its terms of service{}", terms_suffix(.terms_of_service))]
    AgreementRequired { terms_of_service: Option<String> },
    #[error("Invalid account payload: {0}")]
    InvalidPayload(String),
    #[error("Signed request failed: {0}")]
    Signer(#[from] SignerError),
    #[error("Account response is missing the Location header ({status})")]
    MissingLocation { status: StatusCode },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

fn terms_suffix(terms: &Option<String>) -> String {
    terms
        .as_ref()
        .map(|url| format!(": {}", url))
        .unwrap_or_default()
}

/// 結果類型，當操作成功返回 `T`，失敗則返回 [`AccountError`].
pub type Result<T> = std::result::Result<T, AccountError>;

/// CA 端帳戶狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

/// CA 指派的註冊紀錄。不含私鑰，可安全地持久化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// 帳戶 URL，之後所有請求都以它作為 `kid`。
    pub url: String,
    pub status: AccountStatus,
    #[serde(default)]
    pub contact: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    status: AccountStatus,
    #[serde(default)]
    contact: Vec<String>,
}

/// 呼叫端提供的帳戶身分：電子郵件、帳戶金鑰與（註冊後的）註冊紀錄。
///
/// 只有 [`register`] 會填入註冊紀錄，之後在整個工作階段內保持不變。
#[derive(Debug, Clone)]
pub struct AccountIdentity {
    email: Option<String>,
    key_pair: KeyPair,
    registration: Option<RegistrationRecord>,
}

impl AccountIdentity {
    pub fn new(email: Option<&str>, key_pair: KeyPair) -> Self {
        Self {
            email: email.map(str::to_string),
            key_pair,
            registration: None,
        }
    }

    /// 以新產生的金鑰建立身分。
    pub fn generate(email: Option<&str>, key_type: KeyType) -> Result<Self> {
        Ok(Self::new(email, KeyPair::generate(key_type)?))
    }

    /// 使用先前保存的註冊紀錄還原身分，省去再次註冊。
    pub fn with_registration(mut self, registration: RegistrationRecord) -> Self {
        self.registration = Some(registration);
        self
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn registration(&self) -> Option<&RegistrationRecord> {
        self.registration.as_ref()
    }

    /// 已註冊帳戶的 URL，作為保護頭中的 `kid`。
    pub fn account_url(&self) -> Option<&str> {
        self.registration.as_ref().map(|r| r.url.as_str())
    }
}

/// 向 CA 註冊帳戶，並把註冊紀錄寫入 `identity`。
///
/// 冪等：身分已有註冊紀錄時直接回傳；CA 已認得這把金鑰時（HTTP 200）回傳既有帳戶。
///
/// # Errors
///
/// - CA 公布了服務條款而 `agree_to_terms` 為 `false`：在任何網路請求之前回傳
///   [`AccountError::AgreementRequired`]。
/// - CA 回傳 `userActionRequired` / `agreementRequired`：同樣對應到
///   [`AccountError::AgreementRequired`]。
pub fn register(
    signer: &RequestSigner,
    directory: &Directory,
    identity: &mut AccountIdentity,
    agree_to_terms: bool,
) -> Result<RegistrationRecord> {
    if let Some(record) = identity.registration() {
        return Ok(record.clone());
    }

    if !agree_to_terms {
        if let Some(terms) = directory.terms_of_service() {
            return Err(AccountError::AgreementRequired {
                terms_of_service: Some(terms.to_string()),
            });
        }
    }

    let payload = NewAccountPayload::new(identity.email(), agree_to_terms);
    payload
        .validate()
        .map_err(|e| AccountError::InvalidPayload(e.to_string()))?;

    let response = signer
        .post(&directory.new_account, &payload, identity.key_pair(), KeyId::Jwk)
        .map_err(|e| match e.problem() {
            Some(problem) if problem.is_agreement_required() => AccountError::AgreementRequired {
                terms_of_service: problem
                    .instance
                    .clone()
                    .or_else(|| directory.terms_of_service().map(str::to_string)),
            },
            _ => AccountError::Signer(e),
        })?;

    let url = response
        .location()
        .ok_or(AccountError::MissingLocation {
            status: response.status,
        })?
        .to_string();
    let body: AccountResponse = response.json()?;

    if response.status == StatusCode::CREATED {
        info!("Registered new ACME account {}", url);
    } else {
        info!("Reusing existing ACME account {}", url);
    }

    let record = RegistrationRecord {
        url,
        status: body.status,
        contact: body.contact,
    };
    identity.registration = Some(record.clone());
    Ok(record)
}
