//! 訂單流程：建立訂單、並行驗證每個網域、送出 CSR、等待簽發並下載證書鏈。
//!
//! 只要有任何一個網域驗證失敗，整筆訂單就失敗，不會只為部分網域簽發證書。

use std::{collections::HashSet, fmt};

use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    authorization::{drive_all, DomainFailure},
    backoff::{poll, PollError, PollStatus},
    certificate::{CertificateBundle, CertificateError},
    csr::{CsrBuilder, CsrError},
    key_pair::{KeyError, KeyPair, KeyType},
    payload::{FinalizeOrderPayload, Identifier, NewOrderPayload},
    problem::Problem,
    session::{retry_after, Session},
    signer::SignerError,
    transport::HttpResponse,
};

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// 定義所有訂單操作可能產生的錯誤。
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("No domains requested")]
    NoDomains,
    #[error("Invalid domain name: {0:?}")]
    InvalidDomain(String),
    #[error("Duplicate domain: {0}")]
    DuplicateDomain(String),
    #[error("Signed request failed: {0}")]
    Signer(#[from] SignerError),
    #[error("Missing Location header in new order response (status {status})")]
    MissingLocation { status: u16 },
    #[error("Malformed order: {0}")]
    Json(#[from] serde_json::Error),
    /// 每個失敗網域各一筆，依訂單中的順序排列。
    #[error("Authorization failed for {}", domains(.0))]
    Authorization(Vec<DomainFailure>),
    #[error("Timed out while {stage}")]
    Timeout {
        stage: OrderState,
        failures: Vec<DomainFailure>,
    },
    /// CA 拒絕 finalize 請求，例如 CAA 政策或 CSR 內容問題。
    #[error("Finalize rejected: {0}")]
    Finalize(Problem),
    #[error("Order invalid: {0}")]
    OrderInvalid(Problem),
    #[error("Order ended in unexpected status {0:?}")]
    UnexpectedStatus(OrderStatus),
    #[error("Order is valid but has no certificate URL")]
    MissingCertificate,
    #[error("Key pair error: {0}")]
    KeyPair(#[from] KeyError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
}

fn domains(failures: &[DomainFailure]) -> String {
    failures
        .iter()
        .map(|f| f.domain.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl OrderError {
    /// 放棄等待，而不是 CA 拒絕。
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// 不應自動重試的政策性錯誤：沒有可用的挑戰、CAA 拒絕或需要同意服務條款。
    pub fn is_policy(&self) -> bool {
        let policy_problem = |p: &Problem| p.is_caa() || p.is_agreement_required();
        match self {
            Self::Authorization(failures) => failures.iter().any(|f| {
                f.error.is_no_usable_challenge() || f.error.problem().is_some_and(policy_problem)
            }),
            _ => self.problem().is_some_and(policy_problem),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Signer(e) if e.is_transport())
    }

    /// 各網域的失敗紀錄；不是授權階段的錯誤時為空。
    pub fn failures(&self) -> &[DomainFailure] {
        match self {
            Self::Authorization(failures) | Self::Timeout { failures, .. } => failures,
            _ => &[],
        }
    }

    /// CA 回傳的原始問題描述。
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Self::Finalize(p) | Self::OrderInvalid(p) => Some(p),
            Self::Signer(e) => e.problem(),
            _ => None,
        }
    }
}

type Result<T> = std::result::Result<T, OrderError>;

/// CA 端的訂單狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// CA 回傳的訂單資源。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(skip)]
    pub url: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub authorizations: Vec<String>,
    pub finalize: String,
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub error: Option<Problem>,
}

impl Order {
    fn from_response(response: &HttpResponse, url: &str) -> Result<Self> {
        let mut order: Order = response.json()?;
        order.url = url.to_string();
        Ok(order)
    }

    fn failure(&self) -> Problem {
        self.error.clone().unwrap_or_else(|| {
            Problem::new(
                "urn:ietf:params:acme:error:serverInternal",
                format!("order {} is invalid", self.url),
            )
        })
    }
}

/// 訂單流程中的狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Created,
    Authorizing,
    Ready,
    Finalizing,
    Valid,
    Failed,
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Authorizing => "authorizing",
            Self::Ready => "ready",
            Self::Finalizing => "finalizing",
            Self::Valid => "valid",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// 檢查並正規化網域清單（去除空白與結尾的點、轉小寫），保留原本順序。
///
/// 在送出任何請求之前呼叫；重複的網域（不分大小寫）直接視為錯誤。
pub fn validate_domains<S: AsRef<str>>(domains: &[S]) -> Result<Vec<String>> {
    if domains.is_empty() {
        return Err(OrderError::NoDomains);
    }

    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(domains.len());
    for domain in domains {
        let raw = domain.as_ref();
        let name = raw.trim().trim_end_matches('.').to_ascii_lowercase();
        if !is_valid_domain(&name) {
            return Err(OrderError::InvalidDomain(raw.to_string()));
        }
        if !seen.insert(name.clone()) {
            return Err(OrderError::DuplicateDomain(name));
        }
        normalized.push(name);
    }
    Ok(normalized)
}

fn is_valid_domain(name: &str) -> bool {
    let base = name.strip_prefix("*.").unwrap_or(name);
    if base.is_empty() || name.len() > MAX_DOMAIN_LEN || !base.contains('.') {
        return false;
    }
    base.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

/// 驅動一筆訂單從建立到下載證書。
pub struct OrderOrchestrator<'a> {
    session: Session<'a>,
    new_order_url: &'a str,
    key_type: KeyType,
    state: OrderState,
}

impl<'a> OrderOrchestrator<'a> {
    /// `key_type` 是證書私鑰（CSR 金鑰）的類型，與帳戶金鑰無關。
    pub fn new(session: Session<'a>, new_order_url: &'a str, key_type: KeyType) -> Self {
        Self {
            session,
            new_order_url,
            key_type,
            state: OrderState::Created,
        }
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    /// 為 `domains` 申請一張證書，回傳證書鏈與新產生的私鑰。
    pub fn run<S: AsRef<str>>(mut self, domains: &[S]) -> Result<CertificateBundle> {
        let result = validate_domains(domains).and_then(|domains| self.drive(domains));
        match &result {
            Ok(bundle) => {
                self.transition(OrderState::Valid);
                info!("Certificate issued for {}", bundle.domains.join(", "));
            }
            Err(e) => {
                self.transition(OrderState::Failed);
                warn!("Order failed: {}", e);
            }
        }
        result
    }

    fn drive(&mut self, domains: Vec<String>) -> Result<CertificateBundle> {
        let order = self.create(&domains)?;

        self.transition(OrderState::Authorizing);
        self.authorize(&order)?;

        let order = self.wait_for(&order.url, OrderState::Ready, |s| {
            s == OrderStatus::Ready
        })?;
        self.transition(OrderState::Ready);

        self.transition(OrderState::Finalizing);
        let key_pair = KeyPair::generate(self.key_type)?;
        let order = self.finalize(&order, &domains, &key_pair)?;
        let order = match order.status {
            OrderStatus::Valid => order,
            _ => self.wait_for(&order.url, OrderState::Finalizing, |s| {
                s == OrderStatus::Valid
            })?,
        };

        let certificate_url = order.certificate.ok_or(OrderError::MissingCertificate)?;
        let chain = self.session.fetch(&certificate_url)?.text();
        debug!("Downloaded certificate chain from {}", certificate_url);
        Ok(CertificateBundle::new(
            domains,
            certificate_url,
            chain,
            &key_pair,
        )?)
    }

    fn create(&self, domains: &[String]) -> Result<Order> {
        let response = self.session.signer.post(
            self.new_order_url,
            &NewOrderPayload::new(domains),
            self.session.key_pair,
            self.session.key_id(),
        )?;
        let url = response
            .location()
            .ok_or(OrderError::MissingLocation {
                status: response.status.as_u16(),
            })?
            .to_string();
        let order = Order::from_response(&response, &url)?;
        info!("Created order {} for {}", order.url, domains.join(", "));

        if order.status == OrderStatus::Invalid {
            return Err(OrderError::OrderInvalid(order.failure()));
        }
        Ok(order)
    }

    /// 並行驗證所有授權，等全部結束後彙整失敗。
    fn authorize(&self, order: &Order) -> Result<()> {
        let labels: Vec<String> = order.identifiers.iter().map(|i| i.value.clone()).collect();
        let failures: Vec<DomainFailure> = drive_all(self.session, &order.authorizations, &labels)
            .into_iter()
            .filter_map(|outcome| outcome.err())
            .collect();
        if failures.is_empty() {
            return Ok(());
        }

        for failure in &failures {
            warn!("Authorization failed: {}", failure);
        }
        if failures.iter().any(|f| f.error.is_timeout()) {
            Err(OrderError::Timeout {
                stage: OrderState::Authorizing,
                failures,
            })
        } else {
            Err(OrderError::Authorization(failures))
        }
    }

    fn finalize(&self, order: &Order, domains: &[String], key_pair: &KeyPair) -> Result<Order> {
        let csr = CsrBuilder::with_domains(domains).build(key_pair)?;
        let payload = FinalizeOrderPayload::new(&csr.to_base64()?);
        let response = self
            .session
            .signer
            .post(
                &order.finalize,
                &payload,
                self.session.key_pair,
                self.session.key_id(),
            )
            .map_err(|e| match e {
                SignerError::Protocol(problem) => OrderError::Finalize(problem),
                other => other.into(),
            })?;

        let order = Order::from_response(&response, &order.url)?;
        if order.status == OrderStatus::Invalid {
            return Err(OrderError::OrderInvalid(order.failure()));
        }
        Ok(order)
    }

    /// 輪詢訂單直到 `done` 成立。`invalid` 立即結束並保留 CA 的問題描述。
    fn wait_for(
        &self,
        url: &str,
        stage: OrderState,
        done: impl Fn(OrderStatus) -> bool,
    ) -> Result<Order> {
        let session = self.session;
        poll(session.backoff, session.clock, session.deadline, |attempt| -> Result<_> {
            let response = session.fetch(url)?;
            let order = Order::from_response(&response, url)?;
            debug!("Order {} poll {}: {:?}", url, attempt, order.status);
            match order.status {
                status if done(status) => Ok(PollStatus::Done(order)),
                OrderStatus::Invalid => Err(OrderError::OrderInvalid(order.failure())),
                OrderStatus::Valid => Err(OrderError::UnexpectedStatus(OrderStatus::Valid)),
                _ => Ok(PollStatus::Pending {
                    retry_after: retry_after(&response),
                }),
            }
        })
        .map_err(|e| match e {
            PollError::Timeout { .. } | PollError::Exhausted { .. } => OrderError::Timeout {
                stage,
                failures: Vec::new(),
            },
            PollError::Failed(e) => e,
        })
    }

    fn transition(&mut self, next: OrderState) {
        debug!("Order: {} -> {}", self.state, next);
        self.state = next;
    }
}
