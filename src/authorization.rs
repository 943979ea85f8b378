//! 單一網域的授權流程：選擇挑戰、發布證明、通知 CA、輪詢結果，最後清理。

use std::fmt;

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    backoff::{poll, PollError, PollStatus},
    challenge::{Authorization, AuthorizationStatus, Challenge, ChallengeError, ChallengeType},
    payload::ChallengeValidationPayload,
    problem::Problem,
    provider::{ChallengeProvider, ProviderError, RegistryError},
    session::{retry_after, Session},
    signer::SignerError,
};

/// 單一網域授權失敗的原因。
#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("{0}")]
    NoUsableChallenge(#[source] RegistryError),
    #[error("Provider failed to present {challenge_type} proof: {source}")]
    Present {
        challenge_type: ChallengeType,
        #[source]
        source: ProviderError,
    },
    /// CA 判定驗證失敗，保留 CA 給出的原始問題描述。
    #[error("Authorization invalid: {0}")]
    Invalid(Problem),
    #[error("Authorization ended in unexpected status {0:?}")]
    UnexpectedStatus(AuthorizationStatus),
    #[error("Timed out waiting for authorization after {attempts} poll(s)")]
    Timeout { attempts: u32 },
    #[error("Authorization still pending after {attempts} poll(s)")]
    PollingExhausted { attempts: u32 },
    #[error("Signed request failed: {0}")]
    Signer(#[from] SignerError),
    #[error("Malformed authorization: {0}")]
    Parse(#[from] ChallengeError),
    #[error("Authorization no longer offers the {0} challenge")]
    MissingChallenge(ChallengeType),
    #[error("Authorization worker panicked")]
    Panicked,
}

impl AuthorizationError {
    /// 放棄等待（期限或輪詢次數用完），而不是 CA 拒絕。
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::PollingExhausted { .. })
    }

    pub fn is_no_usable_challenge(&self) -> bool {
        matches!(self, Self::NoUsableChallenge(_))
    }

    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Self::Invalid(problem) => Some(problem),
            Self::Signer(e) => e.problem(),
            _ => None,
        }
    }
}

impl From<PollError<AuthorizationError>> for AuthorizationError {
    fn from(e: PollError<AuthorizationError>) -> Self {
        match e {
            PollError::Timeout { attempts } => Self::Timeout { attempts },
            PollError::Exhausted { attempts } => Self::PollingExhausted { attempts },
            PollError::Failed(e) => e,
        }
    }
}

type Result<T> = std::result::Result<T, AuthorizationError>;

/// 授權流程中的狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    Created,
    ChallengeSelected,
    ProofPublished,
    Notified,
    Polling,
    Valid,
    Invalid,
    Error,
}

impl fmt::Display for AuthorizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::ChallengeSelected => "challenge-selected",
            Self::ProofPublished => "proof-published",
            Self::Notified => "notified",
            Self::Polling => "polling",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// 某個網域授權失敗的紀錄。授權內容還沒取得時，`domain` 為訂單中對應的識別碼，
/// 兩者都沒有時才是授權 URL。
#[derive(Debug)]
pub struct DomainFailure {
    pub domain: String,
    pub error: AuthorizationError,
}

impl fmt::Display for DomainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.domain, self.error)
    }
}

/// 驅動一筆授權直到終結狀態。每個驅動器只屬於一個執行緒，獨佔自己的授權資料。
pub struct AuthorizationDriver<'a> {
    session: Session<'a>,
    url: String,
    domain: Option<String>,
    label: Option<String>,
    state: AuthorizationState,
}

impl<'a> AuthorizationDriver<'a> {
    pub fn new(session: Session<'a>, url: impl Into<String>) -> Self {
        Self {
            session,
            url: url.into(),
            domain: None,
            label: None,
            state: AuthorizationState::Created,
        }
    }

    /// 授權內容取得之前，用來標示失敗的網域名稱。
    pub fn with_label(mut self, domain: impl Into<String>) -> Self {
        self.label = Some(domain.into());
        self
    }

    pub fn state(&self) -> AuthorizationState {
        self.state
    }

    fn name(&self) -> &str {
        self.domain
            .as_deref()
            .or(self.label.as_deref())
            .unwrap_or(self.url.as_str())
    }

    /// 執行完整流程。已經是 `valid` 的授權直接沿用，不會呼叫任何提供者。
    ///
    /// 一旦選定提供者，無論結果如何都會呼叫恰好一次 `clean_up`，其錯誤只記錄不回報。
    pub fn run(mut self) -> std::result::Result<Authorization, DomainFailure> {
        let result = self.drive();
        self.transition(match &result {
            Ok(_) => AuthorizationState::Valid,
            Err(AuthorizationError::Invalid(_)) => AuthorizationState::Invalid,
            Err(_) => AuthorizationState::Error,
        });
        result.map_err(|error| DomainFailure {
            domain: self.name().to_string(),
            error,
        })
    }

    fn fetch(&self) -> Result<Authorization> {
        let response = self.session.fetch(&self.url)?;
        Ok(Authorization::parse(&response.body, self.session.thumbprint)?)
    }

    fn drive(&mut self) -> Result<Authorization> {
        let authz = self.fetch()?;
        let domain = authz.domain();
        self.domain = Some(domain.clone());

        match authz.status {
            AuthorizationStatus::Valid => {
                info!("Reusing valid authorization for {}", domain);
                return Ok(authz);
            }
            AuthorizationStatus::Pending => {}
            AuthorizationStatus::Invalid => {
                return Err(AuthorizationError::Invalid(failure_problem(&authz, None)))
            }
            other => return Err(AuthorizationError::UnexpectedStatus(other)),
        }

        let (challenge_type, provider) = self
            .session
            .registry
            .resolve(&domain, &authz.offered_types())
            .map_err(AuthorizationError::NoUsableChallenge)?;
        let challenge = authz
            .challenge(challenge_type)
            .cloned()
            .ok_or(AuthorizationError::MissingChallenge(challenge_type))?;
        self.transition(AuthorizationState::ChallengeSelected);

        let result = self.validate(&domain, &challenge, provider.as_ref());

        if let Err(e) = provider.clean_up(&domain, &challenge.token, &challenge.key_authorization) {
            warn!("Cleanup of {} proof for {} failed: {}", challenge_type, domain, e);
        }
        result
    }

    fn validate(
        &mut self,
        domain: &str,
        challenge: &Challenge,
        provider: &dyn ChallengeProvider,
    ) -> Result<Authorization> {
        provider
            .present(domain, &challenge.token, &challenge.key_authorization)
            .map_err(|source| AuthorizationError::Present {
                challenge_type: challenge.challenge_type,
                source,
            })?;
        self.transition(AuthorizationState::ProofPublished);

        self.session.signer.post(
            &challenge.url,
            &ChallengeValidationPayload::new(),
            self.session.key_pair,
            self.session.key_id(),
        )?;
        self.transition(AuthorizationState::Notified);

        self.transition(AuthorizationState::Polling);
        let session = self.session;
        let url = self.url.clone();
        let challenge_type = challenge.challenge_type;
        let authz = poll(session.backoff, session.clock, session.deadline, |attempt| -> Result<_> {
            let response = session.fetch(&url)?;
            let authz = Authorization::parse(&response.body, session.thumbprint)?;
            debug!("Authorization {} poll {}: {:?}", url, attempt, authz.status);
            match authz.status {
                AuthorizationStatus::Valid => Ok(PollStatus::Done(authz)),
                AuthorizationStatus::Pending => Ok(PollStatus::Pending {
                    retry_after: retry_after(&response),
                }),
                AuthorizationStatus::Invalid => Err(AuthorizationError::Invalid(failure_problem(
                    &authz,
                    Some(challenge_type),
                ))),
                other => Err(AuthorizationError::UnexpectedStatus(other)),
            }
        })?;

        info!("Authorization for {} is valid", domain);
        Ok(authz)
    }

    fn transition(&mut self, next: AuthorizationState) {
        debug!(
            "Authorization {} ({}): {} -> {}",
            self.name(),
            self.url,
            self.state,
            next
        );
        self.state = next;
    }
}

/// CA 附在挑戰上的錯誤；沒有時產生一個描述狀態的問題。
fn failure_problem(authz: &Authorization, selected: Option<ChallengeType>) -> Problem {
    let from_selected = selected
        .and_then(|t| authz.challenge(t))
        .and_then(|c| c.error.clone());
    from_selected
        .or_else(|| authz.challenges.iter().find_map(|c| c.error.clone()))
        .unwrap_or_else(|| {
            Problem::new(
                "urn:ietf:params:acme:error:unauthorized",
                format!("authorization for {} is invalid", authz.domain()),
            )
        })
}

/// 驗證一組授權 URL 時回傳的結果，依輸入順序排列。
pub type DriverOutcome = std::result::Result<Authorization, DomainFailure>;

/// 在各自的執行緒中同時驅動每一筆授權，全部結束後才回傳。
///
/// `labels` 依索引對應 `urls`（通常是訂單的識別碼），只在授權內容無法取得時用於標示失敗。
pub fn drive_all(session: Session<'_>, urls: &[String], labels: &[String]) -> Vec<DriverOutcome> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                let label = labels.get(i).unwrap_or(url);
                let driver = AuthorizationDriver::new(session, url.clone()).with_label(label.clone());
                (label, scope.spawn(move || driver.run()))
            })
            .collect();

        handles
            .into_iter()
            .map(|(label, handle)| {
                handle.join().unwrap_or_else(|_| {
                    Err(DomainFailure {
                        domain: label.clone(),
                        error: AuthorizationError::Panicked,
                    })
                })
            })
            .collect()
    })
}
