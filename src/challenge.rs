use std::{fmt, str::FromStr};

use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::{payload::Identifier, problem::Problem};

/// 定義與挑戰（Challenge）解析相關的錯誤類型。
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("Unsupported challenge type: {0}")]
    UnsupportedType(String),
    #[error("Malformed challenge token: {0:?}")]
    InvalidToken(String),
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// token 只能包含 base64url 字元，之後會被用在檔名與 URL 路徑中。
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

type Result<T> = std::result::Result<T, ChallengeError>;

/// 表示 ACME 挑戰的類型，可用於選擇相應的驗證策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
}

impl ChallengeType {
    /// 同時有多種可用挑戰時的選擇順序，固定不變以避免每次執行結果不同。
    pub const PREFERENCE: [ChallengeType; 3] = [Self::Dns01, Self::Http01, Self::TlsAlpn01];

    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
        }
    }

    /// 在 [`Self::PREFERENCE`] 中的位置，越小越優先。
    pub fn rank(&self) -> usize {
        Self::PREFERENCE
            .iter()
            .position(|t| t == self)
            .unwrap_or(usize::MAX)
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeType {
    type Err = ChallengeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "http-01" => Ok(Self::Http01),
            "dns-01" => Ok(Self::Dns01),
            "tls-alpn-01" => Ok(Self::TlsAlpn01),
            _ => Err(ChallengeError::UnsupportedType(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for ChallengeType {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 表示 ACME 挑戰的狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// 授權（authorization）的狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    /// 判斷該狀態是否為終結狀態，即無法再進行狀態轉換。
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// 表示一個 ACME 驗證挑戰，包含驗證所需的各項資料。
///
/// 除了輪詢帶來的狀態變化外，CA 發出後即不再改變。
#[derive(Debug, Clone)]
pub struct Challenge {
    /// 驗證挑戰的類型
    pub challenge_type: ChallengeType,
    /// 驗證挑戰的 URL
    pub url: String,
    /// 挑戰 token，用於生成 key authorization
    pub token: String,
    /// 當前挑戰狀態
    pub status: ChallengeStatus,
    /// 驗證成功後可能返回的驗證時間
    pub validated: Option<String>,
    /// `token.thumbprint`，提供者要發布的是這個值而不是原始 token
    pub key_authorization: String,
    /// 驗證失敗時 CA 給出的問題描述
    pub error: Option<Problem>,
}

/// 一個域名的授權，包含 CA 提供的所有挑戰。
#[derive(Debug, Clone)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    pub expires: Option<String>,
    pub wildcard: bool,
    pub challenges: Vec<Challenge>,
}

#[derive(Deserialize)]
struct AuthorizationResponse {
    identifier: Identifier,
    status: AuthorizationStatus,
    #[serde(default)]
    expires: Option<String>,
    #[serde(default)]
    wildcard: bool,
    #[serde(default)]
    challenges: Vec<ChallengeResponse>,
}

#[derive(Deserialize)]
struct ChallengeResponse {
    r#type: String,
    url: String,
    status: ChallengeStatus,
    #[serde(default)]
    token: String,
    #[serde(default)]
    validated: Option<String>,
    #[serde(default)]
    error: Option<Problem>,
}

impl Authorization {
    /// 從 JSON 解析授權，並以帳戶 thumbprint 計算每個挑戰的 key authorization。
    ///
    /// 無法辨識的挑戰類型會被略過；token 不是 base64url 時回傳
    /// [`ChallengeError::InvalidToken`]。
    pub fn parse(json: &[u8], thumbprint: &str) -> Result<Self> {
        let response: AuthorizationResponse = serde_json::from_slice(json)?;

        let mut challenges = Vec::new();
        for resp in response.challenges {
            let challenge_type = match resp.r#type.parse::<ChallengeType>() {
                Ok(t) => t,
                Err(_) => {
                    debug!("Ignoring unsupported challenge type {}", resp.r#type);
                    continue;
                }
            };

            if !is_valid_token(&resp.token) {
                return Err(ChallengeError::InvalidToken(resp.token));
            }
            let key_authorization = format!("{}.{}", resp.token, thumbprint);

            challenges.push(Challenge {
                challenge_type,
                url: resp.url,
                token: resp.token,
                status: resp.status,
                validated: resp.validated,
                key_authorization,
                error: resp.error,
            });
        }

        Ok(Self {
            identifier: response.identifier,
            status: response.status,
            expires: response.expires,
            wildcard: response.wildcard,
            challenges,
        })
    }

    /// 以憑證請求時的寫法回傳域名，萬用字元授權會補回 `*.` 前綴。
    pub fn domain(&self) -> String {
        if self.wildcard {
            format!("*.{}", self.identifier.value)
        } else {
            self.identifier.value.clone()
        }
    }

    pub fn offered_types(&self) -> Vec<ChallengeType> {
        self.challenges.iter().map(|c| c.challenge_type).collect()
    }

    pub fn challenge(&self, challenge_type: ChallengeType) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.challenge_type == challenge_type)
    }
}
