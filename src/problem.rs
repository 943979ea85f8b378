use std::fmt;

use serde::{Deserialize, Serialize};

use crate::payload::Identifier;

const ACME_ERROR_PREFIX: &str = "urn:ietf:params:acme:error:";

/// CA 回傳的 problem 文件（RFC 7807 / RFC 8555 §6.7）。
///
/// 內容原封不動地保留，呼叫端可以直接看到 CA 給出的類型與說明。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub problem_type: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<Subproblem>,
}

/// 針對單一識別項的子問題。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type", default)]
    pub problem_type: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
}

impl Problem {
    pub fn new(problem_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            problem_type: problem_type.into(),
            detail: detail.into(),
            status: None,
            instance: None,
            subproblems: Vec::new(),
        }
    }

    /// 去掉 `urn:ietf:params:acme:error:` 前綴後的類型名稱。
    pub fn kind(&self) -> &str {
        self.problem_type
            .strip_prefix(ACME_ERROR_PREFIX)
            .unwrap_or(&self.problem_type)
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.kind() == "badNonce"
    }

    /// CA 要求使用者同意服務條款。
    pub fn is_agreement_required(&self) -> bool {
        matches!(self.kind(), "userActionRequired" | "agreementRequired")
    }

    pub fn is_caa(&self) -> bool {
        self.kind() == "caa" || self.subproblems.iter().any(|s| s.problem_type.ends_with(":caa"))
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind() == "rateLimited"
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.problem_type, self.detail)?;
        for sub in &self.subproblems {
            match &sub.identifier {
                Some(id) => write!(f, "; {} ({}: {})", id.value, sub.problem_type, sub.detail)?,
                None => write!(f, "; {}: {}", sub.problem_type, sub.detail)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strips_acme_prefix() {
        let problem = Problem::new("urn:ietf:params:acme:error:rateLimited", "slow down");
        assert_eq!(problem.kind(), "rateLimited");
        assert!(problem.is_rate_limited());

        let custom = Problem::new("about:blank", "odd");
        assert_eq!(custom.kind(), "about:blank");
    }

    #[test]
    fn test_caa_detected_in_subproblems() {
        let json = r#"{
            "type": "urn:ietf:params:acme:error:rejectedIdentifier",
            "detail": "Error finalizing order",
            "status": 403,
            "subproblems": [{
                "type": "urn:ietf:params:acme:error:caa",
                "detail": "CAA record forbids issuance",
                "identifier": {"type": "dns", "value": "example.org"}
            }]
        }"#;
        let problem: Problem = serde_json::from_str(json).unwrap();
        assert!(problem.is_caa());
        assert_eq!(problem.status, Some(403));
        assert!(problem.to_string().contains("example.org"));
    }

    #[test]
    fn test_display_keeps_detail_verbatim() {
        let problem = Problem::new(
            "urn:ietf:params:acme:error:unauthorized",
            "Incorrect TXT record \"abc\" found at _acme-challenge.example.com",
        );
        assert_eq!(
            problem.to_string(),
            "urn:ietf:params:acme:error:unauthorized: Incorrect TXT record \"abc\" found at _acme-challenge.example.com"
        );
    }
}
