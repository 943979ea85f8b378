use serde::{Deserialize, Serialize};
use std::{collections::HashSet, error::Error};

use crate::base64::Base64;

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 該 trait 要求實作者能夠序列化、反序列化，並提供轉換成 JSON 字串與 Base64 表示的功能，
/// 同時必須實作自定義的驗證邏輯。
pub trait PayloadT: Serialize + for<'de> Deserialize<'de> {
    /// 將載荷轉換成 JSON 格式的字串。
    ///
    /// # 錯誤
    ///
    /// 若序列化失敗，則回傳 [`serde_json::Error`]。
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 將載荷先轉換成 JSON 字串，再以 Base64 進行編碼。
    fn to_base64(&self) -> Result<Base64, serde_json::Error> {
        let json_string = self.to_json_string()?;
        Ok(Base64::new(json_string.as_bytes()))
    }

    /// 驗證載荷資料是否符合預期的規範。
    fn validate(&self) -> Result<(), Box<dyn Error>>;
}

/// 表示建立新帳號所需的載荷資料。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewAccountPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    contact: Vec<String>,
    #[serde(rename = "termsOfServiceAgreed")]
    terms_of_service_agreed: bool,
}

impl NewAccountPayload {
    /// 建立一個新的 `NewAccountPayload` 實例。
    ///
    /// 傳入的 `email` 會自動補足 `mailto:` 前綴，若已包含則不重複補充；
    /// 未提供 email 時不送出 `contact` 欄位。
    pub fn new(email: Option<&str>, terms_of_service_agreed: bool) -> Self {
        let contact = match email {
            Some(email) if email.starts_with("mailto:") => vec![email.to_string()],
            Some(email) => vec![format!("mailto:{}", email)],
            None => Vec::new(),
        };

        NewAccountPayload {
            contact,
            terms_of_service_agreed,
        }
    }

    pub fn contact(&self) -> &[String] {
        &self.contact
    }
}

impl PayloadT for NewAccountPayload {
    /// 聯絡資訊若存在，必須是合法的 `mailto:` URI。
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        for contact in &self.contact {
            let address = contact.trim_start_matches("mailto:");
            if address.is_empty() || !address.contains('@') {
                return Err(format!("Invalid contact address: {}", contact).into());
            }
        }
        Ok(())
    }
}

/// 表示一個識別項，用來描述證書所涵蓋的主機名稱等資訊。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: &str) -> Self {
        Identifier {
            type_: "dns".to_string(),
            value: value.to_string(),
        }
    }
}

/// 表示建立新訂單時所需的載荷資料。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    /// 給定一組域名，為每個域名建立類型為 `"dns"` 的識別項，保留原本順序。
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        let identifiers = domains
            .iter()
            .map(|domain| Identifier::dns(domain.as_ref()))
            .collect();

        NewOrderPayload { identifiers }
    }
}

impl PayloadT for NewOrderPayload {
    /// 驗證新訂單載荷資料：
    ///
    /// - 必須至少包含一個識別項。
    /// - 所有識別項的類型必須為 `"dns"` 且值不得為空。
    /// - 識別項不得重複。
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        if self.identifiers.is_empty() {
            return Err("At least one identifier is required".into());
        }
        let mut seen = HashSet::new();
        for identifier in &self.identifiers {
            if identifier.type_ != "dns" {
                return Err("Identifier type must be 'dns'".into());
            }
            if identifier.value.is_empty() {
                return Err("Identifier value cannot be empty".into());
            }
            if !seen.insert(identifier.value.as_str()) {
                return Err(format!("Duplicate identifier: {}", identifier.value).into());
            }
        }
        Ok(())
    }
}

/// 通知 CA 挑戰已就緒的載荷，內容為空物件。
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ChallengeValidationPayload {}

impl ChallengeValidationPayload {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadT for ChallengeValidationPayload {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        Ok(())
    }
}

/// 表示最終化訂單時所需的載荷資料，內含 DER 格式 CSR 的 Base64 URL 編碼。
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    #[serde(rename = "csr")]
    csr_b64_str: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_b64: &Base64) -> Self {
        FinalizeOrderPayload {
            csr_b64_str: csr_b64.base64_url(),
        }
    }

    pub fn csr(&self) -> &str {
        &self.csr_b64_str
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<(), Box<dyn Error>> {
        if self.csr_b64_str.is_empty() {
            return Err("CSR cannot be empty".into());
        }
        Ok(())
    }
}
