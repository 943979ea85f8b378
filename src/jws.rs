//! 此模組提供 JSON Web Signature (JWS) 的扁平 JSON 序列化結構。

use serde::{Deserialize, Serialize};

use crate::base64::Base64;

/// 表示一個 JSON Web Signature (JWS) 物件。
///
/// 此物件包含三個部分：
/// - `header`：保護資料，經 Base64 URL 安全編碼後的字串。
/// - `payload`：負載資料，經 Base64 URL 安全編碼後的字串；POST-as-GET 時為空字串。
/// - `signature`：簽名，經 Base64 URL 安全編碼後的字串。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Jws {
    #[serde(rename = "protected")]
    pub header: String,
    pub payload: String,
    pub signature: String,
}

impl Jws {
    pub fn new(header_b64: &Base64, payload_b64: &Base64, signature_b64: &Base64) -> Self {
        Jws {
            header: header_b64.base64_url(),
            payload: payload_b64.base64_url(),
            signature: signature_b64.base64_url(),
        }
    }

    /// 將 `Jws` 實例序列化為 JSON 格式的字串。
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
