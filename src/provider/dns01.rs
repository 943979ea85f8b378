//! DNS-01 挑戰共用的記錄名稱與記錄值計算。

use openssl::sha::sha256;

use crate::base64::Base64;

const CHALLENGE_LABEL: &str = "_acme-challenge";

/// 驗證用 TXT 記錄的完整名稱（結尾帶 `.`），萬用字元前綴會被去掉。
pub fn fqdn(domain: &str) -> String {
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{}.{}.", CHALLENGE_LABEL, domain.trim_end_matches('.'))
}

/// TXT 記錄值：key authorization 的 SHA-256，以 URL-safe Base64 編碼。
pub fn txt_value(key_authorization: &str) -> String {
    Base64::new(sha256(key_authorization.as_bytes())).base64_url()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fqdn_strips_wildcard_and_adds_root() {
        assert_eq!(fqdn("example.org"), "_acme-challenge.example.org.");
        assert_eq!(fqdn("*.example.org"), "_acme-challenge.example.org.");
        assert_eq!(fqdn("example.org."), "_acme-challenge.example.org.");
    }

    #[test]
    fn test_txt_value_is_unpadded_digest() {
        // RFC 8555 §8.4 的範例 key authorization
        let key_auth = "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA.9jg46WB3rR_AHD-EBXdN7cBkH1WOu0tA3M9fm21mqTI";
        let value = txt_value(key_auth);
        assert_eq!(value.len(), 43);
        assert!(!value.contains('='));
        assert_eq!(value, txt_value(key_auth));
    }
}
