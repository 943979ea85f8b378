use openssl::{bn::BigNumContext, pkey::Id};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{base64::Base64, key_pair::KeyPair};

/// JWK相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 不支援的演算法。
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// 金鑰轉換失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversionError(String),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// JSON Web Key (JWK) 的封裝，支援 RSA 與 EC 兩種格式。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kty")]
pub enum Jwk {
    /// RSA 格式的 JWK。
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
    /// 橢圓曲線格式的 JWK。
    #[serde(rename = "EC")]
    Ec(EcJwk),
}

/// RSA 格式的 JWK 結構，包含必要的公開參數。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RsaJwk {
    n: String,
    e: String,
}

/// EC 格式的 JWK 結構，座標以曲線長度補零後編碼。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EcJwk {
    crv: String,
    x: String,
    y: String,
}

impl RsaJwk {
    fn from_key_pair(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let rsa = key_pair
            .pub_key
            .rsa()
            .map_err(|e| JwkError::KeyConversionError(e.to_string()))?;

        let n = Base64::new(rsa.n().to_vec()).base64_url();
        let e = Base64::new(rsa.e().to_vec()).base64_url();

        Ok(RsaJwk { n, e })
    }

    /// 依 RFC 7638 的字典序輸出必要欄位。
    fn to_acme_json(&self) -> Result<String, JwkError> {
        let mut map = Map::new();
        map.insert("e".to_string(), Value::String(self.e.clone()));
        map.insert("kty".to_string(), Value::String("RSA".to_string()));
        map.insert("n".to_string(), Value::String(self.n.clone()));

        serde_json::to_string(&Value::Object(map)).map_err(JwkError::from)
    }
}

impl EcJwk {
    fn from_key_pair(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let convert = |e: openssl::error::ErrorStack| JwkError::KeyConversionError(e.to_string());

        let ec = key_pair.pub_key.ec_key().map_err(convert)?;
        let group = ec.group();
        let (crv, size) = match key_pair.key_type.jws_alg() {
            "ES256" => ("P-256", 32),
            "ES384" => ("P-384", 48),
            alg => return Err(JwkError::UnsupportedAlgorithm(alg.to_string())),
        };

        let mut ctx = BigNumContext::new().map_err(convert)?;
        let mut x = openssl::bn::BigNum::new().map_err(convert)?;
        let mut y = openssl::bn::BigNum::new().map_err(convert)?;
        ec.public_key()
            .affine_coordinates(group, &mut x, &mut y, &mut ctx)
            .map_err(convert)?;

        Ok(EcJwk {
            crv: crv.to_string(),
            x: Base64::new(x.to_vec_padded(size).map_err(convert)?).base64_url(),
            y: Base64::new(y.to_vec_padded(size).map_err(convert)?).base64_url(),
        })
    }

    fn to_acme_json(&self) -> Result<String, JwkError> {
        let mut map = Map::new();
        map.insert("crv".to_string(), Value::String(self.crv.clone()));
        map.insert("kty".to_string(), Value::String("EC".to_string()));
        map.insert("x".to_string(), Value::String(self.x.clone()));
        map.insert("y".to_string(), Value::String(self.y.clone()));

        serde_json::to_string(&Value::Object(map)).map_err(JwkError::from)
    }
}

impl Jwk {
    /// 根據給定的金鑰對建立對應的 JWK。
    pub fn new(key_pair: &KeyPair) -> Result<Self, JwkError> {
        match key_pair.pub_key.id() {
            Id::RSA => Ok(Jwk::Rsa(RsaJwk::from_key_pair(key_pair)?)),
            Id::EC => Ok(Jwk::Ec(EcJwk::from_key_pair(key_pair)?)),
            other => Err(JwkError::UnsupportedAlgorithm(format!("{:?}", other))),
        }
    }

    /// 將 JWK 轉換為計算 thumbprint 所需的正規 JSON 表示。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        match self {
            Jwk::Rsa(jwk) => jwk.to_acme_json(),
            Jwk::Ec(jwk) => jwk.to_acme_json(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_pair::KeyType;

    #[test]
    fn test_rsa_jwk_canonical_form() {
        let key_pair = KeyPair::generate(KeyType::Rsa2048).unwrap();
        let json = Jwk::new(&key_pair).unwrap().to_acme_json().unwrap();

        assert!(json.starts_with("{\"e\":\"AQAB\",\"kty\":\"RSA\",\"n\":\""));
    }

    #[test]
    fn test_ec_jwk_coordinates_are_padded() {
        let key_pair = KeyPair::generate(KeyType::Ec384).unwrap();
        let jwk = Jwk::new(&key_pair).unwrap();
        let Jwk::Ec(ec) = &jwk else {
            panic!("expected EC jwk");
        };

        assert_eq!(ec.crv, "P-384");
        assert_eq!(Base64::from_url(&ec.x).unwrap().as_bytes().len(), 48);
        assert_eq!(Base64::from_url(&ec.y).unwrap().as_bytes().len(), 48);

        let json = jwk.to_acme_json().unwrap();
        assert!(json.starts_with("{\"crv\":\"P-384\",\"kty\":\"EC\",\"x\":"));
    }

    #[test]
    fn test_serialized_jwk_carries_kty_tag() {
        let key_pair = KeyPair::generate(KeyType::Ec256).unwrap();
        let value = serde_json::to_value(Jwk::new(&key_pair).unwrap()).unwrap();
        assert_eq!(value["kty"], "EC");
        assert_eq!(value["crv"], "P-256");
    }
}
