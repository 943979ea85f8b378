use crate::{base64::Base64, key_pair::KeyPair};
use openssl::{
    ecdsa::EcdsaSig,
    hash::{hash, MessageDigest},
    sign::Signer,
};
use thiserror::Error;

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    /// 簽名過程中發生錯誤，附帶錯誤訊息。
    #[error("Signing error: {0}")]
    SigningError(String),
    /// 不支援的簽名演算法，附帶未支援的演算法名稱。
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

impl From<openssl::error::ErrorStack> for SignatureError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        SignatureError::SigningError(e.to_string())
    }
}

/// 定義簽名演算法的介面。
trait SignatureAlgorithmT {
    /// 使用指定的金鑰對資料進行簽名，回傳 JWS 所需的原始簽名位元組。
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError>;
}

/// RS256：RSASSA-PKCS1-v1_5 搭配 SHA-256。
struct RsaSignature;

impl SignatureAlgorithmT for RsaSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

/// ES256 / ES384：JWS 要求 `r || s` 的定長串接，而非 OpenSSL 預設的 DER 格式。
struct EcdsaSignature {
    digest: MessageDigest,
    coordinate_len: i32,
}

impl SignatureAlgorithmT for EcdsaSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let digest = hash(self.digest, data)?;
        let ec_key = key_pair.pri_key.ec_key()?;
        let sig = EcdsaSig::sign(&digest, &ec_key)?;

        let mut raw = sig.r().to_vec_padded(self.coordinate_len)?;
        raw.extend(sig.s().to_vec_padded(self.coordinate_len)?);
        Ok(raw)
    }
}

/// 簽名演算法工廠，用於根據 JWS 演算法名稱取得對應的實作。
struct SignatureAlgorithmFactory;

impl SignatureAlgorithmFactory {
    fn get_algorithm(alg_name: &str) -> Result<Box<dyn SignatureAlgorithmT>, SignatureError> {
        match alg_name {
            "RS256" => Ok(Box::new(RsaSignature)),
            "ES256" => Ok(Box::new(EcdsaSignature {
                digest: MessageDigest::sha256(),
                coordinate_len: 32,
            })),
            "ES384" => Ok(Box::new(EcdsaSignature {
                digest: MessageDigest::sha384(),
                coordinate_len: 48,
            })),
            _ => Err(SignatureError::UnsupportedAlgorithm(alg_name.to_string())),
        }
    }
}

/// 根據提供的 header、payload 與金鑰對，生成對應的簽名。
///
/// 簽名輸入為 `BASE64URL(header) || '.' || BASE64URL(payload)`，
/// 演算法由金鑰對的 [`KeyType`](crate::key_pair::KeyType) 決定。
pub fn create_signature(
    header_b64: &Base64,
    payload_b64: &Base64,
    key_pair: &KeyPair,
) -> Result<Base64, SignatureError> {
    let signing_input = format!("{}.{}", header_b64.base64_url(), payload_b64.base64_url());
    let algorithm = SignatureAlgorithmFactory::get_algorithm(key_pair.key_type.jws_alg())?;

    let signature = algorithm.sign(signing_input.as_bytes(), key_pair)?;

    Ok(Base64::new(&signature))
}
