use std::{fmt, str::FromStr};

use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
    sha::sha256,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::{
    base64::Base64,
    jwk::{Jwk, JwkError},
};

/// 鍵相關操作的錯誤列舉，涵蓋 OpenSSL、JWK 與不支援的金鑰類型。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),
    #[error("Unsupported key material: {0}")]
    UnsupportedKey(String),
    #[error("JWK error: {0}")]
    JwkError(#[from] JwkError),
}

type Result<T> = std::result::Result<T, KeyError>;

/// 支援的簽章演算法與金鑰長度。
///
/// 每個變體都對應唯一的金鑰產生方式；字串解析不分大小寫，無法辨識的名稱一律失敗。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyType {
    #[default]
    Rsa2048,
    Rsa4096,
    Rsa8192,
    Ec256,
    Ec384,
}

impl KeyType {
    pub const ALL: [KeyType; 5] = [
        KeyType::Rsa2048,
        KeyType::Rsa4096,
        KeyType::Rsa8192,
        KeyType::Ec256,
        KeyType::Ec384,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa2048 => "RSA2048",
            Self::Rsa4096 => "RSA4096",
            Self::Rsa8192 => "RSA8192",
            Self::Ec256 => "EC256",
            Self::Ec384 => "EC384",
        }
    }

    /// JWS 保護頭中 `alg` 欄位使用的名稱。
    pub fn jws_alg(&self) -> &'static str {
        match self {
            Self::Rsa2048 | Self::Rsa4096 | Self::Rsa8192 => "RS256",
            Self::Ec256 => "ES256",
            Self::Ec384 => "ES384",
        }
    }

    /// RSA 的模數位元數，或 EC 曲線的階位元數。
    pub fn bits(&self) -> u32 {
        match self {
            Self::Rsa2048 => 2048,
            Self::Rsa4096 => 4096,
            Self::Rsa8192 => 8192,
            Self::Ec256 => 256,
            Self::Ec384 => 384,
        }
    }

    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::Rsa2048 | Self::Rsa4096 | Self::Rsa8192)
    }

    fn curve(&self) -> Option<Nid> {
        match self {
            Self::Ec256 => Some(Nid::X9_62_PRIME256V1),
            Self::Ec384 => Some(Nid::SECP384R1),
            _ => None,
        }
    }

    fn generate(&self) -> Result<PKey<Private>> {
        match self.curve() {
            Some(nid) => {
                let group = EcGroup::from_curve_name(nid)?;
                Ok(PKey::from_ec_key(EcKey::generate(&group)?)?)
            }
            None => Ok(PKey::from_rsa(Rsa::generate(self.bits())?)?),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "RSA2048" => Ok(Self::Rsa2048),
            "RSA4096" => Ok(Self::Rsa4096),
            "RSA8192" => Ok(Self::Rsa8192),
            "EC256" => Ok(Self::Ec256),
            "EC384" => Ok(Self::Ec384),
            _ => Err(KeyError::UnsupportedKeyType(s.to_string())),
        }
    }
}

impl Serialize for KeyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for KeyType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 表示一組非對稱加密的金鑰對。
///
/// 私鑰由呼叫端持有，本庫只在簽名與產生 CSR 時借用它，不會寫入任何協議狀態。
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// 金鑰類型，決定簽章演算法。
    pub key_type: KeyType,
    /// 私鑰，使用 OpenSSL 的 `PKey` 封裝。
    pub pri_key: PKey<Private>,
    /// 公鑰，從私鑰派生而來。
    pub pub_key: PKey<Public>,
}

impl KeyPair {
    /// 依指定的 [`KeyType`] 產生新的金鑰對。
    pub fn generate(key_type: KeyType) -> Result<Self> {
        let pri_key = key_type.generate()?;
        let pub_key = Self::derive_public_key(&pri_key)?;

        Ok(Self {
            key_type,
            pri_key,
            pub_key,
        })
    }

    /// 根據 PEM 格式的私鑰資料建立金鑰對，並從金鑰本身判斷 [`KeyType`]。
    ///
    /// # Errors
    ///
    /// 金鑰長度或曲線不在支援清單中時回傳 [`KeyError::UnsupportedKey`]。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        let pri_key = PKey::private_key_from_pem(pri_key_pem)?;
        let key_type = Self::detect_key_type(&pri_key)?;
        let pub_key = Self::derive_public_key(&pri_key)?;

        Ok(Self {
            key_type,
            pri_key,
            pub_key,
        })
    }

    /// 以 PKCS#8 PEM 格式輸出私鑰。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }

    fn detect_key_type(pri_key: &PKey<Private>) -> Result<KeyType> {
        match pri_key.id() {
            Id::RSA => match pri_key.rsa()?.size() * 8 {
                2048 => Ok(KeyType::Rsa2048),
                4096 => Ok(KeyType::Rsa4096),
                8192 => Ok(KeyType::Rsa8192),
                bits => Err(KeyError::UnsupportedKey(format!("RSA {} bits", bits))),
            },
            Id::EC => match pri_key.ec_key()?.group().curve_name() {
                Some(Nid::X9_62_PRIME256V1) => Ok(KeyType::Ec256),
                Some(Nid::SECP384R1) => Ok(KeyType::Ec384),
                other => Err(KeyError::UnsupportedKey(format!("EC curve {:?}", other))),
            },
            other => Err(KeyError::UnsupportedKey(format!("{:?}", other))),
        }
    }

    /// 根據私鑰派生出對應的公鑰。
    fn derive_public_key(pri_key: &PKey<Private>) -> Result<PKey<Public>> {
        match pri_key.id() {
            Id::RSA => {
                let rsa = pri_key.rsa()?;
                let pub_rsa =
                    Rsa::from_public_components(rsa.n().to_owned()?, rsa.e().to_owned()?)?;
                Ok(PKey::from_rsa(pub_rsa)?)
            }
            Id::EC => {
                let ec = pri_key.ec_key()?;
                let pub_ec = EcKey::from_public_key(ec.group(), ec.public_key())?;
                Ok(PKey::from_ec_key(pub_ec)?)
            }
            other => Err(KeyError::UnsupportedKey(format!("{:?}", other))),
        }
    }

    /// 計算金鑰的 RFC 7638 縮影（thumbprint），用於產生 key authorization。
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = Jwk::new(self)?;
        let hash = sha256(jwk.to_acme_json()?.as_bytes());
        Ok(Base64::new(hash).base64_url())
    }

    /// 取得金鑰的位元長度（RSA 為模數長度，EC 為曲線階長度）。
    pub fn key_parameters(&self) -> Result<u32> {
        match self.pri_key.id() {
            Id::RSA => Ok(self.pri_key.rsa()?.size() * 8),
            Id::EC => Ok(self.pri_key.ec_key()?.group().degree()),
            other => Err(KeyError::UnsupportedKey(format!("{:?}", other))),
        }
    }
}
