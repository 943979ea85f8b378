//! # ACME 證書簽發庫
//!
//! 透過 ACME 協議（RFC 8555）向 CA（例如 Let's Encrypt）申請與續約 X.509 證書。
//!
//! - **client**: 對外入口 [`Client`]，綁定 CA 目錄、帳戶身分與金鑰類型。
//! - **account**: 帳戶身分與註冊；所有對 CA 的請求都經由 **signer** 以 JWS 簽名並附上新的 nonce。
//! - **order**: 訂單流程，每個網域由 **authorization** 在各自的執行緒中驗證，全部通過後才送出 CSR。
//! - **provider**: 挑戰提供者的契約、名稱到建構函式的工廠，以及內建的 manual、webroot、
//!   httpreq、cloudflare 與 exec 提供者。
//!
//! ## 示例
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use racme_issuer::{
//!     provider::{webroot::WebrootProvider, ProviderOptions},
//!     Client, KeyType,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. 取得目錄並產生帳戶金鑰
//!     let mut client = Client::builder(racme_issuer::config::LETS_ENCRYPT_STAGING)
//!         .email("admin@example.com")
//!         .key_type(KeyType::Ec256)
//!         .build()?;
//!
//!     // 2. 註冊帳戶（同意服務條款）
//!     client.register(true)?;
//!
//!     // 3. 設定 HTTP-01 提供者
//!     client.use_provider(
//!         "webroot",
//!         &ProviderOptions::new().with(WebrootProvider::ROOT_OPTION, "/var/www/html"),
//!     )?;
//!
//!     // 4. 申請證書，整個流程最多五分鐘
//!     let bundle = client.obtain(&["example.com", "www.example.com"], Duration::from_secs(300))?;
//!     std::fs::write("fullchain.pem", &bundle.chain_pem)?;
//!     std::fs::write("privkey.pem", &bundle.private_key_pem)?;
//!
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod authorization;
pub mod backoff;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod client;
pub mod config;
pub mod csr;
pub mod directory;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod problem;
pub mod protection;
pub mod provider;
pub mod session;
pub mod signature;
pub mod signer;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use certificate::CertificateBundle;
pub use challenge::ChallengeType;
pub use client::{Client, ClientBuilder, ClientError};
pub use key_pair::KeyType;
pub use order::OrderError;
pub use provider::{ChallengeProvider, ProviderOptions};
