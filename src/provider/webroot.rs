//! 將 HTTP-01 key authorization 寫入網站根目錄的提供者。

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::debug;

use super::{ChallengeProvider, ProviderError, ProviderOptions, Result};
use crate::challenge::is_valid_token;

const CHALLENGE_DIR: &str = ".well-known/acme-challenge";

/// 在 `<root>/.well-known/acme-challenge/<token>` 寫入 key authorization，
/// 由既有的網頁伺服器以 HTTP 提供。
#[derive(Debug, Clone)]
pub struct WebrootProvider {
    root: PathBuf,
}

impl WebrootProvider {
    pub const ROOT_OPTION: &'static str = "WEBROOT_PATH";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_options(options: &ProviderOptions) -> Result<Self> {
        Ok(Self::new(options.require(Self::ROOT_OPTION)?))
    }

    /// 指定 token 對應的檔案路徑。token 必須是 base64url，不能跳出挑戰目錄。
    pub fn challenge_path(&self, token: &str) -> Result<PathBuf> {
        if !is_valid_token(token) {
            return Err(ProviderError::InvalidToken(token.to_string()));
        }
        Ok(self.root.join(CHALLENGE_DIR).join(token))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ChallengeProvider for WebrootProvider {
    fn present(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()> {
        let path = self.challenge_path(token)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, key_authorization)?;
        debug!("Wrote HTTP-01 response for {} to {}", domain, path.display());
        Ok(())
    }

    fn clean_up(&self, _domain: &str, token: &str, _key_authorization: &str) -> Result<()> {
        match fs::remove_file(self.challenge_path(token)?) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
