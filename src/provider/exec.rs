//! 呼叫外部程式發布 DNS-01 記錄的提供者。
//!
//! 預設以 `<program> present|cleanup <fqdn> <value>` 呼叫；RAW 模式改傳
//! `<program> present|cleanup <domain> <token> <keyAuth>`。

use std::{path::PathBuf, process::Command};

use log::debug;

use super::{dns01, ChallengeProvider, ProviderError, ProviderOptions, Result};

#[derive(Debug, Clone)]
pub struct ExecProvider {
    program: PathBuf,
    raw: bool,
}

impl ExecProvider {
    pub const PATH_OPTION: &'static str = "EXEC_PATH";
    pub const MODE_OPTION: &'static str = "EXEC_MODE";

    pub fn new(program: impl Into<PathBuf>, raw: bool) -> Self {
        Self {
            program: program.into(),
            raw,
        }
    }

    pub fn from_options(options: &ProviderOptions) -> Result<Self> {
        let program = options.require(Self::PATH_OPTION)?;
        let raw = match options.get(Self::MODE_OPTION) {
            None => false,
            Some(mode) if mode.eq_ignore_ascii_case("RAW") => true,
            Some(mode) => {
                return Err(ProviderError::InvalidOption {
                    name: Self::MODE_OPTION.to_string(),
                    reason: format!("unknown mode {}", mode),
                })
            }
        };
        Ok(Self::new(program, raw))
    }

    fn arguments(&self, domain: &str, token: &str, key_authorization: &str) -> Vec<String> {
        if self.raw {
            vec![
                domain.to_string(),
                token.to_string(),
                key_authorization.to_string(),
            ]
        } else {
            vec![dns01::fqdn(domain), dns01::txt_value(key_authorization)]
        }
    }

    fn run(&self, action: &str, args: Vec<String>) -> Result<()> {
        let status = Command::new(&self.program).arg(action).args(&args).status()?;
        debug!("{} {} exited with {}", self.program.display(), action, status);
        if status.success() {
            Ok(())
        } else {
            Err(ProviderError::Command {
                program: self.program.display().to_string(),
                status: status.to_string(),
            })
        }
    }
}

impl ChallengeProvider for ExecProvider {
    fn present(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()> {
        self.run("present", self.arguments(domain, token, key_authorization))
    }

    fn clean_up(&self, domain: &str, token: &str, key_authorization: &str) -> Result<()> {
        self.run("cleanup", self.arguments(domain, token, key_authorization))
    }
}
