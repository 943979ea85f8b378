//! 由操作者手動新增 DNS TXT 記錄的提供者。

use std::{
    fmt,
    io::{self, BufRead, BufReader, Write},
    sync::Mutex,
};

use log::info;

use super::{dns01, ChallengeProvider, ProviderError, Result};

struct Terminal {
    input: Box<dyn BufRead + Send>,
    output: Box<dyn Write + Send>,
}

/// 印出 DNS-01 設定步驟，並等待操作者按下 Enter 確認。
///
/// 多個網域同時驗證時，提示會依序出現，不會交錯。
pub struct ManualProvider {
    terminal: Mutex<Terminal>,
}

impl fmt::Debug for ManualProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualProvider").finish_non_exhaustive()
    }
}

impl ManualProvider {
    /// 使用標準輸入與標準輸出。
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }

    pub fn new<R, W>(input: R, output: W) -> Self
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            terminal: Mutex::new(Terminal {
                input: Box::new(input),
                output: Box::new(output),
            }),
        }
    }

    fn with_terminal<T>(&self, f: impl FnOnce(&mut Terminal) -> Result<T>) -> Result<T> {
        let mut terminal = self
            .terminal
            .lock()
            .map_err(|_| ProviderError::Aborted("terminal lock poisoned".to_string()))?;
        f(&mut terminal)
    }
}

impl ChallengeProvider for ManualProvider {
    fn present(&self, domain: &str, _token: &str, key_authorization: &str) -> Result<()> {
        let fqdn = dns01::fqdn(domain);
        let value = dns01::txt_value(key_authorization);

        self.with_terminal(|terminal| {
            writeln!(
                terminal.output,
                "DNS-01 Validation Steps for {domain}:\n\
                 1. Add TXT record:\n\
                 2. Hostname: {fqdn}\n\
                 3. Value: {value}\n\
                 4. Recommended TTL: 300\n\
                 5. Wait for DNS propagation, then press Enter to continue"
            )?;
            terminal.output.flush()?;

            let mut line = String::new();
            if terminal.input.read_line(&mut line)? == 0 {
                return Err(ProviderError::Aborted(format!(
                    "input closed before {} was confirmed",
                    domain
                )));
            }
            info!("Operator confirmed TXT record for {}", domain);
            Ok(())
        })
    }

    fn clean_up(&self, domain: &str, _token: &str, key_authorization: &str) -> Result<()> {
        let fqdn = dns01::fqdn(domain);
        let value = dns01::txt_value(key_authorization);

        self.with_terminal(|terminal| {
            writeln!(
                terminal.output,
                "You can now remove the TXT record {fqdn} with value {value}"
            )?;
            Ok(terminal.output.flush()?)
        })
    }
}
