//! 名稱到提供者建構函式的對照表，以及每種挑戰類型目前啟用的提供者。

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use log::debug;
use thiserror::Error;

use super::{
    cloudflare::CloudflareProvider, exec::ExecProvider, httpreq::HttpReqProvider,
    manual::ManualProvider, webroot::WebrootProvider, ChallengeProvider, ProviderError,
    ProviderOptions,
};
use crate::challenge::ChallengeType;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// 排除清單與已註冊提供者篩選後，沒有任何 CA 提供的挑戰可用。
    #[error("No usable challenge for {domain} (offered: {})", format_types(.offered))]
    NoUsableChallenge {
        domain: String,
        offered: Vec<ChallengeType>,
    },
    #[error("Unrecognized provider: {0}")]
    UnrecognizedProvider(String),
    #[error("Failed to construct provider {name}: {source}")]
    Construct {
        name: String,
        #[source]
        source: ProviderError,
    },
}

fn format_types(types: &[ChallengeType]) -> String {
    if types.is_empty() {
        return "none".to_string();
    }
    types
        .iter()
        .map(ChallengeType::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

type Result<T> = std::result::Result<T, RegistryError>;

type Constructor =
    Box<dyn Fn(&ProviderOptions) -> super::Result<Arc<dyn ChallengeProvider>> + Send + Sync>;

struct FactoryEntry {
    challenge_type: ChallengeType,
    constructor: Constructor,
}

/// 以扁平字串名稱查找提供者建構函式。新增後端只需要 [`ProviderFactory::register`]。
pub struct ProviderFactory {
    entries: BTreeMap<String, FactoryEntry>,
}

impl fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderFactory")
            .field("names", &self.names())
            .finish()
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderFactory {
    /// 不含任何提供者的空表。
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// 含所有內建提供者的表。
    pub fn builtin() -> Self {
        let mut factory = Self::empty();
        factory.register("manual", ChallengeType::Dns01, manual);
        factory.register("http-01-generic", ChallengeType::Http01, webroot);
        factory.register("webroot", ChallengeType::Http01, webroot);
        factory.register("dns-generic", ChallengeType::Dns01, httpreq);
        factory.register("httpreq", ChallengeType::Dns01, httpreq);
        factory.register("cloudflare", ChallengeType::Dns01, cloudflare);
        factory.register("exec", ChallengeType::Dns01, exec);
        factory
    }

    /// 註冊（或取代）一個名稱。名稱不分大小寫。
    pub fn register<F>(&mut self, name: &str, challenge_type: ChallengeType, constructor: F)
    where
        F: Fn(&ProviderOptions) -> super::Result<Arc<dyn ChallengeProvider>>
            + Send
            + Sync
            + 'static,
    {
        self.entries.insert(
            name.to_lowercase(),
            FactoryEntry {
                challenge_type,
                constructor: Box::new(constructor),
            },
        );
    }

    /// 依名稱建立提供者，並回傳它負責的挑戰類型。
    pub fn create(
        &self,
        name: &str,
        options: &ProviderOptions,
    ) -> Result<(ChallengeType, Arc<dyn ChallengeProvider>)> {
        let key = name.trim().to_lowercase();
        let entry = self
            .entries
            .get(&key)
            .ok_or_else(|| RegistryError::UnrecognizedProvider(name.to_string()))?;
        let provider = (entry.constructor)(options).map_err(|source| RegistryError::Construct {
            name: key.clone(),
            source,
        })?;
        debug!("Constructed provider {} for {}", key, entry.challenge_type);
        Ok((entry.challenge_type, provider))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

fn manual(_: &ProviderOptions) -> super::Result<Arc<dyn ChallengeProvider>> {
    Ok(Arc::new(ManualProvider::stdio()))
}

fn webroot(options: &ProviderOptions) -> super::Result<Arc<dyn ChallengeProvider>> {
    Ok(Arc::new(WebrootProvider::from_options(options)?))
}

fn httpreq(options: &ProviderOptions) -> super::Result<Arc<dyn ChallengeProvider>> {
    Ok(Arc::new(HttpReqProvider::from_options(options)?))
}

fn cloudflare(options: &ProviderOptions) -> super::Result<Arc<dyn ChallengeProvider>> {
    Ok(Arc::new(CloudflareProvider::from_options(options)?))
}

fn exec(options: &ProviderOptions) -> super::Result<Arc<dyn ChallengeProvider>> {
    Ok(Arc::new(ExecProvider::from_options(options)?))
}

/// 每種挑戰類型最多一個啟用中的提供者，加上一份排除清單。
#[derive(Debug, Clone, Default)]
pub struct ChallengeRegistry {
    providers: BTreeMap<ChallengeType, Arc<dyn ChallengeProvider>>,
    excluded: BTreeSet<ChallengeType>,
}

impl ChallengeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 設定某挑戰類型的提供者，取代先前的設定。
    pub fn set_provider(
        &mut self,
        challenge_type: ChallengeType,
        provider: Arc<dyn ChallengeProvider>,
    ) {
        if self.providers.insert(challenge_type, provider).is_some() {
            debug!("Replaced provider for {}", challenge_type);
        }
    }

    pub fn provider(&self, challenge_type: ChallengeType) -> Option<&Arc<dyn ChallengeProvider>> {
        self.providers.get(&challenge_type)
    }

    /// 把挑戰類型加入排除清單。
    pub fn exclude_types<I: IntoIterator<Item = ChallengeType>>(&mut self, types: I) {
        self.excluded.extend(types);
    }

    pub fn excluded(&self) -> &BTreeSet<ChallengeType> {
        &self.excluded
    }

    /// 從 CA 提供的挑戰類型中，依 [`ChallengeType::PREFERENCE`] 選出第一個
    /// 未被排除且已設定提供者的類型。
    ///
    /// # Errors
    ///
    /// 沒有符合條件的類型時回傳 [`RegistryError::NoUsableChallenge`]。
    pub fn resolve(
        &self,
        domain: &str,
        offered: &[ChallengeType],
    ) -> Result<(ChallengeType, Arc<dyn ChallengeProvider>)> {
        ChallengeType::PREFERENCE
            .into_iter()
            .filter(|t| offered.contains(t) && !self.excluded.contains(t))
            .find_map(|t| self.providers.get(&t).map(|p| (t, p.clone())))
            .ok_or_else(|| RegistryError::NoUsableChallenge {
                domain: domain.to_string(),
                offered: offered.to_vec(),
            })
    }
}
