//! 對外的入口：綁定 CA 目錄、帳戶身分與金鑰類型，註冊帳戶、設定挑戰提供者並申請證書。

use std::{sync::Arc, time::Duration};

use log::info;
use thiserror::Error;

use crate::{
    account::{register, AccountError, AccountIdentity, RegistrationRecord},
    backoff::{deadline_after, BackoffPolicy, Clock, SystemClock},
    certificate::CertificateBundle,
    challenge::ChallengeType,
    config::{ClientConfig, ConfigError, LETS_ENCRYPT_PRODUCTION},
    directory::{Directory, DirectoryError},
    key_pair::{KeyError, KeyType},
    order::{OrderError, OrderOrchestrator},
    provider::{ChallengeProvider, ChallengeRegistry, ProviderFactory, ProviderOptions, RegistryError},
    session::Session,
    signer::RequestSigner,
    transport::{HttpTransport, Transport, TransportError},
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Account error: {0}")]
    Account(#[from] AccountError),
    #[error("Provider error: {0}")]
    Provider(#[from] RegistryError),
    #[error("{0}")]
    Order(#[from] OrderError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Account is not registered; call register first")]
    NotRegistered,
}

type Result<T> = std::result::Result<T, ClientError>;

/// [`Client`] 的建構器。
///
/// # 範例
///
/// ```no_run
/// use std::time::Duration;
/// use racme_issuer::{client::ClientBuilder, config::LETS_ENCRYPT_STAGING, key_pair::KeyType};
///
/// let mut client = ClientBuilder::new(LETS_ENCRYPT_STAGING)
///     .email("admin@example.org")
///     .key_type(KeyType::Ec256)
///     .build()?;
/// client.register(true)?;
/// client.use_provider("webroot", &racme_issuer::provider::ProviderOptions::new()
///     .with("WEBROOT_PATH", "/var/www/html"))?;
/// let bundle = client.obtain(&["example.org", "www.example.org"], Duration::from_secs(300))?;
/// println!("{}", bundle.chain_pem);
/// # Ok::<(), racme_issuer::client::ClientError>(())
/// ```
pub struct ClientBuilder {
    directory_url: String,
    email: Option<String>,
    identity: Option<AccountIdentity>,
    key_type: KeyType,
    request_timeout: Duration,
    order_timeout: Duration,
    backoff: BackoffPolicy,
    excluded: Vec<ChallengeType>,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    factory: ProviderFactory,
}

impl ClientBuilder {
    pub const DEFAULT_DIRECTORY_URL: &'static str = LETS_ENCRYPT_PRODUCTION;
    pub const DEFAULT_KEY_TYPE: KeyType = KeyType::Rsa2048;
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = HttpTransport::DEFAULT_TIMEOUT;
    pub const DEFAULT_ORDER_TIMEOUT: Duration = Duration::from_secs(600);

    pub fn new(directory_url: &str) -> Self {
        ClientBuilder {
            directory_url: directory_url.to_string(),
            email: None,
            identity: None,
            key_type: Self::DEFAULT_KEY_TYPE,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            order_timeout: Self::DEFAULT_ORDER_TIMEOUT,
            backoff: BackoffPolicy::default(),
            excluded: Vec::new(),
            transport: None,
            clock: None,
            factory: ProviderFactory::builtin(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut builder = Self::new(&config.directory_url)
            .key_type(config.key_type)
            .request_timeout(config.request_timeout())
            .order_timeout(config.order_timeout())
            .backoff(config.backoff.to_policy()?)
            .exclude(config.exclude.iter().copied());
        builder.email = config.email.clone();
        Ok(builder)
    }

    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    /// 使用呼叫端既有的帳戶身分（可能已含註冊紀錄），而不是產生新金鑰。
    pub fn identity(mut self, identity: AccountIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// 新帳戶金鑰與證書金鑰的類型。
    pub fn key_type(mut self, key_type: KeyType) -> Self {
        self.key_type = key_type;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// [`Client::issue`] 使用的整體期限。
    pub fn order_timeout(mut self, timeout: Duration) -> Self {
        self.order_timeout = timeout;
        self
    }

    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn exclude<I: IntoIterator<Item = ChallengeType>>(mut self, types: I) -> Self {
        self.excluded.extend(types);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn provider_factory(mut self, factory: ProviderFactory) -> Self {
        self.factory = factory;
        self
    }

    /// 取得目錄文件並準備帳戶身分。不會註冊帳戶。
    pub fn build(self) -> Result<Client> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.request_timeout)?),
        };
        let directory = Directory::fetch(transport.as_ref(), &self.directory_url)?;
        let signer = RequestSigner::new(transport, &directory.new_nonce);

        let identity = match self.identity {
            Some(identity) => identity,
            None => AccountIdentity::generate(self.email.as_deref(), self.key_type)?,
        };
        let thumbprint = identity.key_pair().thumbprint()?;

        let mut registry = ChallengeRegistry::new();
        registry.exclude_types(self.excluded);

        info!("ACME client ready for {}", self.directory_url);
        Ok(Client {
            directory,
            signer,
            identity,
            thumbprint,
            key_type: self.key_type,
            registry,
            factory: self.factory,
            order_timeout: self.order_timeout,
            backoff: self.backoff,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        })
    }
}

/// 綁定單一 CA 與帳戶的 ACME 用戶端。
pub struct Client {
    directory: Directory,
    signer: RequestSigner,
    identity: AccountIdentity,
    thumbprint: String,
    key_type: KeyType,
    registry: ChallengeRegistry,
    factory: ProviderFactory,
    order_timeout: Duration,
    backoff: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl Client {
    pub fn builder(directory_url: &str) -> ClientBuilder {
        ClientBuilder::new(directory_url)
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn identity(&self) -> &AccountIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &ChallengeRegistry {
        &self.registry
    }

    pub fn order_timeout(&self) -> Duration {
        self.order_timeout
    }

    /// 註冊帳戶；已註冊時直接回傳既有紀錄。
    pub fn register(&mut self, agree_to_terms: bool) -> Result<RegistrationRecord> {
        Ok(register(
            &self.signer,
            &self.directory,
            &mut self.identity,
            agree_to_terms,
        )?)
    }

    pub fn set_provider(&mut self, challenge_type: ChallengeType, provider: Arc<dyn ChallengeProvider>) {
        self.registry.set_provider(challenge_type, provider);
    }

    /// 依名稱建立內建（或自行註冊到工廠的）提供者並啟用，回傳它負責的挑戰類型。
    pub fn use_provider(&mut self, name: &str, options: &ProviderOptions) -> Result<ChallengeType> {
        let (challenge_type, provider) = self.factory.create(name, options)?;
        self.registry.set_provider(challenge_type, provider);
        info!("Using provider {} for {}", name, challenge_type);
        Ok(challenge_type)
    }

    pub fn exclude_challenges<I: IntoIterator<Item = ChallengeType>>(&mut self, types: I) {
        self.registry.exclude_types(types);
    }

    /// 為一組網域申請證書，整個過程不超過 `timeout`。
    pub fn obtain<S: AsRef<str>>(&self, domains: &[S], timeout: Duration) -> Result<CertificateBundle> {
        let session = self.session(timeout)?;
        Ok(OrderOrchestrator::new(session, &self.directory.new_order, self.key_type).run(domains)?)
    }

    /// 與 [`Client::obtain`] 相同，期限使用建構時設定的訂單期限。
    pub fn issue<S: AsRef<str>>(&self, domains: &[S]) -> Result<CertificateBundle> {
        self.obtain(domains, self.order_timeout)
    }

    /// 以新的證書金鑰為 `bundle` 中的網域重新申請一次。
    pub fn renew(&self, bundle: &CertificateBundle, timeout: Duration) -> Result<CertificateBundle> {
        info!("Renewing certificate for {}", bundle.domains.join(", "));
        self.obtain(bundle.domains.as_slice(), timeout)
    }

    fn session(&self, timeout: Duration) -> Result<Session<'_>> {
        let account_url = self.identity.account_url().ok_or(ClientError::NotRegistered)?;
        Ok(Session {
            signer: &self.signer,
            key_pair: self.identity.key_pair(),
            account_url,
            thumbprint: &self.thumbprint,
            registry: &self.registry,
            backoff: &self.backoff,
            clock: self.clock.as_ref(),
            deadline: deadline_after(self.clock.as_ref(), timeout),
        })
    }
}
