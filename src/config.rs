use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::store::StoreKey;
use crate::token::TrustPolicy;
use crate::types::FactorId;

const DEFAULT_BASE_URL: &str = "https://iec-ext.okta.com";
const DEFAULT_CLIENT_ID: &str = "0oaqf6zr7yEcQZqqt2p7";
const DEFAULT_REDIRECT_URI: &str = "com.iecrn:/";
const DEFAULT_USERNAME_DOMAIN: &str = "iec.co.il";
const DEFAULT_TOKEN_PATH: &str = "token.json";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// IEC identity provider configuration.
///
/// Defaults match the production Okta tenant used by the IEC mobile app, so
/// `AuthConfig::new()` is enough for real use. Tests and staging override the
/// base URL.
///
/// ```rust,ignore
/// use iec_auth::AuthConfig;
///
/// let config = AuthConfig::new()
///     .with_base_url("http://127.0.0.1:8080".parse()?)
///     .with_token_path("/var/lib/iec/token.json");
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct AuthConfig {
    pub(crate) base_url: Url,
    pub(crate) client_id: String,
    pub(crate) redirect_uri: String,
    pub(crate) scopes: Vec<String>,
    pub(crate) username_domain: String,
    pub(crate) timeout: Duration,
    pub(crate) token_path: PathBuf,
    pub(crate) encryption_key: Option<StoreKey>,
    pub(crate) trust_policy: TrustPolicy,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.parse().expect("valid default URL"),
            client_id: DEFAULT_CLIENT_ID.into(),
            redirect_uri: DEFAULT_REDIRECT_URI.into(),
            scopes: ["openid", "email", "profile", "offline_access"]
                .into_iter()
                .map(String::from)
                .collect(),
            username_domain: DEFAULT_USERNAME_DOMAIN.into(),
            timeout: DEFAULT_TIMEOUT,
            token_path: PathBuf::from(DEFAULT_TOKEN_PATH),
            encryption_key: None,
            trust_policy: TrustPolicy::default(),
        }
    }

    /// Create config from environment variables, falling back to defaults.
    ///
    /// # Optional env vars
    /// - `IEC_OKTA_BASE_URL`: Okta tenant base URL
    /// - `IEC_CLIENT_ID`: OAuth2 client ID
    /// - `IEC_REDIRECT_URI`: OAuth2 redirect URI registered for the client
    /// - `IEC_SCOPES`: Comma-separated OAuth2 scopes
    /// - `IEC_HTTP_TIMEOUT_SECS`: Per-request timeout in seconds
    /// - `IEC_TOKEN_PATH`: Token file location
    /// - `IEC_TOKEN_ENCRYPTION_KEY`: Base64 32-byte key; enables encrypted token files
    /// - `IEC_STRICT_ID_TOKEN`: Set to `"1"` or `"true"` to refuse unverified ID tokens
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::new();

        if let Ok(url_str) = std::env::var("IEC_OKTA_BASE_URL") {
            let url: Url = url_str
                .parse()
                .map_err(|e| Error::Config(format!("IEC_OKTA_BASE_URL: {e}")))?;
            config = config.with_base_url(url);
        }
        if let Ok(client_id) = std::env::var("IEC_CLIENT_ID") {
            config = config.with_client_id(client_id);
        }
        if let Ok(redirect_uri) = std::env::var("IEC_REDIRECT_URI") {
            config = config.with_redirect_uri(redirect_uri);
        }
        if let Ok(scopes) = std::env::var("IEC_SCOPES") {
            config = config.with_scopes(
                scopes
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        if let Ok(secs) = std::env::var("IEC_HTTP_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("IEC_HTTP_TIMEOUT_SECS: {e}")))?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Ok(path) = std::env::var("IEC_TOKEN_PATH") {
            config = config.with_token_path(path);
        }
        if let Some(key) = StoreKey::from_env()? {
            config = config.with_encryption_key(key);
        }
        if matches!(
            std::env::var("IEC_STRICT_ID_TOKEN").as_deref(),
            Ok("1") | Ok("true"),
        ) {
            config = config.with_trust_policy(TrustPolicy::Strict);
        }

        Ok(config)
    }

    /// Override the Okta tenant base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: Url) -> Self {
        self.base_url = url;
        self
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    /// Override the OAuth2 scopes (default: `openid email profile offline_access`).
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Domain appended to the user id to form the Okta username.
    #[must_use]
    pub fn with_username_domain(mut self, domain: impl Into<String>) -> Self {
        self.username_domain = domain.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = path.into();
        self
    }

    /// Encrypt token files with this key.
    #[must_use]
    pub fn with_encryption_key(mut self, key: StoreKey) -> Self {
        self.encryption_key = Some(key);
        self
    }

    #[must_use]
    pub fn with_trust_policy(mut self, policy: TrustPolicy) -> Self {
        self.trust_policy = policy;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Space-separated scope string as sent to the provider.
    #[must_use]
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    #[must_use]
    pub fn username_domain(&self) -> &str {
        &self.username_domain
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    #[must_use]
    pub fn encryption_key(&self) -> Option<&StoreKey> {
        self.encryption_key.as_ref()
    }

    #[must_use]
    pub fn trust_policy(&self) -> TrustPolicy {
        self.trust_policy
    }

    /// Identify (primary authentication) endpoint.
    #[must_use]
    pub fn authn_url(&self) -> Url {
        self.endpoint("/api/v1/authn")
    }

    /// Verification endpoint of one factor.
    #[must_use]
    pub fn factor_verify_url(&self, factor_id: &FactorId) -> Url {
        self.endpoint(&format!("/api/v1/authn/factors/{factor_id}/verify"))
    }

    #[must_use]
    pub fn authorize_url(&self) -> Url {
        self.endpoint("/oauth2/default/v1/authorize")
    }

    #[must_use]
    pub fn token_url(&self) -> Url {
        self.endpoint("/oauth2/default/v1/token")
    }

    /// JWKS endpoint publishing the ID token signing keys.
    #[must_use]
    pub fn keys_url(&self) -> Url {
        self.endpoint("/oauth2/default/v1/keys")
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_owned();
        url.set_path(&format!("{base_path}{path}"));
        url.set_query(None);
        url
    }
}
