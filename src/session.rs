//! Client-facing login session.
//!
//! ```text
//!  ANONYMOUS ──login_with_id──▶ AWAITING_OTP ──verify_otp──▶ AUTHENTICATED ◀─┐
//!      ▲                            │  ▲  (wrong code: stays)      │   refresh │
//!      └──── unrecoverable error ───┘  └───────────────────────────┴───────────┘
//! ```

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::AuthConfig;
use crate::credential::Credential;
use crate::error::Error;
use crate::jwks::JwksCache;
use crate::oauth::AuthClient;
use crate::store::TokenStore;
use crate::token::{DecodedIdToken, TokenValidator, TrustPolicy};
use crate::types::{FactorId, FactorType, StateToken, UserId};

/// Observable login state of an [`IecSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    AwaitingOtp,
    Authenticated,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::AwaitingOtp => "awaiting OTP",
            Self::Authenticated => "authenticated",
        }
    }
}

/// Outcome of [`IecSession::check_token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    /// The ID token is still valid for `remaining` seconds.
    Valid { remaining: i64 },
    /// The ID token had expired and the credential was refreshed.
    Refreshed,
}

/// Pending OTP login. Never persisted.
#[derive(Debug, Clone)]
struct LoginAttempt {
    state_token: StateToken,
    factor_id: FactorId,
    factor_type: Option<FactorType>,
}

#[derive(Debug)]
enum Slot {
    Anonymous,
    AwaitingOtp(LoginAttempt),
    Authenticated(Credential),
}

impl Slot {
    fn state(&self) -> SessionState {
        match self {
            Self::Anonymous => SessionState::Anonymous,
            Self::AwaitingOtp(_) => SessionState::AwaitingOtp,
            Self::Authenticated(_) => SessionState::Authenticated,
        }
    }

    fn credential(&self) -> Result<&Credential, Error> {
        match self {
            Self::Authenticated(credential) => Ok(credential),
            other => Err(wrong_state(SessionState::Authenticated, other.state())),
        }
    }
}

fn wrong_state(expected: SessionState, actual: SessionState) -> Error {
    Error::InvalidState {
        expected: expected.name(),
        actual: actual.name(),
    }
}

/// Authentication session of one IEC customer.
///
/// Owns the current [`Credential`] and drives the OTP login, refresh and
/// persistence. All operations take an internal lock, so concurrent
/// `check_token`/`refresh_token` calls on one session are serialized and never
/// spend the same refresh token twice.
///
/// ```rust,ignore
/// let session = IecSession::new("123456782".parse()?, AuthConfig::from_env()?)?;
/// if let Some(channel) = session.login_with_id().await? {
///     println!("Code sent by {channel}");
/// }
/// session.verify_otp(&read_code()).await?;
/// session.save_token().await?;
/// ```
pub struct IecSession {
    user_id: UserId,
    client: AuthClient,
    validator: TokenValidator,
    store: TokenStore,
    trust_policy: TrustPolicy,
    slot: Mutex<Slot>,
}

impl std::fmt::Debug for IecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IecSession")
            .field("user_id", &self.user_id)
            .field("store", &self.store)
            .field("trust_policy", &self.trust_policy)
            .finish_non_exhaustive()
    }
}

impl IecSession {
    /// Create an anonymous session for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be initialized.
    pub fn new(user_id: UserId, config: AuthConfig) -> Result<Self, Error> {
        let client = AuthClient::new(config)?;
        Ok(Self::from_client(user_id, client))
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(self, http: reqwest::Client) -> Self {
        let client = self.client.with_http_client(http);
        Self::from_client(self.user_id, client)
    }

    /// Validate ID tokens against a shared signing key cache.
    ///
    /// Sessions created with [`new`](Self::new) each fetch the key set once. Pass
    /// one cache to every session of a process to fetch it once in total. Call
    /// after [`with_http_client`](Self::with_http_client), which starts a new cache.
    #[must_use]
    pub fn with_jwks_cache(mut self, jwks: Arc<JwksCache>) -> Self {
        self.validator = TokenValidator::new(jwks, self.client.config().client_id());
        self
    }

    /// Signing key cache used by this session.
    #[must_use]
    pub fn jwks_cache(&self) -> &Arc<JwksCache> {
        self.validator.jwks()
    }

    fn from_client(user_id: UserId, client: AuthClient) -> Self {
        let config = client.config();
        let jwks = Arc::new(JwksCache::new(config.keys_url(), client.http.clone()));
        let validator = TokenValidator::new(jwks, config.client_id());
        let store = TokenStore::new(config.token_path()).with_key(config.encryption_key().cloned());
        let trust_policy = config.trust_policy();

        Self {
            user_id,
            validator,
            store,
            trust_policy,
            client,
            slot: Mutex::new(Slot::Anonymous),
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub async fn state(&self) -> SessionState {
        self.slot.lock().await.state()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.state().await == SessionState::Authenticated
    }

    /// Current credential, if authenticated.
    pub async fn token(&self) -> Option<Credential> {
        match &*self.slot.lock().await {
            Slot::Authenticated(credential) => Some(credential.clone()),
            _ => None,
        }
    }

    /// Delivery channel of the pending OTP, when the provider reported one.
    pub async fn factor_type(&self) -> Option<FactorType> {
        match &*self.slot.lock().await {
            Slot::AwaitingOtp(attempt) => attempt.factor_type.clone(),
            _ => None,
        }
    }

    /// Starts a login: identifies the user and asks the provider to send an OTP.
    ///
    /// Any previous credential or pending attempt is discarded. Returns the OTP
    /// delivery channel, or `None` when the provider did not name one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Login`] or [`Error::Http`] if identification or OTP
    /// delivery fails; the session is then anonymous.
    pub async fn login_with_id(&self) -> Result<Option<FactorType>, Error> {
        let mut slot = self.slot.lock().await;
        *slot = Slot::Anonymous;

        let identified = self.client.identify(&self.user_id).await.inspect_err(|e| {
            tracing::warn!(error = %e, "Failed at first login");
        })?;

        let trigger = self
            .client
            .verify_factor(&identified.factor_id, &identified.state_token, None)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Failed to send OTP"))?
            .ok_or_else(|| Error::login("OTP_NOT_SENT", "provider did not issue an OTP challenge"))?;

        let factor_type = trigger.factor_type.or(identified.factor_type);
        *slot = Slot::AwaitingOtp(LoginAttempt {
            state_token: identified.state_token,
            factor_id: identified.factor_id,
            factor_type: factor_type.clone(),
        });

        tracing::info!(factor_type = ?factor_type, "OTP sent, awaiting verification");
        Ok(factor_type)
    }

    /// Completes the login with the OTP the user received.
    ///
    /// On a wrong or unaccepted code the session stays awaiting OTP so the caller
    /// can retry. If the provider has dropped the login attempt, the session
    /// falls back to anonymous and the login must be restarted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless awaiting an OTP, and
    /// [`Error::Login`], [`Error::Http`] or [`Error::Token`] if any step fails.
    pub async fn verify_otp(&self, otp_code: &str) -> Result<Credential, Error> {
        let mut slot = self.slot.lock().await;
        let attempt = match &*slot {
            Slot::AwaitingOtp(attempt) => attempt.clone(),
            other => return Err(wrong_state(SessionState::AwaitingOtp, other.state())),
        };

        match self.complete_login(&attempt, otp_code).await {
            Ok(credential) => {
                *slot = Slot::Authenticated(credential.clone());
                tracing::info!("OTP verified, session authenticated");
                Ok(credential)
            }
            Err(e) => {
                if e.is_session_expired() {
                    tracing::warn!(error = %e, "Login attempt expired, restart required");
                    *slot = Slot::Anonymous;
                } else {
                    tracing::warn!(error = %e, "Failed at OTP verification");
                }
                Err(e)
            }
        }
    }

    async fn complete_login(&self, attempt: &LoginAttempt, otp_code: &str) -> Result<Credential, Error> {
        let verification = self
            .client
            .verify_factor(&attempt.factor_id, &attempt.state_token, Some(otp_code))
            .await?
            .ok_or_else(|| Error::login("OTP_NOT_VERIFIED", "passcode was not accepted"))?;
        let session_token = verification
            .session_token
            .ok_or_else(|| Error::login("MISSING_SESSION_TOKEN", "factor verified without a session token"))?;

        let code = self.client.authorize_session(&session_token).await?;
        let credential = self.client.exchange_code(&code.code, &code.code_verifier).await?;
        self.admit(&credential).await?;
        Ok(credential)
    }

    /// Checks the ID token's expiration and refreshes the credential if it has expired.
    ///
    /// A rejected refresh token is not retried and does not restart the OTP
    /// login: the error is returned and the session becomes anonymous.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless authenticated, [`Error::Token`] if
    /// the ID token cannot be decoded (or is unverified under
    /// [`TrustPolicy::Strict`]), and the refresh error if the refresh fails.
    pub async fn check_token(&self) -> Result<TokenCheck, Error> {
        let mut slot = self.slot.lock().await;
        self.check_locked(&mut slot).await
    }

    async fn check_locked(&self, slot: &mut Slot) -> Result<TokenCheck, Error> {
        let decoded = self.admit(slot.credential()?).await?;
        let remaining = decoded.claims().remaining_lifetime();
        if remaining >= 0 {
            return Ok(TokenCheck::Valid { remaining });
        }

        tracing::debug!(expired_for = -remaining, "ID token expired, refreshing");
        self.refresh_locked(slot).await?;
        Ok(TokenCheck::Refreshed)
    }

    /// Replaces the credential with one obtained from its refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless authenticated, and
    /// [`Error::Login`] (session becomes anonymous) or [`Error::Http`] if the
    /// refresh fails.
    pub async fn refresh_token(&self) -> Result<Credential, Error> {
        let mut slot = self.slot.lock().await;
        self.refresh_locked(&mut slot).await
    }

    async fn refresh_locked(&self, slot: &mut Slot) -> Result<Credential, Error> {
        let result = self.client.refresh(slot.credential()?).await;
        let refreshed = match result {
            Ok(credential) => credential,
            Err(e @ Error::Login { .. }) => {
                tracing::warn!(error = %e, "Token refresh rejected, full login required");
                *slot = Slot::Anonymous;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        // The previous refresh token may already be revoked; never fall back to it.
        if let Err(e) = self.admit(&refreshed).await {
            tracing::warn!(error = %e, "Refreshed ID token rejected, full login required");
            *slot = Slot::Anonymous;
            return Err(e);
        }

        *slot = Slot::Authenticated(refreshed.clone());
        tracing::info!("Token refreshed");
        Ok(refreshed)
    }

    /// Installs a credential obtained elsewhere, refreshing it if already expired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if its ID token cannot be decoded (the session is
    /// unchanged), or any [`check_token`](Self::check_token) error.
    pub async fn load_credential(&self, credential: Credential) -> Result<TokenCheck, Error> {
        let mut slot = self.slot.lock().await;
        self.admit(&credential).await?;
        *slot = Slot::Authenticated(credential);
        self.check_locked(&mut slot).await
    }

    /// Installs a bare ID token as the session credential, without refresh ability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if `id_token` is not a decodable JWT, or is
    /// unverified under [`TrustPolicy::Strict`]. The session is then unchanged.
    pub async fn override_id_token(&self, id_token: impl Into<String>) -> Result<(), Error> {
        let credential = Credential::from_id_token(id_token);
        let mut slot = self.slot.lock().await;
        self.admit(&credential).await?;
        *slot = Slot::Authenticated(credential);
        Ok(())
    }

    /// Drops the credential or pending login.
    pub async fn logout(&self) {
        *self.slot.lock().await = Slot::Anonymous;
    }

    /// Saves the credential to the configured token path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless authenticated, or [`Error::Store`].
    pub async fn save_token(&self) -> Result<(), Error> {
        self.save_with(&self.store).await
    }

    /// Saves the credential to `path`, encrypted if a key is configured.
    ///
    /// # Errors
    ///
    /// Same as [`save_token`](Self::save_token).
    pub async fn save_token_to_file(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        self.save_with(&self.store_at(path.as_ref())).await
    }

    /// Loads the credential from the configured token path and becomes authenticated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] or [`Error::Token`] if the file cannot be loaded;
    /// the session is then unchanged.
    pub async fn load_token(&self) -> Result<Credential, Error> {
        self.load_with(&self.store).await
    }

    /// Loads the credential from `path` and becomes authenticated.
    ///
    /// # Errors
    ///
    /// Same as [`load_token`](Self::load_token).
    pub async fn load_token_from_file(&self, path: impl AsRef<Path>) -> Result<Credential, Error> {
        self.load_with(&self.store_at(path.as_ref())).await
    }

    fn store_at(&self, path: &Path) -> TokenStore {
        TokenStore::new(path).with_key(self.client.config().encryption_key().cloned())
    }

    async fn save_with(&self, store: &TokenStore) -> Result<(), Error> {
        let slot = self.slot.lock().await;
        store.save(slot.credential()?).await
    }

    async fn load_with(&self, store: &TokenStore) -> Result<Credential, Error> {
        let mut slot = self.slot.lock().await;
        let credential = store.load().await?;
        self.admit(&credential).await?;
        *slot = Slot::Authenticated(credential.clone());
        tracing::info!(path = %store.path().display(), "Loaded token");
        Ok(credential)
    }

    /// Decodes the ID token and applies the trust policy.
    async fn admit(&self, credential: &Credential) -> Result<DecodedIdToken, Error> {
        let decoded = self.validator.decode(&credential.id_token).await?;
        if self.trust_policy == TrustPolicy::Strict && !decoded.is_verified() {
            return Err(Error::Token("ID token signature could not be verified".into()));
        }
        Ok(decoded)
    }
}
