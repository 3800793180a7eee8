use crate::config::AuthConfig;
use crate::credential::{Credential, TokenResponse};
use crate::error::Error;
use crate::http::{build_client, ensure_success, read_json};

/// HTTP client for the IEC identity provider.
///
/// Each method is one network step of the login or refresh flow. Steps do not
/// retry; on failure the caller decides whether to restart the flow.
#[derive(Debug, Clone)]
pub struct AuthClient {
    pub(crate) config: AuthConfig,
    pub(crate) http: reqwest::Client,
}

impl AuthClient {
    /// Create a client whose requests time out after `config.timeout()`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be initialized.
    pub fn new(config: AuthConfig) -> Result<Self, Error> {
        let http = build_client(config.timeout)?;
        Ok(Self { config, http })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Exchange an authorization code for tokens using PKCE.
    ///
    /// `code_verifier` must be the verifier generated with the code's authorize request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::Login`] if the token endpoint returns an error or an incomplete bundle.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<Credential, Error> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", code_verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code", code),
        ];

        let response = self.request_token(&params, "token exchange").await?;
        Credential::from_response(response, None)
    }

    /// Exchange the refresh token of `credential` for a new credential.
    ///
    /// `credential` is left untouched; fields the provider does not rotate are
    /// carried over into the returned value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::Login`] if the refresh token was rejected (expired or revoked).
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential, Error> {
        if credential.refresh_token.is_empty() {
            return Err(Error::login(
                "MISSING_REFRESH_TOKEN",
                "credential has no refresh token",
            ));
        }
        let scope = self.config.scope();
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("refresh_token", credential.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
            ("scope", scope.as_str()),
        ];

        let response = self.request_token(&params, "token refresh").await?;
        Credential::from_response(response, Some(credential))
    }

    async fn request_token(
        &self,
        params: &[(&str, &str)],
        operation: &'static str,
    ) -> Result<TokenResponse, Error> {
        let response = self
            .http
            .post(self.config.token_url())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await?;

        let response = ensure_success(response, operation).await?;
        read_json(response, operation).await
    }
}
