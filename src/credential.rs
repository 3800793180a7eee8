use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Token bundle issued by the IEC identity provider.
///
/// This is also the on-disk JSON shape of a token file. A `Credential` is never
/// edited after it is issued; a refresh produces a new one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub scope: String,
    pub id_token: String,
}

// Manual Debug: tokens are bearer secrets.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Token endpoint response as sent on the wire.
///
/// Refresh responses may omit fields the provider does not rotate.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl Credential {
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        id_token: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: default_token_type(),
            expires_in: 0,
            scope: String::new(),
            id_token: id_token.into(),
        }
    }

    /// A credential carrying only an ID token, for callers that obtained one out of band.
    #[must_use]
    pub fn from_id_token(id_token: impl Into<String>) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: String::new(),
            token_type: String::new(),
            expires_in: 0,
            scope: String::new(),
            id_token: id_token.into(),
        }
    }

    #[must_use]
    pub fn with_expires_in(mut self, expires_in: u64) -> Self {
        self.expires_in = expires_in;
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Adapts a token endpoint response into a credential.
    ///
    /// Fields missing from `response` are taken from `previous` (the credential
    /// being refreshed). Without a previous credential, a missing ID token or
    /// refresh token is an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Login`] if the response cannot form a complete credential.
    pub fn from_response(
        response: TokenResponse,
        previous: Option<&Credential>,
    ) -> Result<Self, Error> {
        let refresh_token = response
            .refresh_token
            .or_else(|| previous.map(|p| p.refresh_token.clone()))
            .ok_or_else(|| Error::login("MISSING_REFRESH_TOKEN", "token response has no refresh_token"))?;
        let id_token = response
            .id_token
            .or_else(|| previous.map(|p| p.id_token.clone()))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::login("MISSING_ID_TOKEN", "token response has no id_token"))?;
        let scope = response
            .scope
            .or_else(|| previous.map(|p| p.scope.clone()))
            .unwrap_or_default();

        Ok(Self {
            access_token: response.access_token,
            refresh_token,
            token_type: response.token_type,
            expires_in: response.expires_in.unwrap_or(0),
            scope,
            id_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn response(value: serde_json::Value) -> TokenResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn full_response_becomes_credential() {
        let credential = Credential::from_response(
            response(json!({
                "access_token": "at",
                "refresh_token": "rt",
                "token_type": "Bearer",
                "expires_in": 3600,
                "scope": "openid offline_access",
                "id_token": "a.b.c"
            })),
            None,
        )
        .unwrap();

        assert_eq!(credential.access_token, "at");
        assert_eq!(credential.refresh_token, "rt");
        assert_eq!(credential.expires_in, 3600);
        assert_eq!(credential.scope, "openid offline_access");
        assert_eq!(credential.id_token, "a.b.c");
    }

    #[test]
    fn refresh_response_carries_over_missing_fields() {
        let previous = Credential::new("old-at", "old-rt", "old.id.token").with_scope("openid");
        let credential = Credential::from_response(
            response(json!({"access_token": "new-at", "expires_in": 3600})),
            Some(&previous),
        )
        .unwrap();

        assert_eq!(credential.access_token, "new-at");
        assert_eq!(credential.refresh_token, "old-rt");
        assert_eq!(credential.id_token, "old.id.token");
        assert_eq!(credential.scope, "openid");
        assert_eq!(previous.access_token, "old-at");
    }

    #[test]
    fn code_exchange_without_id_token_fails() {
        let err = Credential::from_response(
            response(json!({"access_token": "at", "refresh_token": "rt"})),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Login { ref code, .. } if code == "MISSING_ID_TOKEN"));
    }

    #[test]
    fn debug_hides_tokens() {
        let credential = Credential::new("secret-access", "secret-refresh", "secret.id.token");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn file_shape_roundtrip() {
        let credential = Credential::new("at", "rt", "a.b.c").with_expires_in(3600);
        let json = serde_json::to_value(&credential).unwrap();
        assert_eq!(
            json,
            json!({
                "access_token": "at",
                "refresh_token": "rt",
                "token_type": "Bearer",
                "expires_in": 3600,
                "scope": "",
                "id_token": "a.b.c"
            })
        );
    }
}
