//! Okta primary authentication: identify the user, then drive the OTP factor.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::http::{ensure_success, read_json};
use crate::oauth::AuthClient;
use crate::types::{FactorId, FactorType, SessionToken, StateToken, UserId};

/// `status` of an Okta authentication transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum AuthnStatus {
    Success,
    MfaChallenge,
    MfaRequired,
    MfaEnroll,
    LockedOut,
    PasswordExpired,
    #[serde(other)]
    Other,
}

impl AuthnStatus {
    /// Statuses that let the login continue: the factor accepted the request.
    #[must_use]
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Success | Self::MfaChallenge)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthnResponse {
    #[serde(default)]
    state_token: Option<String>,
    #[serde(default)]
    status: Option<AuthnStatus>,
    #[serde(default)]
    session_token: Option<String>,
    #[serde(rename = "_embedded", default)]
    embedded: Option<AuthnEmbedded>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthnEmbedded {
    #[serde(default)]
    factors: Vec<FactorDescriptor>,
    #[serde(default)]
    factor: Option<FactorDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FactorDescriptor {
    id: String,
    #[serde(default)]
    factor_type: Option<FactorType>,
}

#[derive(Serialize)]
struct IdentifyRequest<'a> {
    username: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest<'a> {
    state_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pass_code: Option<&'a str>,
}

/// Result of the identify step: the transaction's state token and the OTP factor to use.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct IdentifiedUser {
    pub state_token: StateToken,
    pub factor_id: FactorId,
    pub factor_type: Option<FactorType>,
}

/// Accepted factor verification.
///
/// Trigger calls usually answer `MFA_CHALLENGE` with no session token; a correct
/// passcode answers `SUCCESS` with one.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct FactorVerification {
    pub status: AuthnStatus,
    pub session_token: Option<SessionToken>,
    pub factor_type: Option<FactorType>,
}

impl AuthClient {
    /// Starts primary authentication for `user_id` and picks the first enrolled factor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on transport failure and [`Error::Login`] when the
    /// provider rejects the user or the response lacks a state token or factor.
    pub async fn identify(&self, user_id: &UserId) -> Result<IdentifiedUser, Error> {
        let username = format!("{user_id}@{}", self.config.username_domain);

        let response = self
            .http
            .post(self.config.authn_url())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&IdentifyRequest {
                username: &username,
            })
            .send()
            .await?;

        let response = ensure_success(response, "identify").await?;
        let body: AuthnResponse = read_json(response, "identify").await?;

        let state_token = body
            .state_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::login("MISSING_STATE_TOKEN", "identify returned no state token"))?;
        let factor = body
            .embedded
            .unwrap_or_default()
            .factors
            .into_iter()
            .next()
            .ok_or_else(|| Error::login("NO_FACTOR", "no OTP factor is enrolled for this user"))?;

        tracing::debug!(factor_id = %factor.id, "Identified user");

        Ok(IdentifiedUser {
            state_token: StateToken(state_token),
            factor_id: FactorId(factor.id),
            factor_type: factor.factor_type,
        })
    }

    /// Submits the factor verification request.
    ///
    /// With `pass_code: None` this asks the provider to deliver a passcode; with a
    /// code it verifies it. Returns `Ok(None)` when the provider answers with any
    /// status other than `SUCCESS` or `MFA_CHALLENGE`: the factor is not verified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on transport failure and [`Error::Login`] when the
    /// provider rejects the request (wrong passcode, expired state token).
    pub async fn verify_factor(
        &self,
        factor_id: &FactorId,
        state_token: &StateToken,
        pass_code: Option<&str>,
    ) -> Result<Option<FactorVerification>, Error> {
        let response = self
            .http
            .post(self.config.factor_verify_url(factor_id))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&VerifyRequest {
                state_token: &state_token.0,
                pass_code: pass_code.filter(|c| !c.is_empty()),
            })
            .send()
            .await?;

        let response = ensure_success(response, "factor verify").await?;
        let body: AuthnResponse = read_json(response, "factor verify").await?;

        match body.status {
            Some(status) if status.is_accepted() => Ok(Some(FactorVerification {
                status,
                session_token: body.session_token.filter(|t| !t.is_empty()).map(SessionToken),
                factor_type: body.embedded.and_then(|e| e.factor).and_then(|f| f.factor_type),
            })),
            status => {
                tracing::debug!(?status, "Factor verification not accepted");
                Ok(None)
            }
        }
    }
}
