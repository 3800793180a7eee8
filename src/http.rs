use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::Error;

/// Okta management-API error body (`/api/v1/authn*`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OktaErrorBody {
    error_code: String,
    error_summary: String,
    #[serde(default)]
    error_causes: Vec<OktaErrorCause>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OktaErrorCause {
    error_summary: String,
}

/// OAuth2 error body (`/oauth2/*/v1/token`, `/authorize`).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Builds the HTTP client used for every provider call, with a bounded timeout.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(Error::from)
}

/// Checks HTTP response status; returns the response on success or a login error with details.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<reqwest::Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let err = parse_error_body(status, &body);
    tracing::warn!(operation, status = status.as_u16(), error = %err, "Provider call failed");
    Err(err)
}

/// Reads a successful response body as JSON.
///
/// A body that does not parse is a login failure: the provider answered, but not
/// with the expected document.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<T, Error> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(operation, error = %e, "Malformed provider response");
        Error::login("MALFORMED_RESPONSE", format!("{operation}: {e}"))
    })
}

fn parse_error_body(status: reqwest::StatusCode, body: &str) -> Error {
    if let Ok(okta) = serde_json::from_str::<OktaErrorBody>(body) {
        let mut message = okta.error_summary;
        for cause in okta.error_causes {
            message.push_str(": ");
            message.push_str(&cause.error_summary);
        }
        return Error::login(okta.error_code, message);
    }
    if let Ok(oauth) = serde_json::from_str::<OAuthErrorBody>(body) {
        let message = oauth.error_description.unwrap_or_else(|| oauth.error.clone());
        return Error::login(oauth.error, message);
    }
    let reason = status.canonical_reason().unwrap_or("unknown status");
    let message = if body.trim().is_empty() {
        reason.to_owned()
    } else {
        format!("{reason}: {}", body.trim())
    };
    Error::login(format!("HTTP {}", status.as_u16()), message)
}
