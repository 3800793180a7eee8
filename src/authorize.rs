//! Authorization code retrieval through the provider's `form_post` authorize response.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::Error;
use crate::http::ensure_success;
use crate::oauth::AuthClient;
use crate::pkce::PkcePair;
use crate::types::SessionToken;

static HIDDEN_INPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<input type="hidden" name="([A-Za-z_]+)" value="([^"]*)"\s*/?>"#)
        .expect("valid hidden input pattern")
});

/// Authorization code together with the verifier it was requested with.
#[derive(Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct AuthorizationCode {
    pub code: String,
    pub code_verifier: String,
}

impl std::fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCode").finish_non_exhaustive()
    }
}

impl AuthClient {
    /// Builds the authorize URL for one attempt.
    #[must_use]
    pub fn authorization_url(&self, session_token: &SessionToken, pkce: &PkcePair) -> Url {
        let scope = self.config.scope();

        let mut url = self.config.authorize_url();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "id_token code")
            .append_pair("response_mode", "form_post")
            .append_pair("scope", &scope)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", &pkce.state)
            .append_pair("nonce", &pkce.nonce)
            .append_pair("code_challenge_method", "S256")
            .append_pair("sessionToken", &session_token.0)
            .append_pair("code_challenge", &pkce.code_challenge);
        url
    }

    /// Redeems `session_token` for an authorization code.
    ///
    /// A fresh [`PkcePair`] is generated for every call; its verifier is returned
    /// with the code and must be passed to [`exchange_code`](AuthClient::exchange_code).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on transport failure and [`Error::Login`] when the
    /// response form carries no code (rejected session, changed page layout) or
    /// an unexpected `state`.
    pub async fn authorize_session(
        &self,
        session_token: &SessionToken,
    ) -> Result<AuthorizationCode, Error> {
        let pkce = PkcePair::generate();
        let url = self.authorization_url(session_token, &pkce);

        let response = self.http.get(url).send().await?;
        let response = ensure_success(response, "authorize").await?;
        let body = response.bytes().await?;

        let form = decode_form_body(&body)?;
        let code = extract_authorization_code(&form, &pkce.state)?;

        tracing::debug!("Received authorization code");

        Ok(AuthorizationCode {
            code,
            code_verifier: pkce.code_verifier,
        })
    }
}

/// Pulls the hidden `code` input out of the auto-submit form.
///
/// A `state` input, when present, must match `expected_state`. A form with
/// `error`/`error_description` inputs instead of a code is reported with them.
pub(crate) fn extract_authorization_code(form: &str, expected_state: &str) -> Result<String, Error> {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;

    for caps in HIDDEN_INPUT.captures_iter(form) {
        let value = caps[2].to_owned();
        match &caps[1] {
            "code" => code = Some(value),
            "state" => state = Some(value),
            "error" => error = Some(value),
            "error_description" => error_description = Some(value),
            _ => {}
        }
    }

    if let Some(state) = state {
        if state != expected_state {
            return Err(Error::login("STATE_MISMATCH", "authorize response state does not match"));
        }
    }

    match (code, error) {
        (Some(code), _) if !code.is_empty() => Ok(code),
        (_, Some(error)) => {
            let message = error_description.unwrap_or_else(|| error.clone());
            Err(Error::login(error, message))
        }
        _ => Err(Error::login(
            "MISSING_AUTHORIZATION_CODE",
            "authorize response has no code field",
        )),
    }
}

/// Decodes the authorize response body.
///
/// The provider escapes non-ASCII text in the form with backslash sequences,
/// producing UTF-8 bytes once resolved. Escapes resolve to single bytes (code
/// points above U+00FF are rejected), literal bytes pass through, unknown
/// escapes are kept as written, and the result must be valid UTF-8.
pub(crate) fn decode_form_body(raw: &[u8]) -> Result<String, Error> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        let b = raw[i];
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }

        let Some(&next) = raw.get(i + 1) else {
            return Err(invalid_body("trailing backslash"));
        };
        i += 2;

        let simple = match next {
            b'\n' => continue,
            b'\\' => Some(b'\\'),
            b'\'' => Some(b'\''),
            b'"' => Some(b'"'),
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b'f' => Some(0x0c),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'v' => Some(0x0b),
            _ => None,
        };
        if let Some(byte) = simple {
            out.push(byte);
            continue;
        }

        let code_point = match next {
            b'0'..=b'7' => {
                let start = i - 1;
                let mut end = start + 1;
                while end < raw.len() && end < start + 3 && matches!(raw[end], b'0'..=b'7') {
                    end += 1;
                }
                i = end;
                raw[start..end]
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'))
            }
            b'x' => hex_escape(raw, &mut i, 2)?,
            b'u' => hex_escape(raw, &mut i, 4)?,
            b'U' => hex_escape(raw, &mut i, 8)?,
            b'N' => return Err(invalid_body("named escapes are not supported")),
            other => {
                out.push(b'\\');
                out.push(other);
                continue;
            }
        };

        let byte = u8::try_from(code_point)
            .map_err(|_| invalid_body(&format!("escape U+{code_point:04X} is not a single byte")))?;
        out.push(byte);
    }

    String::from_utf8(out).map_err(|e| invalid_body(&e.to_string()))
}

fn hex_escape(raw: &[u8], i: &mut usize, len: usize) -> Result<u32, Error> {
    let digits = raw
        .get(*i..*i + len)
        .ok_or_else(|| invalid_body("truncated hex escape"))?;
    if !digits.iter().all(u8::is_ascii_hexdigit) {
        return Err(invalid_body("truncated hex escape"));
    }
    let digits = std::str::from_utf8(digits).map_err(|_| invalid_body("invalid hex escape"))?;
    let value = u32::from_str_radix(digits, 16).map_err(|_| invalid_body("invalid hex escape"))?;
    *i += len;
    Ok(value)
}

fn invalid_body(detail: &str) -> Error {
    Error::login("INVALID_AUTHORIZE_RESPONSE", detail)
}
