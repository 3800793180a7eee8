//! ID token fixtures shared by the unit tests.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value as JsonValue, json};

pub(crate) const CLIENT_ID: &str = "0oaqf6zr7yEcQZqqt2p7";
pub(crate) const KID: &str = "test-key-1";
const SECRET: &[u8] = b"iec-auth-test-signing-secret-0001";
// URL-safe base64 of SECRET, as published in the key set.
const SECRET_B64: &str = "aWVjLWF1dGgtdGVzdC1zaWduaW5nLXNlY3JldC0wMDAx";

fn claims(exp: i64) -> JsonValue {
    json!({
        "sub": "00u-test-user",
        "iss": "https://iec-ext.okta.com/oauth2/default",
        "aud": CLIENT_ID,
        "iat": exp - 3600,
        "exp": exp,
        "email": "123456782@iec.co.il"
    })
}

fn sign(exp: i64, secret: &[u8]) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(KID.into());
    encode(&header, &claims(exp), &EncodingKey::from_secret(secret)).unwrap()
}

/// HS256 token signed with the key published by [`key_set_json`].
pub(crate) fn signed_id_token(exp: i64) -> String {
    sign(exp, SECRET)
}

/// Token naming the published key but signed with another secret.
pub(crate) fn forged_id_token(exp: i64) -> String {
    sign(exp, b"some-other-secret")
}

/// Well-formed header and claims with a signature segment that is not base64.
pub(crate) fn unsigned_id_token(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(format!(r#"{{"alg":"RS256","kid":"{KID}"}}"#));
    let payload = URL_SAFE_NO_PAD.encode(claims(exp).to_string());
    format!("{header}.{payload}.not*a*signature")
}

pub(crate) fn key_set_json() -> JsonValue {
    json!({
        "keys": [{
            "kty": "oct",
            "kid": KID,
            "alg": "HS256",
            "use": "sig",
            "k": SECRET_B64
        }]
    })
}
