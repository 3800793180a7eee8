use std::sync::Arc;

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::Error;
use crate::jwks::JwksCache;

/// What to do with an ID token whose signature could not be verified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Accept the unverified claims so expiration tracking keeps working offline.
    #[default]
    Lenient,
    /// Refuse unverified tokens.
    Strict,
}

/// Claims of an IEC ID token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct IdTokenClaims {
    /// Expiration, seconds since the Unix epoch.
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<JsonValue>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl IdTokenClaims {
    /// Seconds until `exp`; negative once the token has expired.
    #[must_use]
    pub fn remaining_lifetime(&self) -> i64 {
        self.remaining_lifetime_at(now_unix())
    }

    #[must_use]
    pub fn remaining_lifetime_at(&self, now: i64) -> i64 {
        self.exp - now
    }

    #[must_use]
    pub fn get_claim(&self, key: &str) -> Option<&JsonValue> {
        self.extra.get(key)
    }
}

/// Decoded ID token, tagged with whether its signature was checked.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedIdToken {
    /// Signature and audience verified against the published key set.
    Verified(IdTokenClaims),
    /// Claims read without signature verification.
    Unverified(IdTokenClaims),
}

impl DecodedIdToken {
    #[must_use]
    pub fn claims(&self) -> &IdTokenClaims {
        match self {
            Self::Verified(claims) | Self::Unverified(claims) => claims,
        }
    }

    #[must_use]
    pub fn into_claims(self) -> IdTokenClaims {
        match self {
            Self::Verified(claims) | Self::Unverified(claims) => claims,
        }
    }

    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }
}

/// Current Unix time in seconds.
#[must_use]
pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Verifies ID tokens against the provider's key set.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    jwks: Arc<JwksCache>,
    audience: String,
}

impl TokenValidator {
    /// `audience` is the OAuth client id the tokens are issued to.
    #[must_use]
    pub fn new(jwks: Arc<JwksCache>, audience: impl Into<String>) -> Self {
        Self {
            jwks,
            audience: audience.into(),
        }
    }

    #[must_use]
    pub fn jwks(&self) -> &Arc<JwksCache> {
        &self.jwks
    }

    /// Verifies signature and audience. Expiration is not enforced here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if the token is malformed, names an unknown key,
    /// or fails verification, and a transport or login error if the key set
    /// cannot be fetched.
    pub async fn verify(&self, token: &str) -> Result<IdTokenClaims, Error> {
        let header = decode_header(token).map_err(|e| Error::Token(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| Error::Token("missing header claim: kid".into()))?;
        let jwk = self.jwks.key(&kid).await?;
        ensure_algorithm_matches(&jwk, header.alg)?;

        let key = DecodingKey::from_jwk(&jwk).map_err(|e| Error::Token(e.to_string()))?;
        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud"]);
        validation.validate_exp = false;
        validation.leeway = 0;

        decode::<IdTokenClaims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| Error::Token(e.to_string()))
    }

    /// Verifies the token, falling back to an unverified decode when verification fails.
    ///
    /// Never fails because the key set is unreachable or the signature is bad; it
    /// fails only if the claims themselves cannot be read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if the token is not a decodable JWT with an `exp` claim.
    pub async fn decode(&self, token: &str) -> Result<DecodedIdToken, Error> {
        match self.verify(token).await {
            Ok(claims) => Ok(DecodedIdToken::Verified(claims)),
            Err(e) => {
                tracing::warn!(error = %e, "ID token verification failed, decoding without signature check");
                decode_unverified(token).map(DecodedIdToken::Unverified)
            }
        }
    }

    /// Seconds until the ID token expires; negative once expired.
    ///
    /// # Errors
    ///
    /// Same as [`decode`](Self::decode).
    pub async fn remaining_lifetime(&self, token: &str) -> Result<i64, Error> {
        Ok(self.decode(token).await?.claims().remaining_lifetime())
    }
}

/// Reads ID token claims without checking the signature, audience or expiration.
///
/// # Errors
///
/// Returns [`Error::Token`] if the header or claims segment is malformed or `exp` is missing.
pub fn decode_unverified(token: &str) -> Result<IdTokenClaims, Error> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.set_required_spec_claims(&["exp"]);
    validation.validate_exp = false;
    validation.validate_aud = false;

    decode::<IdTokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| Error::Token(e.to_string()))
}

// The header's `alg` is attacker-controlled; it must belong to the key's family.
fn ensure_algorithm_matches(jwk: &Jwk, alg: Algorithm) -> Result<(), Error> {
    use Algorithm::*;

    let allowed = match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => matches!(alg, RS256 | RS384 | RS512 | PS256 | PS384 | PS512),
        AlgorithmParameters::EllipticCurve(_) => matches!(alg, ES256 | ES384),
        AlgorithmParameters::OctetKey(_) => matches!(alg, HS256 | HS384 | HS512),
        AlgorithmParameters::OctetKeyPair(_) => matches!(alg, EdDSA),
        #[allow(unreachable_patterns)]
        _ => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(Error::Token(format!("algorithm {alg:?} does not match signing key type")))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::test_support::{
        CLIENT_ID, forged_id_token, key_set_json, signed_id_token, unsigned_id_token,
    };

    async fn validator_for(server: &MockServer) -> TokenValidator {
        let url = format!("{}/oauth2/default/v1/keys", server.uri()).parse().unwrap();
        TokenValidator::new(Arc::new(JwksCache::new(url, reqwest::Client::new())), CLIENT_ID)
    }

    async fn serve_keys(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/oauth2/default/v1/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_set_json()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn valid_signature_is_verified() {
        let server = MockServer::start().await;
        serve_keys(&server).await;

        let token = signed_id_token(now_unix() + 3600);
        let decoded = validator_for(&server).await.decode(&token).await.unwrap();

        assert!(decoded.is_verified());
        assert_eq!(decoded.claims().sub.as_deref(), Some("00u-test-user"));
    }

    #[tokio::test]
    async fn provider_claims_are_kept() {
        let server = MockServer::start().await;
        serve_keys(&server).await;

        let decoded = validator_for(&server)
            .await
            .decode(&signed_id_token(now_unix() + 60))
            .await
            .unwrap();
        let claims = decoded.into_claims();

        assert_eq!(
            claims.get_claim("email").and_then(JsonValue::as_str),
            Some("123456782@iec.co.il")
        );
        assert_eq!(claims.get_claim("missing"), None);
    }

    #[tokio::test]
    async fn expired_token_still_verifies() {
        let server = MockServer::start().await;
        serve_keys(&server).await;

        let token = signed_id_token(now_unix() - 1);
        let decoded = validator_for(&server).await.decode(&token).await.unwrap();

        assert!(decoded.is_verified());
        assert!(decoded.claims().remaining_lifetime() < 0);
    }

    #[tokio::test]
    async fn bad_signature_falls_back_to_unverified() {
        let server = MockServer::start().await;
        serve_keys(&server).await;

        let exp = now_unix() + 3600;
        let decoded = validator_for(&server)
            .await
            .decode(&forged_id_token(exp))
            .await
            .unwrap();

        assert!(!decoded.is_verified());
        assert_eq!(decoded.claims().exp, exp);
    }

    #[tokio::test]
    async fn unreachable_key_set_falls_back_to_unverified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let validator = validator_for(&server).await;
        let token = signed_id_token(now_unix() - 10);

        assert!(validator.verify(&token).await.is_err());
        let remaining = validator.remaining_lifetime(&token).await.unwrap();
        assert!(remaining < 0);
    }

    #[tokio::test]
    async fn garbage_token_is_an_error() {
        let server = MockServer::start().await;
        serve_keys(&server).await;

        let err = validator_for(&server).await.decode("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, Error::Token(_)));
    }

    #[test]
    fn unverified_decode_ignores_signature() {
        let claims = decode_unverified(&unsigned_id_token(1_700_000_000)).unwrap();
        assert_eq!(claims.exp, 1_700_000_000);
        assert_eq!(claims.remaining_lifetime_at(1_700_000_001), -1);
        assert_eq!(claims.remaining_lifetime_at(1_699_996_400), 3600);
    }

    #[test]
    fn unverified_decode_requires_exp() {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","kid":"k"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"x"}"#);
        assert!(decode_unverified(&format!("{header}.{payload}.sig")).is_err());
    }

    #[test]
    fn algorithm_must_match_key_family() {
        let jwk: Jwk = serde_json::from_value(key_set_json()["keys"][0].clone()).unwrap();
        assert!(ensure_algorithm_matches(&jwk, Algorithm::HS256).is_ok());
        assert!(ensure_algorithm_matches(&jwk, Algorithm::RS256).is_err());
    }
}
