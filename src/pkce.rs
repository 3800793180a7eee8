use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// One authorization attempt's PKCE material plus its anti-replay nonces.
///
/// Built fresh by [`PkcePair::generate`] for every authorize call and never
/// shared between attempts. Only `code_challenge`, `state` and `nonce` leave the
/// client; `code_verifier` goes to the token endpoint with the authorization code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct PkcePair {
    pub code_verifier: String,
    pub code_challenge: String,
    pub state: String,
    pub nonce: String,
}

impl PkcePair {
    /// Generates a new verifier, its S256 challenge, and random `state`/`nonce` values.
    #[must_use]
    pub fn generate() -> Self {
        let code_verifier = generate_code_verifier();
        let code_challenge = generate_code_challenge(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
            state: generate_state(),
            nonce: generate_state(),
        }
    }
}

/// Generates a cryptographically random code verifier for PKCE.
///
/// Returns a 64-character URL-safe string (RFC 7636 compliant, 43-128 chars).
#[must_use]
pub fn generate_code_verifier() -> String {
    let random_bytes: [u8; 48] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Computes the S256 code challenge from a code verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generates a random 22-character URL-safe value for `state` or `nonce`.
#[must_use]
pub fn generate_state() -> String {
    let random_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_verifier_length() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 64);
    }

    #[test]
    fn test_code_verifier_url_safe() {
        let verifier = generate_code_verifier();
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier should be URL-safe: {}",
            verifier
        );
    }

    #[test]
    fn test_code_challenge_rfc7636_vector() {
        // RFC 7636 appendix B
        let challenge = generate_code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_pair_challenge_matches_verifier() {
        let pair = PkcePair::generate();
        assert_eq!(pair.code_challenge, generate_code_challenge(&pair.code_verifier));
        assert_eq!(pair.state.len(), 22);
        assert_eq!(pair.nonce.len(), 22);
    }

    #[test]
    fn test_pairs_are_fresh_per_attempt() {
        let first = PkcePair::generate();
        let second = PkcePair::generate();
        assert_ne!(first.code_verifier, second.code_verifier);
        assert_ne!(first.code_challenge, second.code_challenge);
        assert_ne!(first.state, second.state);
        assert_ne!(first.state, first.nonce);
    }
}
