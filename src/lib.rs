#![doc = include_str!("../README.md")]

pub mod authn;
pub mod authorize;
pub mod config;
pub mod credential;
pub mod error;
mod http;
pub mod jwks;
pub mod oauth;
pub mod pkce;
pub mod session;
pub mod store;
pub mod token;
pub mod types;
pub mod user_id;

#[cfg(test)]
mod test_support;

// Re-exports for convenient access
pub use authn::{AuthnStatus, FactorVerification, IdentifiedUser};
pub use authorize::AuthorizationCode;
pub use config::AuthConfig;
pub use credential::{Credential, TokenResponse};
pub use error::Error;
pub use jwks::JwksCache;
pub use oauth::AuthClient;
pub use pkce::{PkcePair, generate_code_challenge, generate_code_verifier, generate_state};
pub use session::{IecSession, SessionState, TokenCheck};
pub use store::{StoreKey, TokenStore};
pub use token::{DecodedIdToken, IdTokenClaims, TokenValidator, TrustPolicy, decode_unverified};
pub use types::{FactorId, FactorType, SessionToken, StateToken, UserId};
pub use user_id::is_valid_israeli_id;
