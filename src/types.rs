use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::user_id::is_valid_israeli_id;

/// Validated Israeli national ID, the login identity of an IEC customer.
///
/// Guaranteed valid by construction: holding a `UserId` proves the check digit is correct.
/// Use `"123456782".parse::<UserId>()` or `UserId::try_from(string)` to create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for UserId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if is_valid_israeli_id(&s) {
            Ok(Self(s.trim().to_owned()))
        } else {
            Err(Error::InvalidUserId(s))
        }
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Okta `stateToken` scoping one identify/verify exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct StateToken(pub String);

/// Identifier of the OTP factor selected for this login.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct FactorId(pub String);

/// Okta `sessionToken`, proof that the OTP step succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct SessionToken(pub String);

/// Delivery channel of an OTP factor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
#[non_exhaustive]
pub enum FactorType {
    Sms,
    Email,
    Call,
    Totp,
    Other(String),
}

impl FactorType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Call => "call",
            Self::Totp => "token:software:totp",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for FactorType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "sms" => Self::Sms,
            "email" => Self::Email,
            "call" => Self::Call,
            "token:software:totp" => Self::Totp,
            _ => Self::Other(s),
        }
    }
}

impl From<FactorType> for String {
    fn from(f: FactorType) -> Self {
        f.as_str().to_owned()
    }
}

impl std::fmt::Display for FactorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
