use crate::LevelError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_TOKEN_LEN: usize = 64;
pub const DEFAULT_TOKEN_LEN: usize = 6;
pub const MIN_GENERATED_TOKEN_LEN: usize = 4;
pub const MAX_GENERATED_TOKEN_LEN: usize = 32;

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Opaque session token as it appears in the URL path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(token: &str) -> Result<Self, LevelError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(LevelError::invalid("session token is empty"));
        }
        if token.len() > MAX_TOKEN_LEN {
            return Err(LevelError::invalid(format!(
                "session token longer than {MAX_TOKEN_LEN} characters"
            )));
        }
        if !token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(LevelError::invalid(
                "session token may only contain letters, digits, '_' and '-'",
            ));
        }
        Ok(Self(token.to_string()))
    }

    /// Random lowercase token. Collisions are possible; callers check the
    /// store before handing one out.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Self {
        let len = len.clamp(MIN_GENERATED_TOKEN_LEN, MAX_GENERATED_TOKEN_LEN);
        let token = (0..len)
            .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
            .collect();
        Self(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = LevelError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl TryFrom<String> for SessionId {
    type Error = LevelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
