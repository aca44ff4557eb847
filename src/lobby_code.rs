//! Short human-shareable lobby codes.

use std::fmt;

use rand::Rng;

use crate::error::PassPongError;

pub const LOBBY_CODE_LEN: usize = 6;
pub const LOBBY_CODE_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A validated lobby code such as `"K3ZQ8A"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LobbyCode(String);

impl LobbyCode {
    /// Generate a random code.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let alphabet = LOBBY_CODE_ALPHABET.as_bytes();
        let mut code = String::with_capacity(LOBBY_CODE_LEN);
        for _ in 0..LOBBY_CODE_LEN {
            let idx = rng.random_range(0..alphabet.len());
            if let Some(ch) = alphabet.get(idx) {
                code.push(char::from(*ch));
            }
        }
        Self(code)
    }

    /// Parse user input. Surrounding whitespace is trimmed and letters are
    /// upper-cased before validation.
    ///
    /// # Errors
    ///
    /// Returns [`PassPongError::InvalidLobbyCode`] if the normalized input is
    /// not exactly six characters from `A-Z0-9`.
    pub fn parse(input: &str) -> Result<Self, PassPongError> {
        let normalized = input.trim().to_ascii_uppercase();
        if normalized.len() != LOBBY_CODE_LEN
            || !normalized.chars().all(|ch| LOBBY_CODE_ALPHABET.contains(ch))
        {
            return Err(PassPongError::InvalidLobbyCode(input.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LobbyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for LobbyCode {
    type Err = PassPongError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl AsRef<str> for LobbyCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..64 {
            let code = LobbyCode::generate();
            assert_eq!(code.as_str().len(), LOBBY_CODE_LEN);
            assert_eq!(LobbyCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn parse_normalizes_input() {
        let code = LobbyCode::parse("  ab12cd \n").unwrap();
        assert_eq!(code.as_str(), "AB12CD");
    }

    #[test]
    fn parse_rejects_bad_input() {
        for bad in ["", "ABC", "ABCDEFG", "AB-2CD", "ÄB12CD"] {
            assert!(
                matches!(LobbyCode::parse(bad), Err(PassPongError::InvalidLobbyCode(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
