//! Room codes: six uppercase alphanumeric characters shared out of band.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::constants::{ROOM_CODE_ALPHABET, ROOM_CODE_LEN};

/// A validated room code.
///
/// Always exactly [`ROOM_CODE_LEN`] characters from `A-Z0-9`. User input is
/// trimmed and uppercased before validation so `" ab12cd"` parses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Generates a fresh code from the thread-local CSPRNG.
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Generates a code from `rng`.
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Normalizes and validates user-supplied input.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let normalized = input.trim().to_ascii_uppercase();
        if normalized.len() != ROOM_CODE_LEN
            || !normalized.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b))
        {
            return Err(ProtocolError::InvalidRoomCode(input.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_is_valid() {
        for _ in 0..100 {
            let code = RoomCode::generate();
            assert_eq!(code.as_str().len(), ROOM_CODE_LEN);
            assert!(RoomCode::parse(code.as_str()).is_ok());
        }
    }

    #[test]
    fn codes_follow_the_rng() {
        use rand::SeedableRng;
        use rand::rngs::StdRng;

        let mut rng = StdRng::seed_from_u64(7);
        let first = RoomCode::generate_with(&mut rng);
        let second = RoomCode::generate_with(&mut rng);
        assert_ne!(first, second);

        let replay = RoomCode::generate_with(&mut StdRng::seed_from_u64(7));
        assert_eq!(replay, first);
        assert!(RoomCode::parse(first.as_str()).is_ok());
    }

    #[test]
    fn parse_normalizes_case_and_whitespace() {
        let code = RoomCode::parse("  ab12cd \n").unwrap();
        assert_eq!(code.as_str(), "AB12CD");
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!(RoomCode::parse("ABC").is_err());
        assert!(RoomCode::parse("ABCDEFG").is_err());
        assert!(RoomCode::parse("").is_err());
    }

    #[test]
    fn parse_rejects_symbols() {
        assert!(RoomCode::parse("AB-12C").is_err());
        assert!(RoomCode::parse("AB_12C").is_err());
        assert!(RoomCode::parse("ÄB12CD").is_err());
    }

    #[test]
    fn serde_uses_plain_string() {
        let code = RoomCode::parse("XYZ789").unwrap();
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"XYZ789\"");
        let back: RoomCode = serde_json::from_str("\"xyz789\"").unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn serde_rejects_invalid_code() {
        assert!(serde_json::from_str::<RoomCode>("\"nope\"").is_err());
    }
}
