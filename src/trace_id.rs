//! Trace identifiers
//!
//! A trace id is assigned once, when a thread's call stack goes from empty to
//! non-empty, and inherited by every call beneath that root. Ids are random
//! 128-bit values rendered as 32 lower-case hex characters (the same shape as
//! a W3C trace-id), e.g. `4bf92f3577b34da6a3ce929d0e0e4736`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub u128);

impl TraceId {
    /// Generate a fresh, effectively unique id (never all zeros)
    pub fn generate() -> Self {
        loop {
            let value: u128 = rand::random();
            if value != 0 {
                return Self(value);
            }
        }
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.to_bytes()))
    }
}

/// Trace id parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceIdError {
    #[error("trace id must be 32 hex characters, got {0}")]
    InvalidLength(usize),
    #[error("trace id is not valid hex")]
    InvalidHex,
    #[error("trace id is all zeros")]
    AllZero,
}

impl FromStr for TraceId {
    type Err = TraceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(TraceIdError::InvalidLength(s.len()));
        }
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| TraceIdError::InvalidHex)?;
        match u128::from_be_bytes(bytes) {
            0 => Err(TraceIdError::AllZero),
            value => Ok(Self(value)),
        }
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
