//! Raw unit encoding
//!
//! Raw units travel between the host loader and the instrumenter as the
//! MessagePack encoding of a [`ClassUnit`].

use super::ClassUnit;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to decode raw unit: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Failed to encode unit: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

pub fn decode(raw: &[u8]) -> Result<ClassUnit, CodecError> {
    Ok(rmp_serde::from_slice(raw)?)
}

pub fn encode(class: &ClassUnit) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(class)?)
}
