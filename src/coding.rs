// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Minimal binary (de)serialization used for the fixed-layout on-disk
//! records: the `Config` record, `CompIdx` entries, and `CompInfo`/`CompBlock`/
//! `CompData`/`CompCol`. All multi-byte integers are little-endian; this is
//! an internal, host-only format (unlike the network-order submit message,
//! see `submit.rs`).

use std::io::{Read, Write};

/// Error during serialization.
#[derive(Debug)]
pub enum EncodeError {
    /// I/O error
    Io(std::io::Error),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "EncodeError({e})"),
        }
    }
}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for EncodeError {}

/// Trait to serialize a fixed-layout record.
pub trait Encode {
    /// Serializes into a writer.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError>;

    /// Serializes into a freshly allocated vector.
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut v = vec![];
        self.encode_into(&mut v).expect("encoding to a Vec cannot fail");
        v
    }
}

/// Trait to deserialize a fixed-layout record.
pub trait Decode {
    /// Deserializes from a reader.
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self>
    where
        Self: Sized;
}
