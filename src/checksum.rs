// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! CRC32 checksum over a `CompInfo` region, used to populate and verify
//! `CompIdx.checksum` (`spec.md` §3, §9 "Open Questions").

/// A 32-bit checksum.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Checksum(u32);

impl Checksum {
    /// Wraps a checksum value.
    #[must_use]
    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw 32-bit integer.
    #[must_use]
    pub fn into_u32(self) -> u32 {
        self.0
    }

    /// Computes the checksum of a byte slice.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(crc32fast::hash(bytes))
    }

    pub(crate) fn check(&self, expected: Self) -> crate::Result<()> {
        if self.0 == expected.0 {
            Ok(())
        } else {
            Err(crate::Error::FormatError(format!(
                "checksum mismatch: expected {:08x}, got {:08x}",
                expected.0, self.0
            )))
        }
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Checksum;

    #[test]
    fn checksum_roundtrip() {
        let a = Checksum::of(b"hello world");
        let b = Checksum::of(b"hello world");
        assert_eq!(a, b);
        assert!(a.check(b).is_ok());

        let c = Checksum::of(b"hello world!");
        assert!(a.check(c).is_err());
    }
}
