use std::fmt;
use std::str::FromStr;

use sha2::Digest;

use crate::error::HashError;

/// Digest algorithms a manifest may be generated with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// BLAKE2b with a 512-bit digest
    Blake2b,
    /// BLAKE2s with a 256-bit digest
    Blake2s,
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
    #[default]
    Sha512,
}

impl HashAlgorithm {
    /// Every supported algorithm, in the order they are listed to users.
    pub const ALL: [HashAlgorithm; 12] = [
        Self::Blake2b,
        Self::Blake2s,
        Self::Md5,
        Self::Sha1,
        Self::Sha224,
        Self::Sha256,
        Self::Sha384,
        Self::Sha3_224,
        Self::Sha3_256,
        Self::Sha3_384,
        Self::Sha3_512,
        Self::Sha512,
    ];

    /// Name stored in the manifest's `hash.type` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blake2b => "blake2b",
            Self::Blake2s => "blake2s",
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha3_224 => "sha3_224",
            Self::Sha3_256 => "sha3_256",
            Self::Sha3_384 => "sha3_384",
            Self::Sha3_512 => "sha3_512",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex digest this algorithm produces.
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha224 | Self::Sha3_224 => 56,
            Self::Blake2s | Self::Sha256 | Self::Sha3_256 => 64,
            Self::Sha384 | Self::Sha3_384 => 96,
            Self::Blake2b | Self::Sha512 | Self::Sha3_512 => 128,
        }
    }

    /// Start a fresh running digest for this algorithm.
    pub fn digester(&self) -> Digester {
        match self {
            Self::Blake2b => Digester::Blake2b(blake2::Blake2b512::new()),
            Self::Blake2s => Digester::Blake2s(blake2::Blake2s256::new()),
            Self::Md5 => Digester::Md5(md5::Context::new()),
            Self::Sha1 => Digester::Sha1(sha1::Sha1::new()),
            Self::Sha224 => Digester::Sha224(sha2::Sha224::new()),
            Self::Sha256 => Digester::Sha256(sha2::Sha256::new()),
            Self::Sha384 => Digester::Sha384(sha2::Sha384::new()),
            Self::Sha3_224 => Digester::Sha3_224(sha3::Sha3_224::new()),
            Self::Sha3_256 => Digester::Sha3_256(sha3::Sha3_256::new()),
            Self::Sha3_384 => Digester::Sha3_384(sha3::Sha3_384::new()),
            Self::Sha3_512 => Digester::Sha3_512(sha3::Sha3_512::new()),
            Self::Sha512 => Digester::Sha512(sha2::Sha512::new()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|algo| algo.name() == s)
            .ok_or_else(|| HashError::unsupported(s))
    }
}

/// A running digest context for one of the supported algorithms.
pub enum Digester {
    Blake2b(blake2::Blake2b512),
    Blake2s(blake2::Blake2s256),
    Md5(md5::Context),
    Sha1(sha1::Sha1),
    Sha224(sha2::Sha224),
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha3_224(sha3::Sha3_224),
    Sha3_256(sha3::Sha3_256),
    Sha3_384(sha3::Sha3_384),
    Sha3_512(sha3::Sha3_512),
    Sha512(sha2::Sha512),
}

impl Digester {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Blake2b(h) => h.update(data),
            Self::Blake2s(h) => h.update(data),
            Self::Md5(ctx) => ctx.consume(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha224(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha3_224(h) => h.update(data),
            Self::Sha3_256(h) => h.update(data),
            Self::Sha3_384(h) => h.update(data),
            Self::Sha3_512(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Consume the context and return the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Blake2b(h) => format!("{:x}", h.finalize()),
            Self::Blake2s(h) => format!("{:x}", h.finalize()),
            Self::Md5(ctx) => format!("{:x}", ctx.compute()),
            Self::Sha1(h) => format!("{:x}", h.finalize()),
            Self::Sha224(h) => format!("{:x}", h.finalize()),
            Self::Sha256(h) => format!("{:x}", h.finalize()),
            Self::Sha384(h) => format!("{:x}", h.finalize()),
            Self::Sha3_224(h) => format!("{:x}", h.finalize()),
            Self::Sha3_256(h) => format!("{:x}", h.finalize()),
            Self::Sha3_384(h) => format!("{:x}", h.finalize()),
            Self::Sha3_512(h) => format!("{:x}", h.finalize()),
            Self::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_through_from_str() {
        for algo in HashAlgorithm::ALL {
            assert_eq!(algo.name().parse::<HashAlgorithm>().unwrap(), algo);
        }
    }

    #[test]
    fn test_unknown_name_rejected() {
        let err = "crc32".parse::<HashAlgorithm>().unwrap_err();
        assert!(matches!(err, HashError::UnsupportedAlgorithm(ref n) if n == "crc32"));
        // Names are matched exactly
        assert!("SHA256".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_default_is_sha512() {
        assert_eq!(HashAlgorithm::default(), HashAlgorithm::Sha512);
    }

    #[test]
    fn test_empty_input_digests() {
        let cases = [
            (HashAlgorithm::Md5, "d41d8cd98f00b204e9800998ecf8427e"),
            (
                HashAlgorithm::Sha1,
                "da39a3ee5e6b4b0d3255bfef95601890afd80709",
            ),
            (
                HashAlgorithm::Sha256,
                "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            ),
            (
                HashAlgorithm::Sha3_256,
                "a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a",
            ),
        ];
        for (algo, expected) in cases {
            assert_eq!(algo.digester().finalize_hex(), expected, "{algo}");
        }
    }

    #[test]
    fn test_hex_len_matches_output() {
        for algo in HashAlgorithm::ALL {
            let mut d = algo.digester();
            d.update(b"abc");
            assert_eq!(d.finalize_hex().len(), algo.hex_len(), "{algo}");
        }
    }
}
