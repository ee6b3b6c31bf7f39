use std::{fmt, str::FromStr};

use crate::Error;

/// The TSIG HMAC algorithms BIND accepts on the control channel.
///
/// Each variant carries the numeric code BIND embeds in `hsha`
/// signature entries; the numbering is BIND's wire convention, not this
/// crate's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// `hmac-md5`, the historical default key type.
    Md5,
    /// `hmac-sha1`.
    Sha1,
    /// `hmac-sha224`.
    Sha224,
    /// `hmac-sha256`, the default for keys generated by modern BIND.
    Sha256,
    /// `hmac-sha384`.
    Sha384,
    /// `hmac-sha512`.
    Sha512,
}

impl Algorithm {
    /// The numeric algorithm code used in the `hsha` signature entry.
    pub fn code(&self) -> u8 {
        match self {
            Self::Md5 => 157,
            Self::Sha1 => 161,
            Self::Sha224 => 162,
            Self::Sha256 => 163,
            Self::Sha384 => 164,
            Self::Sha512 => 165,
        }
    }

    /// The size of the raw HMAC digest in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha224 => 28,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// The canonical `hmac-` prefixed name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "hmac-md5",
            Self::Sha1 => "hmac-sha1",
            Self::Sha224 => "hmac-sha224",
            Self::Sha256 => "hmac-sha256",
            Self::Sha384 => "hmac-sha384",
            Self::Sha512 => "hmac-sha512",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    /// Accepts catalog names case-insensitively, with or without the
    /// `hmac-` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let name = lower.strip_prefix("hmac-").unwrap_or(&lower);

        match name {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(Error::UnknownAlgorithm(s.to_owned())),
        }
    }
}
