use thiserror::Error;

/// Error types returned by this crate.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// The host string is empty.
    #[error("invalid host: host must not be empty")]
    InvalidHost,

    /// The port is outside the valid range (1 to 65535).
    #[error("invalid port: port must be between 1 and 65535")]
    InvalidPort,

    /// The I/O timeout is zero or otherwise unusable.
    #[error("invalid timeout: timeout must be greater than zero")]
    InvalidTimeout,

    /// The retry count could not be parsed.
    #[error("invalid max retries value")]
    InvalidMaxRetries,

    /// The retry delay is negative or could not be parsed.
    #[error("invalid retry delay value")]
    InvalidRetryDelay,

    /// The algorithm name is not a member of the TSIG catalog.
    #[error("unknown TSIG algorithm {0:?}")]
    UnknownAlgorithm(String),

    /// The shared secret is not valid base64.
    #[error("invalid secret: {0}")]
    InvalidSecret(String),

    /// The shared secret decodes to an empty key.
    #[error("invalid secret: key must not be empty")]
    EmptySecret,

    /// A required environment variable is not set.
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    /// The frame header advertises a total length too small to hold
    /// the version word.
    #[error("incomplete frame header")]
    IncompleteHeader,

    /// The frame header advertises a length beyond the sanity cap.
    ///
    /// BIND responses are at most a few hundred kilobytes; anything
    /// larger indicates a desynchronised or hostile peer.
    #[error("frame of {0} bytes exceeds maximum")]
    FrameTooLarge(u32),

    /// The frame header carries a control-channel version other than 1.
    #[error("invalid control channel version {0}")]
    InvalidVersion(u32),

    /// A value carries a type byte that is neither map, byte string, nor
    /// list.
    #[error("invalid value type {0:#04x}")]
    InvalidTypeTag(u8),

    /// A declared length exceeds the data available, or a nested value
    /// does not fill its declared length exactly.
    #[error("invalid length in control message")]
    InvalidLength,

    /// A map contains the same key twice.
    #[error("duplicate key {0:?} in control message")]
    DuplicateKey(String),

    /// A top-level message section (`_auth`, `_ctrl`, `_data`) is absent
    /// or is not a map.
    #[error("message section {0} is missing or not a map")]
    InvalidSection(&'static str),

    /// The handshake response carried no `_nonce` in its `_ctrl` section.
    #[error("handshake response carried no nonce")]
    MissingNonce,

    /// An inbound message carried no signature entry for the configured
    /// algorithm family.
    #[error("message carried no signature")]
    MissingSignature,

    /// The algorithm code embedded in an `hsha` signature does not match
    /// the algorithm this session is configured with.
    #[error("signature algorithm code {got} does not match configured code {expected}")]
    AlgorithmMismatch {
        /// The code of the session's configured algorithm.
        expected: u8,

        /// The code found in the inbound signature.
        got: u8,
    },

    /// HMAC verification of an inbound message failed.
    #[error("signature verification failed")]
    SignatureMismatch,

    /// The server reported an error in the response `_data.err` field.
    #[error("server error: {0}")]
    Server(String),

    /// An I/O error occurred while connecting or exchanging frames.
    #[error("i/o error ({0:?}): {1}")]
    Io(std::io::ErrorKind, String),
}

impl Error {
    /// Whether the retry engine may re-attempt the exchange after this
    /// error.
    ///
    /// Only transport-level failures (connection refused, reset,
    /// timeout, unexpected EOF, partial frame reads) are retryable.
    /// Configuration, protocol, authentication, and server errors are
    /// final: retrying them would either repeat the failure or mask a
    /// key mismatch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_, _))
    }
}

impl From<std::io::Error> for Error {
    fn from(v: std::io::Error) -> Self {
        Self::Io(v.kind(), v.to_string())
    }
}
