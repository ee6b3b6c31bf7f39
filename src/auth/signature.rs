use base64::{engine::general_purpose::STANDARD, Engine};
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use super::Algorithm;
use crate::{Error, Map, Value};

/// `_auth` entry key for MD5 signatures.
const MD5_SIGNATURE_KEY: &[u8] = b"hmd5";

/// `_auth` entry key for the SHA family.
const SHA_SIGNATURE_KEY: &[u8] = b"hsha";

/// The `hmd5` field is the leading 22 characters of the padded base64
/// digest (a 16-byte digest encodes to 24 characters ending `==`).
const HMD5_FIELD_LEN: usize = 22;

/// The `hsha` field holds up to 88 base64 characters, zero-padded on
/// the right, preceded by the 1-byte algorithm code.
const HSHA_B64_LEN: usize = 88;

/// Computes the signature entry for the canonical serialisation
/// `canonical` and returns the one-entry map to install as `_auth`.
pub fn sign(key: &[u8], algorithm: Algorithm, canonical: &[u8]) -> Map {
    let field = signature_field(key, algorithm, canonical);

    let name = match algorithm {
        Algorithm::Md5 => MD5_SIGNATURE_KEY,
        _ => SHA_SIGNATURE_KEY,
    };

    let mut auth = Map::new();
    auth.insert(name.to_vec(), Value::Bytes(field));
    auth
}

/// Verifies the signature carried in `auth` against the canonical
/// serialisation `canonical`.
///
/// The recomputed field is compared bytewise in constant time. An
/// `hsha` entry whose algorithm-code byte does not match the configured
/// algorithm is rejected before the digest comparison.
pub fn verify(key: &[u8], algorithm: Algorithm, canonical: &[u8], auth: &Map) -> Result<(), Error> {
    let name = match algorithm {
        Algorithm::Md5 => MD5_SIGNATURE_KEY,
        _ => SHA_SIGNATURE_KEY,
    };

    let got = auth
        .get(name)
        .and_then(Value::as_bytes)
        .ok_or(Error::MissingSignature)?;

    if algorithm != Algorithm::Md5 {
        let code = *got.first().ok_or(Error::SignatureMismatch)?;
        if code != algorithm.code() {
            return Err(Error::AlgorithmMismatch {
                expected: algorithm.code(),
                got: code,
            });
        }
    }

    let want = signature_field(key, algorithm, canonical);
    if !constant_time_eq(&want, got) {
        return Err(Error::SignatureMismatch);
    }

    Ok(())
}

/// Builds the raw signature field bytes for one message.
fn signature_field(key: &[u8], algorithm: Algorithm, canonical: &[u8]) -> Vec<u8> {
    let b64 = STANDARD.encode(hmac_digest(key, algorithm, canonical));

    match algorithm {
        // BIND sends the 22 leading characters and drops the padding.
        Algorithm::Md5 => b64.as_bytes()[..HMD5_FIELD_LEN].to_vec(),
        _ => {
            let mut field = vec![0_u8; 1 + HSHA_B64_LEN];
            field[0] = algorithm.code();
            field[1..=b64.len()].copy_from_slice(b64.as_bytes());
            field
        }
    }
}

// HMAC accepts keys of any length, so `new_from_slice` cannot fail.
macro_rules! hmac {
    ($hash:ty, $key:expr, $data:expr) => {{
        let mut mac = Hmac::<$hash>::new_from_slice($key).unwrap();
        mac.update($data);
        mac.finalize().into_bytes().to_vec()
    }};
}

fn hmac_digest(key: &[u8], algorithm: Algorithm, data: &[u8]) -> Vec<u8> {
    match algorithm {
        Algorithm::Md5 => hmac!(Md5, key, data),
        Algorithm::Sha1 => hmac!(Sha1, key, data),
        Algorithm::Sha224 => hmac!(Sha224, key, data),
        Algorithm::Sha256 => hmac!(Sha256, key, data),
        Algorithm::Sha384 => hmac!(Sha384, key, data),
        Algorithm::Sha512 => hmac!(Sha512, key, data),
    }
}
