//! Payload codec for encrypted upstream responses.
//!
//! The upstream ships `Data` as `base64(DES-CBC(pkcs7(base64(gzip(json)))))`
//! keyed by the `Rnd` nonce that travels next to it in the envelope. Every
//! stage reports its own error variant so a broken envelope can be traced to
//! the exact step that rejected it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use thiserror::Error;

type DesCbcDec = cbc::Decryptor<des::Des>;
type DesCbcEnc = cbc::Encryptor<des::Des>;

/// DES block size in bytes. Also the minimum nonce length.
pub const BLOCK_SIZE: usize = 8;

/// Stage-tagged decode failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("nonce must be at least {BLOCK_SIZE} bytes, got {0}")]
    InvalidNonce(usize),

    #[error("ciphertext is not valid base64: {0}")]
    Base64(#[source] base64::DecodeError),

    #[error("ciphertext length {0} is not a positive multiple of {BLOCK_SIZE}")]
    BlockAlignment(usize),

    #[error("cipher rejected key or iv")]
    Cipher,

    #[error("invalid pkcs7 padding: {0}")]
    Padding(String),

    #[error("decrypted plaintext is not valid base64: {0}")]
    InnerBase64(#[source] base64::DecodeError),

    #[error("decompression failed: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("decoded payload is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl CodecError {
    /// Short stage name, used as a tag in processing logs.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidNonce(_) => "invalid-nonce",
            Self::Base64(_) => "base64",
            Self::BlockAlignment(_) => "block-alignment",
            Self::Cipher => "cipher",
            Self::Padding(_) => "padding",
            Self::InnerBase64(_) => "inner-base64",
            Self::Gzip(_) => "gzip",
            Self::Utf8(_) => "utf8",
        }
    }
}

fn key_and_iv(nonce: &str) -> Result<([u8; BLOCK_SIZE], [u8; BLOCK_SIZE]), CodecError> {
    let bytes = nonce.as_bytes();
    if bytes.len() < BLOCK_SIZE {
        return Err(CodecError::InvalidNonce(bytes.len()));
    }
    let mut key = [0u8; BLOCK_SIZE];
    let mut iv = [0u8; BLOCK_SIZE];
    key.copy_from_slice(&bytes[..BLOCK_SIZE]);
    iv.copy_from_slice(&bytes[bytes.len() - BLOCK_SIZE..]);
    Ok((key, iv))
}

fn strip_pkcs7(buf: &[u8]) -> Result<&[u8], CodecError> {
    let Some(&last) = buf.last() else {
        return Err(CodecError::Padding("empty plaintext".to_string()));
    };
    let pad = last as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > buf.len() {
        return Err(CodecError::Padding(format!("pad length {pad} out of range")));
    }
    let (body, tail) = buf.split_at(buf.len() - pad);
    if tail.iter().any(|&b| b as usize != pad) {
        return Err(CodecError::Padding("pad bytes are not uniform".to_string()));
    }
    Ok(body)
}

/// Decode an encrypted `Data` field back into its JSON text.
pub fn decode(ciphertext: &str, nonce: &str) -> Result<String, CodecError> {
    // Nonce is validated before touching the ciphertext.
    let (key, iv) = key_and_iv(nonce)?;

    let mut buf = STANDARD
        .decode(ciphertext.trim())
        .map_err(CodecError::Base64)?;
    if buf.is_empty() || buf.len() % BLOCK_SIZE != 0 {
        return Err(CodecError::BlockAlignment(buf.len()));
    }

    let decryptor = DesCbcDec::new_from_slices(&key, &iv).map_err(|_| CodecError::Cipher)?;
    let plain = decryptor
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| CodecError::Cipher)?;
    let unpadded = strip_pkcs7(plain)?;

    let compressed = STANDARD
        .decode(unpadded)
        .map_err(CodecError::InnerBase64)?;

    let mut out = Vec::with_capacity(compressed.len() * 4);
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut out)
        .map_err(CodecError::Gzip)?;

    Ok(String::from_utf8(out)?)
}

/// Mirror of [`decode`]: gzip, base64, pad, encrypt, base64.
///
/// Only used to build fixtures; the upstream never receives encrypted data.
pub fn encode(plaintext: &str, nonce: &str) -> Result<String, CodecError> {
    let (key, iv) = key_and_iv(nonce)?;

    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(plaintext.as_bytes()).map_err(CodecError::Gzip)?;
    let compressed = gz.finish().map_err(CodecError::Gzip)?;

    let inner = STANDARD.encode(compressed);
    let encryptor = DesCbcEnc::new_from_slices(&key, &iv).map_err(|_| CodecError::Cipher)?;
    let sealed = encryptor.encrypt_padded_vec_mut::<Pkcs7>(inner.as_bytes());

    Ok(STANDARD.encode(sealed))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONCE: &str = "a1b2c3d4e5f6g7h8";

    fn seal_raw(plain: &[u8], nonce: &str) -> String {
        let (key, iv) = key_and_iv(nonce).unwrap();
        let enc = DesCbcEnc::new_from_slices(&key, &iv).unwrap();
        let mut buf = plain.to_vec();
        let len = buf.len();
        let sealed = enc.encrypt_padded_mut::<NoPadding>(&mut buf, len).unwrap();
        STANDARD.encode(sealed)
    }

    #[test]
    fn test_round_trip_recovers_json() {
        let json = r#"{"List":[{"rankNum":1,"title":"夏季连衣裙"}]}"#;
        let sealed = encode(json, NONCE).unwrap();
        assert_eq!(decode(&sealed, NONCE).unwrap(), json);
    }

    #[test]
    fn test_round_trip_with_exact_eight_byte_nonce() {
        // Key and IV are the same eight bytes here.
        let sealed = encode("{}", "12345678").unwrap();
        assert_eq!(decode(&sealed, "12345678").unwrap(), "{}");
    }

    #[test]
    fn test_round_trip_large_payload() {
        let items: Vec<String> = (0..500)
            .map(|i| format!(r#"{{"awemeId":"{i}","likes":"{}w"}}"#, i % 13))
            .collect();
        let json = format!(r#"{{"List":[{}]}}"#, items.join(","));
        let sealed = encode(&json, NONCE).unwrap();
        assert_eq!(decode(&sealed, NONCE).unwrap(), json);
    }

    #[test]
    fn test_short_nonce_rejected_before_cipher() {
        // Garbage ciphertext: the nonce check must fire first.
        let err = decode("%%%not-base64%%%", "short").unwrap_err();
        assert!(matches!(err, CodecError::InvalidNonce(5)));
        assert_eq!(err.stage(), "invalid-nonce");
    }

    #[test]
    fn test_bad_outer_base64() {
        let err = decode("@@@@", NONCE).unwrap_err();
        assert_eq!(err.stage(), "base64");
    }

    #[test]
    fn test_misaligned_ciphertext() {
        let err = decode(&STANDARD.encode([1u8; 12]), NONCE).unwrap_err();
        assert!(matches!(err, CodecError::BlockAlignment(12)));
    }

    #[test]
    fn test_empty_ciphertext_is_misaligned() {
        let err = decode("", NONCE).unwrap_err();
        assert!(matches!(err, CodecError::BlockAlignment(0)));
    }

    #[test]
    fn test_wrong_nonce_breaks_padding_or_payload() {
        let sealed = encode(r#"{"ok":true}"#, NONCE).unwrap();
        let err = decode(&sealed, "zzzzzzzzzzzzzzzz").unwrap_err();
        assert!(matches!(
            err,
            CodecError::Padding(_) | CodecError::InnerBase64(_) | CodecError::Gzip(_)
        ));
    }

    #[test]
    fn test_non_uniform_padding() {
        // Last byte says 3, but the two before it disagree.
        let block = [b'A', b'A', b'A', b'A', b'A', 1, 2, 3];
        let err = decode(&seal_raw(&block, NONCE), NONCE).unwrap_err();
        assert_eq!(err.stage(), "padding");
    }

    #[test]
    fn test_zero_padding_byte() {
        let block = [b'A', b'A', b'A', b'A', b'A', b'A', b'A', 0];
        let err = decode(&seal_raw(&block, NONCE), NONCE).unwrap_err();
        assert_eq!(err.stage(), "padding");
    }

    #[test]
    fn test_inner_payload_not_gzip() {
        // Valid padding and inner base64, but the blob is not gzip.
        let inner = STANDARD.encode(b"plain text, no gzip header");
        let mut padded = inner.into_bytes();
        let pad = BLOCK_SIZE - padded.len() % BLOCK_SIZE;
        padded.extend(std::iter::repeat(pad as u8).take(pad));
        let err = decode(&seal_raw(&padded, NONCE), NONCE).unwrap_err();
        assert!(matches!(err, CodecError::Gzip(_)));
    }

    #[test]
    fn test_inner_payload_not_base64() {
        let mut padded = b"!!!!!!!".to_vec();
        padded.push(1);
        let err = decode(&seal_raw(&padded, NONCE), NONCE).unwrap_err();
        assert_eq!(err.stage(), "inner-base64");
    }
}
