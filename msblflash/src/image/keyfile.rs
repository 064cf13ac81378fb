//! AES key file parser.
//!
//! Key files are plain text:
//!
//! ```text
//! aes_key_start
//! 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07,
//! 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f
//! aes_key_end
//! aes_aad_start
//! 0xde, 0xad, 0xbe, 0xef
//! aes_key_end
//! ```
//!
//! The AAD block is closed by `aes_key_end` as well, not `aes_aad_end`.
//! Files produced by the vendor tooling rely on this, so it is kept.

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

const KEY_START: &str = "aes_key_start";
const KEY_END: &str = "aes_key_end";
const AAD_START: &str = "aes_aad_start";

/// Accepted AES key lengths in bytes.
pub const KEY_LENGTHS: [usize; 3] = [16, 24, 32];

/// Maximum AAD length in bytes.
pub const MAX_AAD_LEN: usize = 32;

/// Each blob is zero padded to this many bytes on the wire.
const BLOB_SIZE: usize = 32;

/// AES key and additional authenticated data.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    key: Vec<u8>,
    aad: Vec<u8>,
}

impl KeyMaterial {
    /// Build key material from raw bytes, checking lengths.
    pub fn new(key: Vec<u8>, aad: Vec<u8>) -> Result<Self> {
        if !KEY_LENGTHS.contains(&key.len()) {
            return Err(Error::InvalidKeyFile(format!(
                "key must be 16, 24 or 32 bytes, got {}",
                key.len()
            )));
        }
        if aad.len() > MAX_AAD_LEN {
            return Err(Error::InvalidKeyFile(format!(
                "AAD must be at most {MAX_AAD_LEN} bytes, got {}",
                aad.len()
            )));
        }
        Ok(Self { key, aad })
    }

    /// Read and parse a key file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading key file: {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse key file text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();

        expect_marker(&mut lines, KEY_START)?;
        let key = read_hex_block(&mut lines, "key")?;
        expect_marker(&mut lines, AAD_START)?;
        let aad = read_hex_block(&mut lines, "AAD")?;

        Self::new(key, aad)
    }

    /// AES key bytes.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// AAD bytes.
    pub fn aad(&self) -> &[u8] {
        &self.aad
    }

    /// Hex blob passed to `set_key`.
    ///
    /// `len(key) || key padded to 32 bytes || len(aad) || aad padded to 32
    /// bytes`, where lengths are lowercase hex without leading zeros.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(2 * (2 + 2 * BLOB_SIZE));
        push_blob(&mut out, &self.key);
        push_blob(&mut out, &self.aad);
        out
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key bytes.
        f.debug_struct("KeyMaterial")
            .field("key_len", &self.key.len())
            .field("aad_len", &self.aad.len())
            .finish()
    }
}

fn push_blob(out: &mut String, bytes: &[u8]) {
    let mut padded = [0u8; BLOB_SIZE];
    padded[..bytes.len()].copy_from_slice(bytes);
    out.push_str(&format!("{:x}", bytes.len()));
    out.push_str(&hex::encode_upper(padded));
}

fn expect_marker<'a, I>(lines: &mut I, marker: &str) -> Result<()>
where
    I: Iterator<Item = &'a str>,
{
    match lines.next() {
        Some(line) if line == marker => Ok(()),
        Some(line) => Err(Error::InvalidKeyFile(format!(
            "expected '{marker}', found '{line}'"
        ))),
        None => Err(Error::InvalidKeyFile(format!(
            "unexpected end of file, expected '{marker}'"
        ))),
    }
}

fn read_hex_block<'a, I>(lines: &mut I, what: &str) -> Result<Vec<u8>>
where
    I: Iterator<Item = &'a str>,
{
    let mut digits = String::new();
    loop {
        let Some(line) = lines.next() else {
            return Err(Error::InvalidKeyFile(format!(
                "unexpected end of file in {what} block, expected '{KEY_END}'"
            )));
        };
        if line == KEY_END {
            break;
        }
        let cleaned = line
            .replace("0x", "")
            .replace(", ", "")
            .replace(',', "");
        digits.push_str(cleaned.trim());
    }

    hex::decode(&digits).map_err(|e| Error::InvalidKeyFile(format!("bad {what} hex: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_16: &str = "aes_key_start\n\
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07,\n\
        0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f\n\
        aes_key_end\n\
        aes_aad_start\n\
        0xde, 0xad, 0xbe, 0xef\n\
        aes_key_end\n";

    #[test]
    fn test_parse_and_encode() {
        let material = KeyMaterial::parse(KEY_16).unwrap();
        assert_eq!(material.key(), &(0u8..16).collect::<Vec<_>>()[..]);
        assert_eq!(material.aad(), &[0xDE, 0xAD, 0xBE, 0xEF]);

        let blob = material.encode();
        assert_eq!(blob.len(), 2 + 64 + 1 + 64);
        assert!(blob.starts_with("10000102030405060708090A0B0C0D0E0F"));
        assert_eq!(&blob[66..], format!("4DEADBEEF{}", "00".repeat(28)));
    }

    #[test]
    fn test_crlf_line_endings() {
        let text = KEY_16.replace('\n', "\r\n");
        let material = KeyMaterial::parse(&text).unwrap();
        assert_eq!(material.key().len(), 16);
    }

    #[test]
    fn test_plain_hex_lines() {
        let text = format!(
            "aes_key_start\n{}\naes_key_end\naes_aad_start\naes_key_end\n",
            "ab".repeat(32)
        );
        let material = KeyMaterial::parse(&text).unwrap();
        assert_eq!(material.key(), &[0xAB; 32]);
        assert!(material.aad().is_empty());
        let blob = material.encode();
        assert!(blob.starts_with("20"));
        assert!(blob.ends_with(&format!("0{}", "00".repeat(32))));
    }

    #[test]
    fn test_rejects_wrong_key_length() {
        let text = format!(
            "aes_key_start\n{}\naes_key_end\naes_aad_start\naes_key_end\n",
            "11".repeat(20)
        );
        assert!(matches!(
            KeyMaterial::parse(&text),
            Err(Error::InvalidKeyFile(_))
        ));
    }

    #[test]
    fn test_rejects_long_aad() {
        let text = format!(
            "aes_key_start\n{}\naes_key_end\naes_aad_start\n{}\naes_key_end\n",
            "11".repeat(16),
            "22".repeat(33)
        );
        assert!(KeyMaterial::parse(&text).is_err());
    }

    #[test]
    fn test_aad_block_needs_key_end_marker() {
        let text = KEY_16.trim_end_matches("aes_key_end\n").to_string() + "aes_aad_end\n";
        assert!(matches!(
            KeyMaterial::parse(&text),
            Err(Error::InvalidKeyFile(_))
        ));
    }

    #[test]
    fn test_rejects_missing_start_and_bad_digits() {
        assert!(KeyMaterial::parse("").is_err());
        assert!(KeyMaterial::parse("key\n").is_err());
        let odd = "aes_key_start\n0x1\naes_key_end\naes_aad_start\naes_key_end\n";
        assert!(KeyMaterial::parse(odd).is_err());
        let bad = "aes_key_start\nzz\naes_key_end\naes_aad_start\naes_key_end\n";
        assert!(KeyMaterial::parse(bad).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let material = KeyMaterial::new(vec![0x42; 16], vec![]).unwrap();
        let debug = format!("{material:?}");
        assert!(!debug.contains("42"));
        assert!(debug.contains("key_len"));
    }
}
