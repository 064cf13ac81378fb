//! MSBL firmware container format.
//!
//! An MSBL file wraps an application image in fixed-size pages, each
//! carrying its own CRC32, and ends with a CRC32 over the whole file.
//!
//! ## Layout
//!
//! ```text
//! +--------------------------+
//! |      Header (76B)        |
//! +--------------------------+
//! | Page[0]  payload + 16B   |
//! +--------------------------+
//! |          ...             |
//! +--------------------------+
//! | Page[n-1] payload + 16B  |
//! +--------------------------+
//! |    CRC32 of all above    |
//! +--------------------------+
//! ```
//!
//! ## Header
//!
//! ```text
//! offset  size  field
//!      0     4  magic "msbl"
//!      4     4  format version
//!      8    16  target name (NUL padded)
//!     24    16  encryption type (NUL padded)
//!     40    11  nonce
//!     51     1  reserved
//!     52    16  auth tag
//!     68     2  page count
//!     70     2  page size
//!     72     1  CRC field size
//!     73     3  reserved
//! ```
//!
//! ## Page trailer
//!
//! Each page is `page_size` payload bytes followed by a 16-byte trailer:
//! the little-endian CRC32 of the payload and 12 zero bytes.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info, warn};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

/// Container magic.
pub const MSBL_MAGIC: [u8; 4] = *b"msbl";

/// Header size in bytes.
pub const HEADER_SIZE: usize = 76;

/// Payload bytes per page used by every shipped bootloader.
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Bytes appended to each page payload (CRC32 + 12 reserved).
pub const PAGE_TRAILER_SIZE: usize = 16;

/// Size of every CRC field.
pub const CRC_SIZE: usize = 4;

/// Target name written into headers synthesized from raw binaries.
pub const DEFAULT_TARGET: &str = "MAX32660";

/// Name field size (target and encryption type).
pub const NAME_SIZE: usize = 16;

/// Nonce size.
pub const NONCE_SIZE: usize = 11;

/// Authentication tag size.
pub const AUTH_SIZE: usize = 16;

/// Size of an [`AppHeader`].
pub const APP_HEADER_SIZE: usize = 16;

/// MSBL file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsblHeader {
    /// Magic (`"msbl"` for valid files).
    pub magic: [u8; 4],
    /// Container format version.
    pub format_version: u32,
    /// Target name, NUL padded.
    pub target: [u8; NAME_SIZE],
    /// Encryption type name, NUL padded (empty for plain images).
    pub enc_type: [u8; NAME_SIZE],
    /// AES nonce / IV.
    pub nonce: [u8; NONCE_SIZE],
    /// Reserved.
    pub resv0: u8,
    /// AES authentication tag.
    pub auth: [u8; AUTH_SIZE],
    /// Number of pages.
    pub num_pages: u16,
    /// Payload bytes per page.
    pub page_size: u16,
    /// Size of the CRC fields.
    pub crc_size: u8,
    /// Reserved.
    pub resv1: [u8; 3],
}

impl MsblHeader {
    /// Header for an image synthesized from a raw binary.
    pub fn synthesized(target: &str, num_pages: u16) -> Result<Self> {
        #[allow(clippy::cast_possible_truncation)] // DEFAULT_PAGE_SIZE fits in u16
        let page_size = DEFAULT_PAGE_SIZE as u16;
        #[allow(clippy::cast_possible_truncation)]
        let crc_size = CRC_SIZE as u8;

        Ok(Self {
            magic: MSBL_MAGIC,
            format_version: 0,
            target: name_field(target, "target name")?,
            enc_type: [0; NAME_SIZE],
            nonce: [0; NONCE_SIZE],
            resv0: 0,
            auth: [0; AUTH_SIZE],
            num_pages,
            page_size,
            crc_size,
            resv1: [0; 3],
        })
    }

    /// Read a header from a reader (76 bytes). The magic is not checked.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        let format_version = reader.read_u32::<LittleEndian>()?;
        let mut target = [0u8; NAME_SIZE];
        reader.read_exact(&mut target)?;
        let mut enc_type = [0u8; NAME_SIZE];
        reader.read_exact(&mut enc_type)?;
        let mut nonce = [0u8; NONCE_SIZE];
        reader.read_exact(&mut nonce)?;
        let resv0 = reader.read_u8()?;
        let mut auth = [0u8; AUTH_SIZE];
        reader.read_exact(&mut auth)?;
        let num_pages = reader.read_u16::<LittleEndian>()?;
        let page_size = reader.read_u16::<LittleEndian>()?;
        let crc_size = reader.read_u8()?;
        let mut resv1 = [0u8; 3];
        reader.read_exact(&mut resv1)?;

        Ok(Self {
            magic,
            format_version,
            target,
            enc_type,
            nonce,
            resv0,
            auth,
            num_pages,
            page_size,
            crc_size,
            resv1,
        })
    }

    /// Write the header (76 bytes).
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_u32::<LittleEndian>(self.format_version)?;
        writer.write_all(&self.target)?;
        writer.write_all(&self.enc_type)?;
        writer.write_all(&self.nonce)?;
        writer.write_u8(self.resv0)?;
        writer.write_all(&self.auth)?;
        writer.write_u16::<LittleEndian>(self.num_pages)?;
        writer.write_u16::<LittleEndian>(self.page_size)?;
        writer.write_u8(self.crc_size)?;
        writer.write_all(&self.resv1)?;
        Ok(())
    }

    /// Check the magic.
    pub fn is_valid(&self) -> bool {
        self.magic == MSBL_MAGIC
    }

    /// Target name without NUL padding.
    pub fn target_name(&self) -> String {
        field_str(&self.target)
    }

    /// Encryption type without NUL padding.
    pub fn enc_type_name(&self) -> String {
        field_str(&self.enc_type)
    }

    /// Whether the image carries an encryption type.
    pub fn is_encrypted(&self) -> bool {
        self.enc_type[0] != 0
    }

    /// Full on-disk page length (payload + trailer).
    pub fn page_len(&self) -> usize {
        usize::from(self.page_size) + PAGE_TRAILER_SIZE
    }
}

fn name_field(name: &str, what: &str) -> Result<[u8; NAME_SIZE]> {
    let bytes = name.as_bytes();
    if bytes.len() > NAME_SIZE {
        return Err(Error::InvalidMsbl(format!(
            "{what} '{name}' is longer than {NAME_SIZE} bytes"
        )));
    }
    let mut field = [0u8; NAME_SIZE];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

fn field_str(field: &[u8]) -> String {
    let end = field
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).to_string()
}

/// One page: payload followed by the 16-byte trailer.
#[derive(Clone, PartialEq, Eq)]
pub struct Page(Vec<u8>);

impl Page {
    /// Build a page from its payload, computing the trailer.
    pub fn from_payload(payload: &[u8]) -> Self {
        let crc = crc32fast::hash(payload);
        let mut data = Vec::with_capacity(payload.len() + PAGE_TRAILER_SIZE);
        data.extend_from_slice(payload);
        data.extend_from_slice(&crc.to_le_bytes());
        data.resize(payload.len() + PAGE_TRAILER_SIZE, 0);
        Self(data)
    }

    /// Raw page bytes as sent to the device.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.0[..self.0.len() - PAGE_TRAILER_SIZE]
    }

    /// CRC32 stored in the trailer.
    pub fn stored_crc(&self) -> u32 {
        let at = self.0.len() - PAGE_TRAILER_SIZE;
        let mut crc = [0u8; CRC_SIZE];
        crc.copy_from_slice(&self.0[at..at + CRC_SIZE]);
        u32::from_le_bytes(crc)
    }

    /// CRC32 of the payload.
    pub fn computed_crc(&self) -> u32 {
        crc32fast::hash(self.payload())
    }

    /// Page length including trailer.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the page holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("len", &self.0.len())
            .field("crc", &format_args!("{:#010x}", self.stored_crc()))
            .finish()
    }
}

/// Parsed or synthesized MSBL image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsblImage {
    /// File header.
    pub header: MsblHeader,
    pages: Vec<Page>,
    trailing_crc: Option<u32>,
}

impl MsblImage {
    /// Load an image, choosing the codec by file extension.
    ///
    /// `.msbl` files are parsed; `.bin` files are wrapped with
    /// [`MsblImage::from_raw`] using `target` as the header target name.
    pub fn load<P: AsRef<Path>>(path: P, target: &str) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("msbl") => Self::from_file(path),
            Some("bin") => {
                debug!("Loading raw binary from: {}", path.display());
                let data = fs::read(path)?;
                Self::from_raw(&data, target)
            },
            other => Err(Error::InvalidMsbl(format!(
                "unsupported file extension {:?} (expected .msbl or .bin)",
                other.unwrap_or("")
            ))),
        }
    }

    /// Load an MSBL container from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading MSBL from: {}", path.display());
        let data = fs::read(path)?;
        Self::parse(&data)
    }

    /// Parse an MSBL container.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::InvalidMsbl(format!(
                "file too small for header ({} bytes, need {HEADER_SIZE})",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        let header = MsblHeader::read_from(&mut cursor)?;

        if !header.is_valid() {
            return Err(Error::InvalidMsbl(format!(
                "invalid magic: expected {:?}, got {:?}",
                String::from_utf8_lossy(&MSBL_MAGIC),
                String::from_utf8_lossy(&header.magic)
            )));
        }
        if header.page_size == 0 {
            return Err(Error::InvalidMsbl("page size is zero".into()));
        }

        debug!(
            "MSBL header: target {}, enc '{}', {} pages of {} bytes, crc size {}",
            header.target_name(),
            header.enc_type_name(),
            header.num_pages,
            header.page_size,
            header.crc_size
        );

        if data.len() < HEADER_SIZE + CRC_SIZE {
            return Err(Error::InvalidMsbl("missing trailing CRC32".into()));
        }
        let (body, tail) = data[HEADER_SIZE..].split_at(data.len() - HEADER_SIZE - CRC_SIZE);

        let page_len = header.page_len();
        let leftover = body.len() % page_len;
        if leftover != 0 {
            return Err(Error::InvalidMsbl(format!(
                "truncated page: {leftover} bytes left after {} full pages of {page_len} bytes",
                body.len() / page_len
            )));
        }

        let pages: Vec<Page> = body
            .chunks_exact(page_len)
            .map(|chunk| Page(chunk.to_vec()))
            .collect();

        if pages.len() != usize::from(header.num_pages) {
            return Err(Error::InvalidMsbl(format!(
                "header declares {} pages but file holds {}",
                header.num_pages,
                pages.len()
            )));
        }

        let mut crc = [0u8; CRC_SIZE];
        crc.copy_from_slice(tail);
        let trailing_crc = u32::from_le_bytes(crc);

        info!(
            "Read MSBL: {} pages, {} bytes total, CRC32 {trailing_crc:#010x}",
            pages.len(),
            data.len()
        );

        Ok(Self {
            header,
            pages,
            trailing_crc: Some(trailing_crc),
        })
    }

    /// Wrap a raw application binary in MSBL pages.
    ///
    /// The CRC32 and size of the whole binary are written into the first
    /// eight payload bytes of the last page so the bootloader can validate
    /// the image after flashing.
    ///
    /// These eight bytes overwrite whatever the binary holds at offset
    /// `(num_pages - 1) * 8192`; no extra page is added. When the length is
    /// an exact multiple of 8192 the last page is all application data, so
    /// real code or data there is lost. Binaries for this bootloader must
    /// keep those bytes free.
    pub fn from_raw(data: &[u8], target: &str) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidMsbl("raw image is empty".into()));
        }
        let file_size = u32::try_from(data.len())
            .map_err(|_| Error::InvalidMsbl("raw image larger than 4 GiB".into()))?;
        let num_pages = u16::try_from(data.len().div_ceil(DEFAULT_PAGE_SIZE)).map_err(|_| {
            Error::InvalidMsbl(format!("raw image too large ({} bytes)", data.len()))
        })?;

        let header = MsblHeader::synthesized(target, num_pages)?;
        let file_crc = crc32fast::hash(data);

        let last = usize::from(num_pages) - 1;
        let pages = data
            .chunks(DEFAULT_PAGE_SIZE)
            .enumerate()
            .map(|(i, chunk)| {
                let mut payload = vec![0u8; DEFAULT_PAGE_SIZE];
                payload[..chunk.len()].copy_from_slice(chunk);
                if i == last {
                    payload[0..4].copy_from_slice(&file_crc.to_le_bytes());
                    payload[4..8].copy_from_slice(&file_size.to_le_bytes());
                }
                Page::from_payload(&payload)
            })
            .collect::<Vec<_>>();

        info!(
            "Wrapped raw binary: {} bytes, {} pages, CRC32 {file_crc:#010x}",
            data.len(),
            pages.len()
        );

        Ok(Self {
            header,
            pages,
            trailing_crc: None,
        })
    }

    /// Pages in download order.
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Number of pages.
    pub fn num_pages(&self) -> u16 {
        self.header.num_pages
    }

    /// Whole-file CRC32 read from disk (`None` for synthesized images).
    pub fn trailing_crc(&self) -> Option<u32> {
        self.trailing_crc
    }

    /// CRC32 over the serialized header and pages.
    pub fn compute_image_crc(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.header_bytes());
        for page in &self.pages {
            hasher.update(page.as_bytes());
        }
        hasher.finalize()
    }

    /// Check the trailing whole-file CRC32, if present.
    pub fn verify_trailing_crc(&self) -> Result<()> {
        let Some(expected) = self.trailing_crc else {
            return Ok(());
        };
        let actual = self.compute_image_crc();
        if actual != expected {
            return Err(Error::CrcMismatch {
                what: "image".into(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Check every page CRC.
    ///
    /// Encrypted images carry CRCs the host cannot reproduce, so the result
    /// is informational only.
    pub fn verify_page_crcs(&self) -> Result<()> {
        for (i, page) in self
            .pages
            .iter()
            .enumerate()
        {
            let (expected, actual) = (page.stored_crc(), page.computed_crc());
            if expected != actual {
                if self.header.is_encrypted() {
                    warn!("Page {i} CRC differs from plaintext CRC (encrypted image)");
                    continue;
                }
                return Err(Error::CrcMismatch {
                    what: format!("page {i}"),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Serialize to on-disk MSBL bytes, appending the whole-file CRC32.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header_bytes();
        for page in &self.pages {
            out.extend_from_slice(page.as_bytes());
        }
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Write the image as an MSBL file.
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_bytes())?;
        info!("Wrote {} ({} pages)", path.display(), self.pages.len());
        Ok(())
    }

    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    fn header_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        self.header
            .write_to(&mut out)
            .unwrap();
        out
    }
}

/// Self-description record of a raw application image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppHeader {
    /// CRC32 of the application.
    pub crc32: u32,
    /// Application length in bytes.
    pub length: u32,
    /// Valid mark written by the bootloader.
    pub valid_mark: u32,
    /// Boot mode.
    pub boot_mode: u32,
}

impl AppHeader {
    /// Decode from the first 16 bytes of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < APP_HEADER_SIZE {
            return Err(Error::InvalidMsbl(format!(
                "app header needs {APP_HEADER_SIZE} bytes, got {}",
                data.len()
            )));
        }
        let mut reader = Cursor::new(data);
        Ok(Self {
            crc32: reader.read_u32::<LittleEndian>()?,
            length: reader.read_u32::<LittleEndian>()?,
            valid_mark: reader.read_u32::<LittleEndian>()?,
            boot_mode: reader.read_u32::<LittleEndian>()?,
        })
    }

    /// Encode as 16 little-endian bytes.
    pub fn to_bytes(&self) -> [u8; APP_HEADER_SIZE] {
        let mut out = [0u8; APP_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.crc32.to_le_bytes());
        out[4..8].copy_from_slice(&self.length.to_le_bytes());
        out[8..12].copy_from_slice(&self.valid_mark.to_le_bytes());
        out[12..16].copy_from_slice(&self.boot_mode.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        #[allow(clippy::cast_possible_truncation)]
        (0..len)
            .map(|i| (i * 7 + 3) as u8)
            .collect()
    }

    #[test]
    fn test_header_size_matches_layout() {
        let header = MsblHeader::synthesized("MAX78000", 1).unwrap();
        let mut out = Vec::new();
        header
            .write_to(&mut out)
            .unwrap();
        assert_eq!(out.len(), HEADER_SIZE);
        assert_eq!(&out[0..4], b"msbl");
        assert_eq!(&out[8..16], b"MAX78000");
        assert_eq!(u16::from_le_bytes([out[68], out[69]]), 1);
        assert_eq!(u16::from_le_bytes([out[70], out[71]]), 8192);
        assert_eq!(out[72], 4);
    }

    #[test]
    fn test_from_raw_page_count() {
        for (size, pages) in [(1, 1), (8192, 1), (8193, 2), (3 * 8192 + 100, 4)] {
            let image = MsblImage::from_raw(&sample(size), DEFAULT_TARGET).unwrap();
            assert_eq!(image.pages().len(), pages, "size {size}");
            assert_eq!(usize::from(image.num_pages()), pages);
            assert!(
                image
                    .pages()
                    .iter()
                    .all(|p| p.len() == DEFAULT_PAGE_SIZE + PAGE_TRAILER_SIZE)
            );
        }
    }

    #[test]
    fn test_from_raw_embeds_crc_and_size_in_last_page() {
        let raw = sample(20_000);
        let image = MsblImage::from_raw(&raw, DEFAULT_TARGET).unwrap();
        let last = image
            .pages()
            .last()
            .unwrap()
            .payload();

        assert_eq!(&last[0..4], &crc32fast::hash(&raw).to_le_bytes());
        assert_eq!(&last[4..8], &20_000u32.to_le_bytes());
        // Remaining payload is the tail of the binary, zero padded.
        assert_eq!(&last[8..20_000 - 2 * 8192], &raw[2 * 8192 + 8..]);
        assert!(last[20_000 - 2 * 8192..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_from_raw_exact_page_multiple_overwrites_app_bytes() {
        let raw = sample(2 * 8192);
        let image = MsblImage::from_raw(&raw, DEFAULT_TARGET).unwrap();
        assert_eq!(image.num_pages(), 2);

        let last = image
            .pages()
            .last()
            .unwrap()
            .payload();
        assert_ne!(&last[0..8], &raw[8192..8192 + 8]);
        assert_eq!(&last[4..8], &(2u32 * 8192).to_le_bytes());
        assert_eq!(&last[8..], &raw[8192 + 8..]);
    }

    #[test]
    fn test_from_raw_page_trailers() {
        let image = MsblImage::from_raw(&sample(10_000), DEFAULT_TARGET).unwrap();
        for page in image.pages() {
            let bytes = page.as_bytes();
            let crc = crc32fast::hash(&bytes[..DEFAULT_PAGE_SIZE]);
            assert_eq!(&bytes[DEFAULT_PAGE_SIZE..DEFAULT_PAGE_SIZE + 4], &crc.to_le_bytes());
            assert!(bytes[DEFAULT_PAGE_SIZE + 4..].iter().all(|&b| b == 0));
        }
        assert!(image.verify_page_crcs().is_ok());
        assert_eq!(image.trailing_crc(), None);
    }

    #[test]
    fn test_from_raw_header_defaults() {
        let image = MsblImage::from_raw(&sample(5), "MAX78000").unwrap();
        let h = &image.header;
        assert!(h.is_valid());
        assert_eq!(h.format_version, 0);
        assert_eq!(h.target_name(), "MAX78000");
        assert_eq!(h.enc_type_name(), "");
        assert_eq!(h.nonce, [0; NONCE_SIZE]);
        assert_eq!(h.auth, [0; AUTH_SIZE]);
        assert_eq!(h.page_size, 8192);
        assert_eq!(h.crc_size, 4);
    }

    #[test]
    fn test_from_raw_rejects_empty_and_long_target() {
        assert!(matches!(
            MsblImage::from_raw(&[], DEFAULT_TARGET),
            Err(Error::InvalidMsbl(_))
        ));
        assert!(MsblImage::from_raw(&[1], "A-TARGET-NAME-TOO-LONG").is_err());
    }

    #[test]
    fn test_round_trip_through_bytes() {
        let image = MsblImage::from_raw(&sample(17_000), DEFAULT_TARGET).unwrap();
        let bytes = image.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 3 * (8192 + 16) + 4);

        let parsed = MsblImage::parse(&bytes).unwrap();
        assert_eq!(parsed.header, image.header);
        assert_eq!(parsed.pages(), image.pages());
        assert_eq!(
            parsed.trailing_crc(),
            Some(crc32fast::hash(&bytes[..bytes.len() - 4]))
        );
        assert!(parsed.verify_trailing_crc().is_ok());
    }

    #[test]
    fn test_parse_rejects_short_header() {
        let err = MsblImage::parse(&[0u8; HEADER_SIZE - 1]).unwrap_err();
        assert!(matches!(err, Error::InvalidMsbl(_)));
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let mut bytes = MsblImage::from_raw(&sample(10), DEFAULT_TARGET)
            .unwrap()
            .to_bytes();
        bytes[0] = b'X';
        assert!(matches!(MsblImage::parse(&bytes), Err(Error::InvalidMsbl(_))));
    }

    #[test]
    fn test_parse_rejects_truncated_page() {
        let bytes = MsblImage::from_raw(&sample(10_000), DEFAULT_TARGET)
            .unwrap()
            .to_bytes();
        let mut truncated = bytes[..bytes.len() - 104].to_vec();
        truncated.extend_from_slice(&[0; 4]);
        assert!(matches!(
            MsblImage::parse(&truncated),
            Err(Error::InvalidMsbl(_))
        ));
    }

    #[test]
    fn test_parse_rejects_page_count_mismatch() {
        let mut bytes = MsblImage::from_raw(&sample(10_000), DEFAULT_TARGET)
            .unwrap()
            .to_bytes();
        bytes[68] = 3;
        assert!(matches!(MsblImage::parse(&bytes), Err(Error::InvalidMsbl(_))));
    }

    #[test]
    fn test_trailing_crc_mismatch_detected() {
        let mut bytes = MsblImage::from_raw(&sample(100), DEFAULT_TARGET)
            .unwrap()
            .to_bytes();
        let n = bytes.len();
        bytes[n - 1] ^= 0xFF;
        let parsed = MsblImage::parse(&bytes).unwrap();
        assert!(matches!(
            parsed.verify_trailing_crc(),
            Err(Error::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("app.bin");
        fs::write(&bin, sample(9000)).unwrap();

        let from_bin = MsblImage::load(&bin, DEFAULT_TARGET).unwrap();
        assert_eq!(from_bin.num_pages(), 2);

        let msbl = dir.path().join("app.msbl");
        from_bin
            .write_file(&msbl)
            .unwrap();
        let from_msbl = MsblImage::load(&msbl, DEFAULT_TARGET).unwrap();
        assert_eq!(from_msbl.pages(), from_bin.pages());

        let hex = dir.path().join("app.hex");
        fs::write(&hex, b":00000001FF").unwrap();
        assert!(matches!(
            MsblImage::load(&hex, DEFAULT_TARGET),
            Err(Error::InvalidMsbl(_))
        ));
    }

    #[test]
    fn test_app_header_codec() {
        let header = AppHeader {
            crc32: 0xDEADBEEF,
            length: 0x1234,
            valid_mark: 0x4D41_5849,
            boot_mode: 1,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(AppHeader::from_bytes(&bytes).unwrap(), header);
        assert!(AppHeader::from_bytes(&bytes[..15]).is_err());
    }
}
