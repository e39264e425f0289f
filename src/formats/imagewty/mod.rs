//! Allwinner IMAGEWTY container codec.
//!
//! An image is a 1024-byte header, a table of 1024-byte file headers, and the
//! stored payloads (each rounded up to 512 bytes). Encrypted images wrap all
//! three regions in RC6 with fixed domain keys; encryption is detected by the
//! magic probe, there is no flag for it anywhere in the format.

mod include;
pub mod unpack;

pub use include::*;

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use binrw::BinReaderExt;

use crate::utils::crypto::{self, CipherSet};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Run the RC6 decryption passes on encrypted images. With this off, an
    /// encrypted image fails the magic check after the (skipped) header pass.
    pub decrypt: bool,
    pub verbose: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            decrypt: true,
            verbose: false,
        }
    }
}

/// One logical file in the image. Offsets are absolute byte positions from
/// the start of the image buffer; the payload view is obtained through
/// [`ImageFile::file_bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub filename: String,
    pub maintype: String,
    pub subtype: String,
    /// On-disk size, rounded up to 512 bytes.
    pub stored_length: u32,
    /// Logical payload size.
    pub original_length: u32,
    pub offset: u32,
}

/// A fully loaded (and, when requested, decrypted) image.
///
/// The buffer is mutated exactly once by the decryption passes during `load`
/// and is read-only afterwards.
pub struct ImageFile {
    data: Vec<u8>,
    header: ImageHeader,
    entries: Vec<FileEntry>,
    is_encrypted: bool,
    verbose: bool,
}

impl ImageFile {
    pub fn load_from_file<P: AsRef<Path>>(path: P, options: &LoadOptions) -> Result<Self> {
        let data = fs::read(path)?;
        Self::load(data, options)
    }

    /// Parse an image from a fully materialized buffer.
    ///
    /// The three decryption phases run in a fixed order: header, file-header
    /// table, then file contents. The per-entry `stored_length` values live
    /// inside the table region, so they are only legible once the table pass
    /// has completed.
    pub fn load(mut data: Vec<u8>, options: &LoadOptions) -> Result<Self> {
        if data.len() < IMAGE_HEADER_LEN {
            return Err(Error::MalformedHeader(format!(
                "image is {} bytes, smaller than one header",
                data.len()
            )));
        }

        let ciphers = CipherSet::new();

        // Evaluated before any decryption; a plaintext magic means the whole
        // image is taken as plaintext.
        let is_encrypted = data[..IMAGEWTY_MAGIC.len()] != IMAGEWTY_MAGIC[..];

        if is_encrypted && options.decrypt {
            crypto::rc6_decrypt_in_place(&ciphers.header, &mut data[..IMAGE_HEADER_LEN]);
        }
        if data[..IMAGEWTY_MAGIC.len()] != IMAGEWTY_MAGIC[..] {
            return Err(Error::BadMagic);
        }

        let header_version = u32::from_le_bytes(data[8..12].try_into().unwrap());
        if header_version != HEADER_VERSION_V1 && header_version != HEADER_VERSION_V3 {
            return Err(Error::UnsupportedVersion(header_version));
        }

        let header: ImageHeader = Cursor::new(&data[..IMAGE_HEADER_LEN])
            .read_le()
            .map_err(|e| Error::MalformedHeader(e.to_string()))?;

        if options.verbose && header.image_size as usize != data.len() {
            println!(
                "[i] header claims {} bytes, image is {} bytes",
                header.image_size,
                data.len()
            );
        }

        let num_files = header.num_files() as usize;
        let table_end = IMAGE_HEADER_LEN + num_files * FILE_HEADER_LEN;
        if data.len() < table_end {
            return Err(Error::MalformedHeader(format!(
                "image is {} bytes but {} file headers need {}",
                data.len(),
                num_files,
                table_end
            )));
        }

        if is_encrypted && options.decrypt {
            crypto::rc6_decrypt_in_place(&ciphers.file_table, &mut data[IMAGE_HEADER_LEN..table_end]);
        }

        let mut entries = Vec::with_capacity(num_files);
        for i in 0..num_files {
            let start = IMAGE_HEADER_LEN + i * FILE_HEADER_LEN;
            let file_header: FileHeader = Cursor::new(&data[start..start + FILE_HEADER_LEN])
                .read_le_args((header_version,))
                .map_err(|e| Error::CorruptFileTable(format!("entry {}: {}", i, e)))?;

            let entry = FileEntry {
                filename: file_header.filename(),
                maintype: file_header.maintype(),
                subtype: file_header.subtype(),
                stored_length: file_header.stored_length(),
                original_length: file_header.original_length(),
                offset: file_header.offset(),
            };

            let span_end = entry.offset as u64 + entry.original_length as u64;
            if span_end > data.len() as u64 {
                return Err(Error::CorruptFileTable(format!(
                    "'{}' spans {}..{}, past the end of the image",
                    entry.filename, entry.offset, span_end
                )));
            }

            if options.verbose {
                println!(
                    "Found: {} ({}, {})",
                    entry.filename, entry.original_length, entry.stored_length
                );
            }
            entries.push(entry);
        }

        // Content pass. The cursor tracks the on-disk layout: it advances by
        // the full stored_length even though only whole 16-byte blocks are
        // ever decrypted.
        let mut at = table_end;
        for entry in &entries {
            let stored = entry.stored_length as usize;
            let region_end = at.checked_add(stored).filter(|&end| end <= data.len());
            let Some(region_end) = region_end else {
                return Err(Error::CorruptFileTable(format!(
                    "'{}' stores {} bytes at {}, past the end of the image",
                    entry.filename, stored, at
                )));
            };
            if is_encrypted && options.decrypt {
                crypto::rc6_decrypt_in_place(&ciphers.file_content, &mut data[at..region_end]);
            }
            at = region_end;
        }

        Ok(ImageFile {
            data,
            header,
            entries,
            is_encrypted,
            verbose: options.verbose,
        })
    }

    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn num_files(&self) -> usize {
        self.entries.len()
    }

    pub fn is_encrypted(&self) -> bool {
        self.is_encrypted
    }

    /// The whole image buffer (decrypted form for encrypted sources).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pid(&self) -> u32 {
        self.header.pid()
    }

    pub fn vid(&self) -> u32 {
        self.header.vid()
    }

    pub fn hardware_id(&self) -> u32 {
        self.header.hardware_id()
    }

    pub fn firmware_id(&self) -> u32 {
        self.header.firmware_id()
    }

    pub fn contains_file(&self, filename: &str) -> bool {
        self.find_by_filename(filename).is_some()
    }

    pub fn find_by_filename(&self, filename: &str) -> Option<&FileEntry> {
        self.entries.iter().find(|e| e.filename == filename)
    }

    /// All entries with the given subtype, in table order.
    pub fn find_by_subtype(&self, subtype: &str) -> Vec<&FileEntry> {
        self.entries.iter().filter(|e| e.subtype == subtype).collect()
    }

    /// The logical payload: exactly `original_length` bytes, without the
    /// 512-byte alignment tail.
    pub fn file_bytes(&self, entry: &FileEntry) -> &[u8] {
        let start = entry.offset as usize;
        &self.data[start..start + entry.original_length as usize]
    }

    /// The raw 1024-byte file header for the entry at `index` (table order).
    pub fn file_header_bytes(&self, index: usize) -> &[u8] {
        let start = IMAGE_HEADER_LEN + index * FILE_HEADER_LEN;
        &self.data[start..start + FILE_HEADER_LEN]
    }

    /// Write the image out in plaintext form: the buffer verbatim for
    /// plaintext sources, the decrypted buffer for encrypted ones. Nothing is
    /// ever re-encrypted here.
    pub fn write_decrypted<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.data)?;
        if self.verbose {
            println!("[i] wrote {} bytes", self.data.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::{self, CipherSet};

    pub(super) struct TestFile {
        pub filename: &'static str,
        pub maintype: &'static str,
        pub subtype: &'static str,
        pub payload: Vec<u8>,
        pub stored_length: Option<u32>,
    }

    impl TestFile {
        pub fn new(
            filename: &'static str,
            maintype: &'static str,
            subtype: &'static str,
            payload: Vec<u8>,
        ) -> Self {
            TestFile {
                filename,
                maintype,
                subtype,
                payload,
                stored_length: None,
            }
        }

        fn stored(&self) -> u32 {
            self.stored_length
                .unwrap_or((self.payload.len() as u32 + STORED_ALIGN - 1) & !(STORED_ALIGN - 1))
        }
    }

    fn put_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_padded(buf: &mut Vec<u8>, s: &str, len: usize) {
        let mut field = vec![0u8; len];
        field[..s.len()].copy_from_slice(s.as_bytes());
        buf.extend_from_slice(&field);
    }

    /// Build a plaintext image for the given header version.
    pub(super) fn build_image(header_version: u32, files: &[TestFile]) -> Vec<u8> {
        let content_start = IMAGE_HEADER_LEN + files.len() * FILE_HEADER_LEN;
        let total: usize =
            content_start + files.iter().map(|f| f.stored() as usize).sum::<usize>();

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(IMAGEWTY_MAGIC);
        put_u32(&mut buf, header_version);
        put_u32(&mut buf, 96); // header_size
        put_u32(&mut buf, 0); // ram_base
        put_u32(&mut buf, IMAGEWTY_VERSION);
        put_u32(&mut buf, total as u32);
        put_u32(&mut buf, IMAGE_HEADER_LEN as u32);
        if header_version == HEADER_VERSION_V3 {
            put_u32(&mut buf, 0); // unknown
        }
        put_u32(&mut buf, 0x1234); // pid
        put_u32(&mut buf, 0x8743); // vid
        put_u32(&mut buf, 0x100); // hardware_id
        put_u32(&mut buf, 0x100); // firmware_id
        put_u32(&mut buf, 1);
        put_u32(&mut buf, 1024);
        put_u32(&mut buf, files.len() as u32);
        put_u32(&mut buf, 1024);
        buf.resize(IMAGE_HEADER_LEN, 0);

        let mut offset = content_start as u32;
        for file in files {
            put_u32(&mut buf, FILENAME_LEN as u32);
            put_u32(&mut buf, FILE_HEADER_LEN as u32);
            put_padded(&mut buf, file.maintype, MAINTYPE_LEN);
            put_padded(&mut buf, file.subtype, SUBTYPE_LEN);
            if header_version == HEADER_VERSION_V3 {
                put_u32(&mut buf, 0); // unknown
                put_padded(&mut buf, file.filename, FILENAME_LEN);
                put_u32(&mut buf, file.stored());
                put_u32(&mut buf, 0);
                put_u32(&mut buf, file.payload.len() as u32);
                put_u32(&mut buf, 0);
                put_u32(&mut buf, offset);
            } else {
                put_u32(&mut buf, 0); // unknown_3
                put_u32(&mut buf, file.stored());
                put_u32(&mut buf, file.payload.len() as u32);
                put_u32(&mut buf, offset);
                put_u32(&mut buf, 0); // unknown
                put_padded(&mut buf, file.filename, FILENAME_LEN);
            }
            let next = (buf.len() + FILE_HEADER_LEN - 1) / FILE_HEADER_LEN * FILE_HEADER_LEN;
            buf.resize(next, 0);
            offset += file.stored();
        }

        for file in files {
            buf.extend_from_slice(&file.payload);
            let padded = buf.len() + (file.stored() as usize - file.payload.len());
            buf.resize(padded, 0);
        }

        assert_eq!(buf.len(), total);
        buf
    }

    /// Apply the producer-side RC6 envelope to a plaintext image.
    pub(super) fn encrypt_image(plain: &[u8], num_files: usize) -> Vec<u8> {
        let ciphers = CipherSet::new();
        let mut data = plain.to_vec();
        let table_end = IMAGE_HEADER_LEN + num_files * FILE_HEADER_LEN;
        crypto::rc6_encrypt_in_place(&ciphers.header, &mut data[..IMAGE_HEADER_LEN]);
        crypto::rc6_encrypt_in_place(&ciphers.file_table, &mut data[IMAGE_HEADER_LEN..table_end]);
        crypto::rc6_encrypt_in_place(&ciphers.file_content, &mut data[table_end..]);
        data
    }

    fn two_file_image() -> Vec<u8> {
        build_image(
            HEADER_VERSION_V1,
            &[
                TestFile::new("/boot.fex", "RFSFAT16", "BOOT", b"seventeen bytes!!".to_vec()),
                TestFile::new(
                    "/sys_partition.fex",
                    "RFSFAT16",
                    "SYS_PART",
                    vec![0x5a; 100],
                ),
            ],
        )
    }

    #[test]
    fn load_plaintext_v1() {
        let data = two_file_image();
        let image = ImageFile::load(data.clone(), &LoadOptions::default()).unwrap();

        assert!(!image.is_encrypted());
        assert_eq!(image.num_files(), 2);
        assert_eq!(image.pid(), 0x1234);
        assert_eq!(image.vid(), 0x8743);

        let boot = image.find_by_filename("/boot.fex").unwrap();
        assert_eq!(boot.offset, 3072);
        assert_eq!(boot.original_length, 17);
        assert_eq!(image.file_bytes(boot), b"seventeen bytes!!");

        let part = image.find_by_filename("/sys_partition.fex").unwrap();
        assert_eq!(part.offset, 3584);
        assert_eq!(image.file_bytes(part), &vec![0x5a; 100][..]);
    }

    #[test]
    fn structural_invariants_hold() {
        let data = two_file_image();
        let image = ImageFile::load(data, &LoadOptions::default()).unwrap();

        assert!(image.data().len() >= IMAGE_HEADER_LEN + image.num_files() * FILE_HEADER_LEN);
        for entry in image.entries() {
            assert_eq!(entry.stored_length % STORED_ALIGN, 0);
            assert!(entry.stored_length >= entry.original_length);
            assert!(
                entry.offset as usize + entry.original_length as usize <= image.data().len()
            );
        }
    }

    #[test]
    fn plaintext_writeback_is_identity() {
        let data = two_file_image();
        let image = ImageFile::load(data.clone(), &LoadOptions::default()).unwrap();
        let mut out = Vec::new();
        image.write_decrypted(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn load_encrypted_matches_plaintext_directory() {
        let plain = two_file_image();
        let enveloped = encrypt_image(&plain, 2);
        assert_ne!(&enveloped[..8], IMAGEWTY_MAGIC);

        let image = ImageFile::load(enveloped, &LoadOptions::default()).unwrap();
        assert!(image.is_encrypted());

        let reference = ImageFile::load(plain.clone(), &LoadOptions::default()).unwrap();
        assert_eq!(image.entries(), reference.entries());
        let boot = image.find_by_filename("/boot.fex").unwrap();
        assert_eq!(image.file_bytes(boot), b"seventeen bytes!!");

        // The decrypted writeback is the original plaintext, and reloading it
        // reports a plaintext image with the same directory.
        let mut out = Vec::new();
        image.write_decrypted(&mut out).unwrap();
        assert_eq!(out, plain);
        let reloaded = ImageFile::load(out, &LoadOptions::default()).unwrap();
        assert!(!reloaded.is_encrypted());
        assert_eq!(reloaded.entries(), image.entries());
    }

    #[test]
    fn encrypted_without_decrypt_fails_magic_check() {
        let enveloped = encrypt_image(&two_file_image(), 2);
        let options = LoadOptions {
            decrypt: false,
            ..LoadOptions::default()
        };
        match ImageFile::load(enveloped, &options) {
            Err(Error::BadMagic) => {}
            other => panic!("expected BadMagic, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn garbage_magic_fails_after_header_decryption() {
        let mut data = two_file_image();
        data[..8].copy_from_slice(b"NOTMAGIC");
        match ImageFile::load(data, &LoadOptions::default()) {
            Err(Error::BadMagic) => {}
            other => panic!("expected BadMagic, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unsupported_header_version() {
        let mut data = two_file_image();
        data[8..12].copy_from_slice(&0x0200u32.to_le_bytes());
        match ImageFile::load(data, &LoadOptions::default()) {
            Err(Error::UnsupportedVersion(0x0200)) => {}
            other => panic!("expected UnsupportedVersion, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn undersized_buffer_is_malformed() {
        match ImageFile::load(vec![0u8; 100], &LoadOptions::default()) {
            Err(Error::MalformedHeader(_)) => {}
            other => panic!("expected MalformedHeader, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn truncated_file_table_is_malformed() {
        let data = two_file_image();
        let truncated = data[..IMAGE_HEADER_LEN + FILE_HEADER_LEN].to_vec();
        match ImageFile::load(truncated, &LoadOptions::default()) {
            Err(Error::MalformedHeader(_)) => {}
            other => panic!("expected MalformedHeader, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn out_of_range_offset_is_corrupt() {
        let mut data = two_file_image();
        // v1 entry 0: offset lives 44 bytes into the file header.
        let at = IMAGE_HEADER_LEN + 44;
        data[at..at + 4].copy_from_slice(&0x7fff_0000u32.to_le_bytes());
        match ImageFile::load(data, &LoadOptions::default()) {
            Err(Error::CorruptFileTable(_)) => {}
            other => panic!("expected CorruptFileTable, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn stored_region_overrun_is_corrupt() {
        let mut data = two_file_image();
        // Entry 0 stored_length at offset 36; make it overrun the buffer
        // while keeping offset/original_length valid.
        let at = IMAGE_HEADER_LEN + 36;
        data[at..at + 4].copy_from_slice(&0x0010_0000u32.to_le_bytes());
        match ImageFile::load(data, &LoadOptions::default()) {
            Err(Error::CorruptFileTable(_)) => {}
            other => panic!("expected CorruptFileTable, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn v3_alignment_tail_is_discarded() {
        let mut file = TestFile::new("/boot.fex", "12345678", "1234567890123456", vec![0xa5; 513]);
        file.stored_length = Some(1024);
        let data = build_image(HEADER_VERSION_V3, &[file]);

        let image = ImageFile::load(data, &LoadOptions::default()).unwrap();
        let entry = image.find_by_filename("/boot.fex").unwrap();
        assert_eq!(entry.stored_length, 1024);
        assert_eq!(entry.original_length, 513);
        assert_eq!(image.file_bytes(entry).len(), 513);
        assert!(image.file_bytes(entry).iter().all(|&b| b == 0xa5));
    }

    #[test]
    fn v3_encrypted_roundtrip() {
        let plain = build_image(
            HEADER_VERSION_V3,
            &[TestFile::new("/u-boot.fex", "12345678", "UBOOT", vec![7u8; 700])],
        );
        let image = ImageFile::load(encrypt_image(&plain, 1), &LoadOptions::default()).unwrap();
        assert!(image.is_encrypted());
        let entry = image.find_by_filename("/u-boot.fex").unwrap();
        assert_eq!(image.file_bytes(entry), &vec![7u8; 700][..]);
    }

    #[test]
    fn subtype_lookup_preserves_table_order() {
        let data = build_image(
            HEADER_VERSION_V1,
            &[
                TestFile::new("/a.fex", "COMMON", "FEX", vec![1]),
                TestFile::new("/b.fex", "COMMON", "OTHER", vec![2]),
                TestFile::new("/c.fex", "COMMON", "FEX", vec![3]),
            ],
        );
        let image = ImageFile::load(data, &LoadOptions::default()).unwrap();

        let matches = image.find_by_subtype("FEX");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].filename, "/a.fex");
        assert_eq!(matches[1].filename, "/c.fex");

        assert!(image.contains_file("/b.fex"));
        assert!(!image.contains_file("/missing.fex"));
        assert!(image.find_by_filename("/missing.fex").is_none());
    }

    #[test]
    fn file_header_bytes_returns_raw_block() {
        let data = two_file_image();
        let image = ImageFile::load(data.clone(), &LoadOptions::default()).unwrap();
        assert_eq!(
            image.file_header_bytes(1),
            &data[IMAGE_HEADER_LEN + FILE_HEADER_LEN..IMAGE_HEADER_LEN + 2 * FILE_HEADER_LEN]
        );
    }
}
