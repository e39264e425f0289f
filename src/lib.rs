//! Toolkit for Allwinner IMAGEWTY firmware images as produced for the
//! LiveSuit/PhoenixSuit flashing workflow: container parsing, RC6 envelope
//! decryption, extraction, and codecs for the DragonEx `image.cfg` and
//! `sys_partition.fex` companion formats.

pub mod cfg;
pub mod formats;
pub mod partition;
pub mod utils;

use thiserror::Error;

/// Errors shared by the container codec and the text-format parsers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The (decrypted) header does not start with the `IMAGEWTY` magic.
    #[error("bad magic, not an IMAGEWTY image")]
    BadMagic,

    #[error("unsupported header version 0x{0:04x}")]
    UnsupportedVersion(u32),

    #[error("malformed image header: {0}")]
    MalformedHeader(String),

    #[error("corrupt file table: {0}")]
    CorruptFileTable(String),

    #[error("parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
