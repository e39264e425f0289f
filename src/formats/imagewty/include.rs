use binrw::BinRead;

use crate::utils::common;

pub const IMAGEWTY_MAGIC: &[u8; 8] = b"IMAGEWTY";

/// Format version conventionally written by the producer.
pub const IMAGEWTY_VERSION: u32 = 0x0010_0234;

pub const HEADER_VERSION_V1: u32 = 0x0100;
pub const HEADER_VERSION_V3: u32 = 0x0300;

/// The image header and every file header occupy 1024 bytes on disk.
pub const IMAGE_HEADER_LEN: usize = 1024;
pub const FILE_HEADER_LEN: usize = 1024;

pub const MAINTYPE_LEN: usize = 8;
pub const SUBTYPE_LEN: usize = 16;
pub const FILENAME_LEN: usize = 256;

/// Stored payloads are rounded up to this alignment.
pub const STORED_ALIGN: u32 = 512;

#[derive(BinRead, Debug, Clone)]
#[br(little)]
pub struct ImageHeader {
    pub magic: [u8; 8],
    /// 0x0100 or 0x0300; selects the tail layout.
    pub header_version: u32,
    pub header_size: u32,
    pub ram_base: u32,
    pub version: u32,
    /// Total on-disk size, rounded up to 256 bytes by the producer.
    pub image_size: u32,
    /// Always 1024.
    pub image_header_size: u32,
    #[br(args(header_version))]
    pub info: HeaderInfo,
}

#[derive(BinRead, Debug, Clone)]
#[br(little, import(version: u32))]
pub enum HeaderInfo {
    #[br(pre_assert(version == HEADER_VERSION_V3))]
    V3 {
        unknown: u32,
        pid: u32,
        vid: u32,
        hardware_id: u32,
        firmware_id: u32,
        val1: u32,
        val1024: u32,
        num_files: u32,
        val1024_2: u32,
        val0: u32,
        val0_2: u32,
        val0_3: u32,
        val0_4: u32,
    },
    #[br(pre_assert(version == HEADER_VERSION_V1))]
    V1 {
        pid: u32,
        vid: u32,
        hardware_id: u32,
        firmware_id: u32,
        val1: u32,
        val1024: u32,
        num_files: u32,
        val1024_2: u32,
        val0: u32,
        val0_2: u32,
        val0_3: u32,
        val0_4: u32,
    },
}

impl ImageHeader {
    pub fn num_files(&self) -> u32 {
        match self.info {
            HeaderInfo::V1 { num_files, .. } | HeaderInfo::V3 { num_files, .. } => num_files,
        }
    }

    pub fn pid(&self) -> u32 {
        match self.info {
            HeaderInfo::V1 { pid, .. } | HeaderInfo::V3 { pid, .. } => pid,
        }
    }

    pub fn vid(&self) -> u32 {
        match self.info {
            HeaderInfo::V1 { vid, .. } | HeaderInfo::V3 { vid, .. } => vid,
        }
    }

    pub fn hardware_id(&self) -> u32 {
        match self.info {
            HeaderInfo::V1 { hardware_id, .. } | HeaderInfo::V3 { hardware_id, .. } => hardware_id,
        }
    }

    pub fn firmware_id(&self) -> u32 {
        match self.info {
            HeaderInfo::V1 { firmware_id, .. } | HeaderInfo::V3 { firmware_id, .. } => firmware_id,
        }
    }
}

#[derive(BinRead, Debug, Clone)]
#[br(little, import(version: u32))]
pub struct FileHeader {
    /// Always equal to FILENAME_LEN.
    pub filename_len: u32,
    /// Always 1024.
    pub total_header_size: u32,
    maintype_bytes: [u8; MAINTYPE_LEN],
    subtype_bytes: [u8; SUBTYPE_LEN],
    #[br(args(version))]
    pub info: FileHeaderInfo,
}

#[derive(BinRead, Debug, Clone)]
#[br(little, import(version: u32))]
pub enum FileHeaderInfo {
    #[br(pre_assert(version == HEADER_VERSION_V3))]
    V3 {
        unknown: u32,
        filename: [u8; FILENAME_LEN],
        stored_length: u32,
        pad1: u32,
        original_length: u32,
        pad2: u32,
        offset: u32,
    },
    #[br(pre_assert(version == HEADER_VERSION_V1))]
    V1 {
        unknown_3: u32,
        stored_length: u32,
        original_length: u32,
        offset: u32,
        unknown: u32,
        filename: [u8; FILENAME_LEN],
    },
}

impl FileHeader {
    pub fn maintype(&self) -> String {
        common::string_from_bytes(&self.maintype_bytes)
    }

    pub fn subtype(&self) -> String {
        common::string_from_bytes(&self.subtype_bytes)
    }

    pub fn filename(&self) -> String {
        match &self.info {
            FileHeaderInfo::V1 { filename, .. } | FileHeaderInfo::V3 { filename, .. } => {
                common::string_from_bytes(filename)
            }
        }
    }

    pub fn stored_length(&self) -> u32 {
        match self.info {
            FileHeaderInfo::V1 { stored_length, .. } | FileHeaderInfo::V3 { stored_length, .. } => {
                stored_length
            }
        }
    }

    pub fn original_length(&self) -> u32 {
        match self.info {
            FileHeaderInfo::V1 { original_length, .. }
            | FileHeaderInfo::V3 { original_length, .. } => original_length,
        }
    }

    pub fn offset(&self) -> u32 {
        match self.info {
            FileHeaderInfo::V1 { offset, .. } | FileHeaderInfo::V3 { offset, .. } => offset,
        }
    }
}
