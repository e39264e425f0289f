//! Fixed cipher contexts for the IMAGEWTY envelope.
//!
//! The envelope uses three domain-separated RC6 keys (header, file-header
//! table, file contents) plus a Twofish-256 context that the format reserves
//! for non-`.fex` payload content. All keys are constant across images.

use twofish::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use twofish::Twofish;

use crate::utils::rc6::{Rc6, BLOCK_LEN, KEY_LEN};

/// RC6 key for the first 1024 bytes of the image: 31 x 0x00 then 'i'.
pub fn header_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[KEY_LEN - 1] = b'i';
    key
}

/// RC6 key for the file-header table: 31 x 0x01 then 'm'.
pub fn file_table_key() -> [u8; KEY_LEN] {
    let mut key = [1u8; KEY_LEN];
    key[KEY_LEN - 1] = b'm';
    key
}

/// RC6 key for file contents: 31 x 0x02 then 'g'.
pub fn file_content_key() -> [u8; KEY_LEN] {
    let mut key = [2u8; KEY_LEN];
    key[KEY_LEN - 1] = b'g';
    key
}

/// Twofish-256 key: k[0]=5, k[1]=4, k[i]=k[i-2]+k[i-1] with wrapping u8 adds.
pub fn twofish_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[0] = 5;
    key[1] = 4;
    for i in 2..KEY_LEN {
        key[i] = key[i - 2].wrapping_add(key[i - 1]);
    }
    key
}

/// All cipher contexts needed for one image, expanded once.
pub struct CipherSet {
    pub header: Rc6,
    pub file_table: Rc6,
    pub file_content: Rc6,
    /// Reserved for non-`.fex` payload content; not driven by the decode path.
    pub content_twofish: Twofish,
}

impl CipherSet {
    pub fn new() -> Self {
        CipherSet {
            header: Rc6::new(&header_key()),
            file_table: Rc6::new(&file_table_key()),
            file_content: Rc6::new(&file_content_key()),
            content_twofish: Twofish::new(&twofish_key().into()),
        }
    }
}

impl Default for CipherSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrypt whole 16-byte blocks in place; bytes past the last full block are
/// left unchanged. Returns the number of bytes processed.
pub fn rc6_decrypt_in_place(ctx: &Rc6, data: &mut [u8]) -> usize {
    for chunk in data.chunks_exact_mut(BLOCK_LEN) {
        let block: &mut [u8; BLOCK_LEN] = chunk.try_into().unwrap();
        ctx.decrypt_block(block);
    }
    data.len() / BLOCK_LEN * BLOCK_LEN
}

/// Encrypt whole 16-byte blocks in place; bytes past the last full block are
/// left unchanged. Returns the number of bytes processed.
pub fn rc6_encrypt_in_place(ctx: &Rc6, data: &mut [u8]) -> usize {
    for chunk in data.chunks_exact_mut(BLOCK_LEN) {
        let block: &mut [u8; BLOCK_LEN] = chunk.try_into().unwrap();
        ctx.encrypt_block(block);
    }
    data.len() / BLOCK_LEN * BLOCK_LEN
}

pub fn twofish_decrypt_in_place(ctx: &Twofish, data: &mut [u8]) -> usize {
    for chunk in data.chunks_exact_mut(BLOCK_LEN) {
        ctx.decrypt_block(GenericArray::from_mut_slice(chunk));
    }
    data.len() / BLOCK_LEN * BLOCK_LEN
}

pub fn twofish_encrypt_in_place(ctx: &Twofish, data: &mut [u8]) -> usize {
    for chunk in data.chunks_exact_mut(BLOCK_LEN) {
        ctx.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    data.len() / BLOCK_LEN * BLOCK_LEN
}
