//! Value compression for at-rest storage.
//!
//! lz4 block format with the uncompressed size prepended, so decompression
//! needs no side channel. The cache always holds raw bytes; only sub-map
//! contents are compressed.

use crate::error::StoreError;

pub fn compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    lz4::block::compress(data, None, true).map_err(|e| StoreError::Compression(e.to_string()))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    lz4::block::decompress(data, None).map_err(|e| StoreError::Compression(e.to_string()))
}
