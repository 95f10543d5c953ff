// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The plaintext and encrypted block data model, and the per-strategy
//! wire encodings shared by every ORAM level.

use crate::{crypto::Crypto, Address, OramError, Position};
use subtle::{Choice, ConstantTimeEq};

/// The reserved address of dummy blocks. Never a real client address.
pub const DUMMY_ADDRESS: Address = 0;

/// The width in bytes of every fixed-width integer field before encryption.
pub(crate) const FIELD_BYTES: usize = 4;

/// A plaintext logical block: an address and its data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// The logical address, or [`DUMMY_ADDRESS`] for padding blocks.
    pub address: Address,
    /// The block contents. At most the level block size.
    pub data: Vec<u8>,
}

impl Block {
    /// Instantiates a block holding `data` at `address`.
    pub fn new(address: Address, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    /// Returns a padding block carrying the dummy sentinel address.
    pub fn dummy() -> Self {
        Self {
            address: DUMMY_ADDRESS,
            data: Vec::new(),
        }
    }

    /// Constant-time check against the dummy sentinel.
    pub fn ct_is_dummy(&self) -> Choice {
        self.address.ct_eq(&DUMMY_ADDRESS)
    }

    /// Whether this block is a padding block.
    pub fn is_dummy(&self) -> bool {
        self.ct_is_dummy().into()
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::dummy()
    }
}

/// An encrypted block as held by the untrusted store: the address ciphertext
/// and the packed payload ciphertext (data section plus strategy metadata).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncryptedBlock {
    /// Ciphertext of the 4-byte little-endian address.
    pub address_cipher: Vec<u8>,
    /// Ciphertext of the data section, followed by the ciphertext of the
    /// strategy metadata (a leaf for Path ORAM, a matrix cell for Lookahead
    /// ORAM, nothing for Trivial ORAM).
    pub payload_cipher: Vec<u8>,
}

/// A Lookahead ORAM matrix coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Index {
    /// Row within the matrix, `0..matrix_height`.
    pub row: u32,
    /// Column within the matrix, `0..matrix_height`.
    pub col: u32,
}

impl Index {
    /// The sentinel coordinate carried by vacant stash cells.
    pub const NONE: Index = Index {
        row: u32::MAX,
        col: u32::MAX,
    };

    /// The flat slot for this coordinate: `row + col * matrix_height`.
    pub fn flat(&self, matrix_height: u32) -> Position {
        self.row + self.col * matrix_height
    }

    /// The coordinate for a flat slot.
    pub fn from_flat(slot: Position, matrix_height: u32) -> Self {
        Self {
            row: slot % matrix_height,
            col: slot / matrix_height,
        }
    }

    /// Whether this is the vacant-cell sentinel.
    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

pub(crate) fn encode_u32(value: u32) -> [u8; FIELD_BYTES] {
    value.to_le_bytes()
}

pub(crate) fn decode_u32(bytes: &[u8]) -> Result<u32, OramError> {
    let bytes: [u8; FIELD_BYTES] = bytes
        .try_into()
        .map_err(|_| OramError::Protocol("truncated integer field".to_string()))?;
    Ok(u32::from_le_bytes(bytes))
}

/// Encrypts the data section: a 4-byte little-endian length, the data, and
/// zero padding out to the level block size. Every sealed data section of a
/// level therefore has the same ciphertext length regardless of contents.
fn seal_data<C: Crypto>(crypto: &C, data: &[u8], block_size: usize) -> Result<Vec<u8>, OramError> {
    if data.len() > block_size {
        return Err(OramError::InvalidConfiguration(format!(
            "data length {} exceeds the level block size {}",
            data.len(),
            block_size
        )));
    }
    let len: u32 = data.len().try_into()?;
    let mut section = Vec::with_capacity(FIELD_BYTES + block_size);
    section.extend_from_slice(&encode_u32(len));
    section.extend_from_slice(data);
    section.resize(FIELD_BYTES + block_size, 0);
    crypto.encrypt(&section)
}

fn open_data<C: Crypto>(
    crypto: &C,
    ciphertext: &[u8],
    block_size: usize,
) -> Result<Vec<u8>, OramError> {
    let section = crypto.decrypt(ciphertext)?;
    if section.len() != FIELD_BYTES + block_size {
        return Err(OramError::Protocol(format!(
            "data section has {} bytes, expected {}",
            section.len(),
            FIELD_BYTES + block_size
        )));
    }
    let len: usize = decode_u32(&section[..FIELD_BYTES])?.try_into()?;
    if len > block_size {
        return Err(OramError::Protocol(
            "data section length prefix exceeds the block size".to_string(),
        ));
    }
    Ok(section[FIELD_BYTES..FIELD_BYTES + len].to_vec())
}

fn seal_address<C: Crypto>(crypto: &C, address: Address) -> Result<Vec<u8>, OramError> {
    crypto.encrypt(&encode_u32(address))
}

fn open_address<C: Crypto>(crypto: &C, ciphertext: &[u8]) -> Result<Address, OramError> {
    decode_u32(&crypto.decrypt(ciphertext)?)
}

/// The ciphertext length of the sealed data section for a level block size.
fn sealed_data_len<C: Crypto>(crypto: &C, block_size: usize) -> usize {
    FIELD_BYTES + block_size + crypto.overhead()
}

fn split_payload<'a, C: Crypto>(
    crypto: &C,
    payload: &'a [u8],
    block_size: usize,
    metadata_fields: usize,
) -> Result<(&'a [u8], &'a [u8]), OramError> {
    let data_len = sealed_data_len(crypto, block_size);
    let metadata_len = if metadata_fields == 0 {
        0
    } else {
        metadata_fields * FIELD_BYTES + crypto.overhead()
    };
    if payload.len() != data_len + metadata_len {
        return Err(OramError::Protocol(format!(
            "payload has {} bytes, expected {}",
            payload.len(),
            data_len + metadata_len
        )));
    }
    Ok(payload.split_at(data_len))
}

/// Seals a Path ORAM block: `Enc(address) ‖ Enc(data) ‖ Enc(leaf)`.
pub(crate) fn seal_path_block<C: Crypto>(
    crypto: &C,
    block: &Block,
    leaf: Position,
    block_size: usize,
) -> Result<EncryptedBlock, OramError> {
    let mut payload_cipher = seal_data(crypto, &block.data, block_size)?;
    payload_cipher.extend_from_slice(&crypto.encrypt(&encode_u32(leaf))?);
    Ok(EncryptedBlock {
        address_cipher: seal_address(crypto, block.address)?,
        payload_cipher,
    })
}

/// Opens a Path ORAM block, returning the plaintext block and its leaf.
pub(crate) fn open_path_block<C: Crypto>(
    crypto: &C,
    sealed: &EncryptedBlock,
    block_size: usize,
) -> Result<(Block, Position), OramError> {
    let address = open_address(crypto, &sealed.address_cipher)?;
    let (data_cipher, metadata_cipher) =
        split_payload(crypto, &sealed.payload_cipher, block_size, 1)?;
    let data = open_data(crypto, data_cipher, block_size)?;
    let leaf = decode_u32(&crypto.decrypt(metadata_cipher)?)?;
    Ok((Block { address, data }, leaf))
}

/// Seals a Lookahead ORAM block: `Enc(address) ‖ Enc(data) ‖ Enc(row ‖ col)`.
pub(crate) fn seal_lookahead_block<C: Crypto>(
    crypto: &C,
    block: &Block,
    index: Index,
    block_size: usize,
) -> Result<EncryptedBlock, OramError> {
    let mut payload_cipher = seal_data(crypto, &block.data, block_size)?;
    let mut metadata = Vec::with_capacity(2 * FIELD_BYTES);
    metadata.extend_from_slice(&encode_u32(index.row));
    metadata.extend_from_slice(&encode_u32(index.col));
    payload_cipher.extend_from_slice(&crypto.encrypt(&metadata)?);
    Ok(EncryptedBlock {
        address_cipher: seal_address(crypto, block.address)?,
        payload_cipher,
    })
}

/// Opens a Lookahead ORAM block, returning the plaintext block and its cell.
pub(crate) fn open_lookahead_block<C: Crypto>(
    crypto: &C,
    sealed: &EncryptedBlock,
    block_size: usize,
) -> Result<(Block, Index), OramError> {
    let address = open_address(crypto, &sealed.address_cipher)?;
    let (data_cipher, metadata_cipher) =
        split_payload(crypto, &sealed.payload_cipher, block_size, 2)?;
    let data = open_data(crypto, data_cipher, block_size)?;
    let metadata = crypto.decrypt(metadata_cipher)?;
    if metadata.len() != 2 * FIELD_BYTES {
        return Err(OramError::Protocol(
            "matrix cell metadata has the wrong width".to_string(),
        ));
    }
    let index = Index {
        row: decode_u32(&metadata[..FIELD_BYTES])?,
        col: decode_u32(&metadata[FIELD_BYTES..])?,
    };
    Ok((Block { address, data }, index))
}

/// Seals a Trivial ORAM block: `Enc(address) ‖ Enc(data)`.
pub(crate) fn seal_trivial_block<C: Crypto>(
    crypto: &C,
    block: &Block,
    block_size: usize,
) -> Result<EncryptedBlock, OramError> {
    Ok(EncryptedBlock {
        address_cipher: seal_address(crypto, block.address)?,
        payload_cipher: seal_data(crypto, &block.data, block_size)?,
    })
}

/// Opens a Trivial ORAM block.
pub(crate) fn open_trivial_block<C: Crypto>(
    crypto: &C,
    sealed: &EncryptedBlock,
    block_size: usize,
) -> Result<Block, OramError> {
    let address = open_address(crypto, &sealed.address_cipher)?;
    let (data_cipher, _) = split_payload(crypto, &sealed.payload_cipher, block_size, 0)?;
    let data = open_data(crypto, data_cipher, block_size)?;
    Ok(Block { address, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AesGcmCrypto;
    use static_assertions::const_assert_eq;
    use std::mem::size_of;

    const_assert_eq!(size_of::<Address>(), FIELD_BYTES);
    const_assert_eq!(size_of::<Position>(), FIELD_BYTES);

    const BLOCK_SIZE: usize = 16;

    fn test_crypto() -> AesGcmCrypto {
        AesGcmCrypto::derive(b"block encoding tests")
    }

    fn data_of_length(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn path_block_round_trip() {
        let crypto = test_crypto();
        for len in [0, 1, BLOCK_SIZE - 1, BLOCK_SIZE] {
            let block = Block::new(7, data_of_length(len));
            let sealed = seal_path_block(&crypto, &block, 12, BLOCK_SIZE).unwrap();
            let (opened, leaf) = open_path_block(&crypto, &sealed, BLOCK_SIZE).unwrap();
            assert_eq!(opened, block);
            assert_eq!(leaf, 12);
        }
    }

    #[test]
    fn lookahead_block_round_trip() {
        let crypto = test_crypto();
        for len in [0, 1, BLOCK_SIZE - 1, BLOCK_SIZE] {
            let block = Block::new(3, data_of_length(len));
            let index = Index { row: 2, col: 5 };
            let sealed = seal_lookahead_block(&crypto, &block, index, BLOCK_SIZE).unwrap();
            let (opened, opened_index) = open_lookahead_block(&crypto, &sealed, BLOCK_SIZE).unwrap();
            assert_eq!(opened, block);
            assert_eq!(opened_index, index);
        }
    }

    #[test]
    fn trivial_block_round_trip() {
        let crypto = test_crypto();
        for len in [0, 1, BLOCK_SIZE - 1, BLOCK_SIZE] {
            let block = Block::new(9, data_of_length(len));
            let sealed = seal_trivial_block(&crypto, &block, BLOCK_SIZE).unwrap();
            let opened = open_trivial_block(&crypto, &sealed, BLOCK_SIZE).unwrap();
            assert_eq!(opened, block);
        }
    }

    #[test]
    fn sealed_length_is_data_independent() {
        let crypto = test_crypto();
        let short = seal_trivial_block(&crypto, &Block::new(1, vec![1]), BLOCK_SIZE).unwrap();
        let full =
            seal_trivial_block(&crypto, &Block::new(2, data_of_length(BLOCK_SIZE)), BLOCK_SIZE)
                .unwrap();
        let dummy = seal_trivial_block(&crypto, &Block::dummy(), BLOCK_SIZE).unwrap();
        assert_eq!(short.payload_cipher.len(), full.payload_cipher.len());
        assert_eq!(short.address_cipher.len(), full.address_cipher.len());
        assert_eq!(dummy.payload_cipher.len(), full.payload_cipher.len());
    }

    #[test]
    fn oversized_data_is_rejected() {
        let crypto = test_crypto();
        let block = Block::new(1, data_of_length(BLOCK_SIZE + 1));
        assert!(matches!(
            seal_trivial_block(&crypto, &block, BLOCK_SIZE),
            Err(OramError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn dummy_sentinel() {
        assert!(Block::dummy().is_dummy());
        assert!(!Block::new(1, Vec::new()).is_dummy());
        assert!(Index::NONE.is_none());
    }

    #[test]
    fn index_flattening_round_trip() {
        let matrix_height = 6;
        for slot in 0..36 {
            let index = Index::from_flat(slot, matrix_height);
            assert_eq!(index.flat(matrix_height), slot);
            assert!(index.row < matrix_height);
            assert!(index.col < matrix_height);
        }
    }
}
