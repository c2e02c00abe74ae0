use crate::err::ScanError;
use byteorder::{ByteOrder, LittleEndian};
use sha2::{Digest, Sha256};

/// Frame marker preceding every block in a blk*.dat file (little-endian on disk).
pub const MAGIC: u32 = 0xD9B4_BEF9;
/// A zero magic means the rest of the file is preallocated, unwritten space.
pub const END_OF_DATA_MAGIC: u32 = 0;

pub const SATOSHIS_IN_ONE: u64 = 100_000_000;
pub const COINBASE_SPENT_OUTPUT_INDEX: u32 = 0xFFFF_FFFF;
pub const GENESIS_PREV_BLOCK_HASH: [u8; 32] = [0u8; 32];

/// Bounds-checked reader over a borrowed byte view. All multi-byte reads are
/// little-endian, per the wire format.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ScanError> {
        if self.remaining() < n {
            return Err(ScanError::Corruption(format!(
                "unexpected end of data at byte {} (wanted {} more, have {})",
                self.pos,
                n,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), ScanError> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, ScanError> {
        self.take(1).map(|b| b[0])
    }

    pub fn u16_le(&mut self) -> Result<u16, ScanError> {
        self.take(2).map(LittleEndian::read_u16)
    }

    pub fn u32_le(&mut self) -> Result<u32, ScanError> {
        self.take(4).map(LittleEndian::read_u32)
    }

    pub fn u64_le(&mut self) -> Result<u64, ScanError> {
        self.take(8).map(LittleEndian::read_u64)
    }

    /// Bitcoin's compact integer: a 1-byte marker selecting 1, 3, 5 or 9
    /// total bytes.
    pub fn varint(&mut self) -> Result<u64, ScanError> {
        let marker = self.take(1).map_err(|_| ScanError::MalformedVarint)?[0];
        match marker {
            0xFD => self.take(2).map(|b| LittleEndian::read_u16(b) as u64),
            0xFE => self.take(4).map(|b| LittleEndian::read_u32(b) as u64),
            0xFF => self.take(8).map(LittleEndian::read_u64),
            v => Ok(v as u64),
        }
        .map_err(|_| ScanError::MalformedVarint)
    }
}

pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Render a 32-byte hash as hex of the reversed bytes (node display convention).
pub fn hash_hex(hash: &[u8; 32]) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}

/// Parse the node display convention back into hash bytes.
pub fn hash_from_hex(s: &str) -> Result<[u8; 32], ScanError> {
    let decoded = hex::decode(s)?;
    let mut hash: [u8; 32] = decoded
        .try_into()
        .map_err(|_| ScanError::new("hash hex must decode to 32 bytes"))?;
    hash.reverse();
    Ok(hash)
}

pub fn satoshi_to_btc(satoshis: u64) -> f64 {
    satoshis as f64 / SATOSHIS_IN_ONE as f64
}
