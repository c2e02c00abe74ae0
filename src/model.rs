use crate::codec::{self, Cursor, COINBASE_SPENT_OUTPUT_INDEX, END_OF_DATA_MAGIC, MAGIC};
use crate::err::ScanError;
use bytes::Bytes;
use std::fmt;

/// 0-based distance from genesis along the longest chain, -1 while unknown.
pub type Height = i32;
pub const UNKNOWN_HEIGHT: Height = -1;

pub const BLOCK_HEADER_SIZE: usize = 80;
/// Bytes of framing (magic + size prefix) preceding each stored block.
pub const BLOCK_FRAME_SIZE: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHash(pub [u8; 32]);

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(pub [u8; 32]);

impl BlockHash {
    pub fn hex(&self) -> String {
        codec::hash_hex(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<BlockHash, ScanError> {
        codec::hash_from_hex(s).map(BlockHash)
    }
}

impl TxId {
    pub fn hex(&self) -> String {
        codec::hash_hex(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<TxId, ScanError> {
        codec::hash_from_hex(s).map(TxId)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.hex())
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub script: Bytes,
}

/// What a spend resolved to: the value (and script, if tracked) of the
/// output being consumed, plus the height the output was created at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendingInfo {
    pub value: u64,
    pub script: Option<Box<[u8]>>,
    pub block_height: Height,
}

/// A transaction input. The first input of a block's first tx carries the
/// coinbase sentinels (all-zero txid, index 0xFFFFFFFF) instead of a real
/// previous-output reference, and is decoded as the `Coinbase` variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxInput {
    Coinbase {
        script: Bytes,
        sequence: u32,
    },
    Spending {
        spent_txid: TxId,
        spent_output_idx: u32,
        script: Bytes,
        sequence: u32,
        /// Filled by the spending tracker, absent otherwise.
        spending_info: Option<SpendingInfo>,
    },
}

impl TxInput {
    pub fn is_coinbase(&self) -> bool {
        matches!(self, TxInput::Coinbase { .. })
    }

    pub fn script(&self) -> &Bytes {
        match self {
            TxInput::Coinbase { script, .. } => script,
            TxInput::Spending { script, .. } => script,
        }
    }

    pub fn sequence(&self) -> u32 {
        match self {
            TxInput::Coinbase { sequence, .. } => *sequence,
            TxInput::Spending { sequence, .. } => *sequence,
        }
    }

    pub fn spending_info(&self) -> Option<&SpendingInfo> {
        match self {
            TxInput::Coinbase { .. } => None,
            TxInput::Spending { spending_info, .. } => spending_info.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tx {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
    /// double-SHA256 of the exact byte span this tx was decoded from.
    pub txid: TxId,
    /// Serialized size in bytes.
    pub rawsize: usize,
}

impl Tx {
    /// Decode one transaction from the start of `blob`. Scripts are
    /// zero-copy slices of the given view.
    pub fn decode(blob: &Bytes) -> Result<Tx, ScanError> {
        Self::decode_inner(blob).map_err(|e| match e {
            ScanError::MalformedTx(_) => e,
            other => ScanError::MalformedTx(other.to_string()),
        })
    }

    fn decode_inner(blob: &Bytes) -> Result<Tx, ScanError> {
        let mut cur = Cursor::new(blob);
        let version = cur.u32_le()?;

        let n_in = cur.varint()? as usize;
        // An input serializes to at least 41 bytes, so cap the preallocation
        // by what the buffer could possibly hold.
        let mut inputs = Vec::with_capacity(n_in.min(cur.remaining() / 41 + 1));
        for i in 0..n_in {
            let mut spent_txid = [0u8; 32];
            spent_txid.copy_from_slice(cur.take(32)?);
            let spent_output_idx = cur.u32_le()?;
            let script_len = cur.varint()? as usize;
            let script_start = cur.pos();
            cur.skip(script_len)?;
            let script = blob.slice(script_start..script_start + script_len);
            let sequence = cur.u32_le()?;
            if i == 0 && spent_output_idx == COINBASE_SPENT_OUTPUT_INDEX {
                inputs.push(TxInput::Coinbase { script, sequence });
            } else {
                inputs.push(TxInput::Spending {
                    spent_txid: TxId(spent_txid),
                    spent_output_idx,
                    script,
                    sequence,
                    spending_info: None,
                });
            }
        }

        let n_out = cur.varint()? as usize;
        let mut outputs = Vec::with_capacity(n_out.min(cur.remaining() / 9 + 1));
        for _ in 0..n_out {
            let value = cur.u64_le()?;
            let script_len = cur.varint()? as usize;
            let script_start = cur.pos();
            cur.skip(script_len)?;
            outputs.push(TxOutput {
                value,
                script: blob.slice(script_start..script_start + script_len),
            });
        }

        let locktime = cur.u32_le()?;
        let rawsize = cur.pos();
        let txid = TxId(codec::double_sha256(&blob[..rawsize]));

        Ok(Tx { version, inputs, outputs, locktime, txid, rawsize })
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self.inputs.first(), Some(TxInput::Coinbase { .. }))
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Sum of resolved input values; `None` until every non-coinbase input
    /// carries its spending info.
    pub fn total_input_value(&self) -> Option<u64> {
        let mut total = 0u64;
        for input in &self.inputs {
            match input {
                TxInput::Coinbase { .. } => {}
                TxInput::Spending { spending_info, .. } => total += spending_info.as_ref()?.value,
            }
        }
        Some(total)
    }

    /// Inputs minus outputs. `None` for coinbase txs, unresolved inputs, or
    /// a negative difference.
    pub fn fee(&self) -> Option<u64> {
        if self.is_coinbase() {
            return None;
        }
        self.total_input_value()?.checked_sub(self.total_output_value())
    }
}

impl fmt::Display for Tx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Tx {}{}>", self.txid, if self.is_coinbase() { " {COINBASE}" } else { "" })
    }
}

/// A block: an owned zero-copy view of its payload (header + tx section),
/// the height assigned by the fork resolver, and the memoized header hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    raw: Bytes,
    pub height: Height,
    hash: BlockHash,
}

impl Block {
    pub fn new(raw: Bytes, height: Height) -> Result<Block, ScanError> {
        if raw.len() < BLOCK_HEADER_SIZE {
            return Err(ScanError::Corruption(format!(
                "block payload of {} bytes is shorter than the 80-byte header",
                raw.len()
            )));
        }
        let hash = BlockHash(codec::double_sha256(&raw[..BLOCK_HEADER_SIZE]));
        Ok(Block { raw, height, hash })
    }

    /// Decode one framed block from the start of `blob`.
    ///
    /// Returns `None` past the last written block: on the end-of-data magic,
    /// or when the frame extends beyond the bytes written so far. Any other
    /// magic value is corruption.
    pub fn from_framed(blob: &Bytes, height: Height) -> Result<Option<Block>, ScanError> {
        if blob.len() < BLOCK_FRAME_SIZE {
            return Ok(None);
        }
        let mut cur = Cursor::new(blob);
        let magic = cur.u32_le()?;
        if magic == END_OF_DATA_MAGIC {
            return Ok(None);
        }
        if magic != MAGIC {
            return Err(ScanError::Corruption(format!("bad magic 0x{magic:08x}")));
        }
        let size = cur.u32_le()? as usize;
        if blob.len() < BLOCK_FRAME_SIZE + size {
            return Ok(None);
        }
        let payload = blob.slice(BLOCK_FRAME_SIZE..BLOCK_FRAME_SIZE + size);
        Block::new(payload, height).map(Some)
    }

    pub fn block_hash(&self) -> BlockHash {
        self.hash
    }

    /// Full block payload, header included.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn rawsize(&self) -> usize {
        self.raw.len()
    }

    pub fn header(&self) -> &[u8] {
        &self.raw[..BLOCK_HEADER_SIZE]
    }

    pub fn version(&self) -> u32 {
        Self::u32_at(&self.raw, 0)
    }

    pub fn prev_block_hash(&self) -> BlockHash {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.raw[4..36]);
        BlockHash(hash)
    }

    pub fn merkle_root(&self) -> BlockHash {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.raw[36..68]);
        BlockHash(hash)
    }

    /// Epoch seconds. Only approximately ordered across the chain.
    pub fn timestamp(&self) -> u32 {
        Self::u32_at(&self.raw, 68)
    }

    pub fn bits(&self) -> u32 {
        Self::u32_at(&self.raw, 72)
    }

    pub fn nonce(&self) -> u32 {
        Self::u32_at(&self.raw, 76)
    }

    fn u32_at(raw: &Bytes, offset: usize) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&raw[offset..offset + 4]);
        u32::from_le_bytes(bytes)
    }

    pub fn num_txs(&self) -> Result<u64, ScanError> {
        let mut cur = Cursor::new(&self.raw[BLOCK_HEADER_SIZE..]);
        cur.varint()
    }

    /// The block's transactions as a lazy, restartable sequence: every
    /// `iter()` re-parses the tx section from its start, so nothing decoded
    /// is retained between traversals.
    pub fn txs(&self) -> Result<BlockTxs, ScanError> {
        let tail = self.raw.slice(BLOCK_HEADER_SIZE..);
        let mut cur = Cursor::new(&tail);
        let num_txs = cur.varint()?;
        let consumed = cur.pos();
        Ok(BlockTxs { blob: tail.slice(consumed..), num_txs })
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Block #{} {}>", self.height, self.hash)
    }
}

pub struct BlockTxs {
    blob: Bytes,
    num_txs: u64,
}

impl BlockTxs {
    pub fn len(&self) -> u64 {
        self.num_txs
    }

    pub fn is_empty(&self) -> bool {
        self.num_txs == 0
    }

    /// A fresh decoding cursor over the tx section.
    pub fn iter(&self) -> TxIter {
        TxIter { blob: self.blob.clone(), offset: 0, remaining: self.num_txs }
    }
}

pub struct TxIter {
    blob: Bytes,
    offset: usize,
    remaining: u64,
}

impl Iterator for TxIter {
    type Item = Result<Tx, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match Tx::decode(&self.blob.slice(self.offset..)) {
            Ok(tx) => {
                self.offset += tx.rawsize;
                self.remaining -= 1;
                Some(Ok(tx))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The mainnet genesis block, framed exactly as bitcoind stores it.
    const GENESIS_BLOCK_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c01010000000100000000000000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";

    const GENESIS_BLOCK_HASH_HEX: &str =
        "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f";
    const GENESIS_COINBASE_TXID_HEX: &str =
        "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

    fn genesis_framed() -> Bytes {
        let payload = hex::decode(GENESIS_BLOCK_HEX).unwrap();
        let mut framed = Vec::with_capacity(BLOCK_FRAME_SIZE + payload.len());
        framed.extend_from_slice(&MAGIC.to_le_bytes());
        framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        framed.extend_from_slice(&payload);
        Bytes::from(framed)
    }

    #[test]
    fn genesis_block_hash_matches_the_node() {
        let block = Block::from_framed(&genesis_framed(), 0).unwrap().unwrap();
        assert_eq!(block.block_hash().hex(), GENESIS_BLOCK_HASH_HEX);
        assert_eq!(block.prev_block_hash(), BlockHash(codec::GENESIS_PREV_BLOCK_HASH));
        assert_eq!(block.timestamp(), 1231006505);
        assert_eq!(block.version(), 1);
        assert_eq!(block.num_txs().unwrap(), 1);
        assert_eq!(block.rawsize(), 285);
    }

    #[test]
    fn genesis_coinbase_decodes() {
        let block = Block::from_framed(&genesis_framed(), 0).unwrap().unwrap();
        let txs = block.txs().unwrap();
        assert_eq!(txs.len(), 1);
        let tx = txs.iter().next().unwrap().unwrap();
        assert_eq!(tx.txid.hex(), GENESIS_COINBASE_TXID_HEX);
        assert!(tx.is_coinbase());
        assert_eq!(tx.inputs.len(), 1);
        assert!(tx.inputs[0].is_coinbase());
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, 5_000_000_000);
        // The lone tx's id doubles as the merkle root.
        assert_eq!(tx.txid.0, block.merkle_root().0);
    }

    #[test]
    fn txs_iteration_is_restartable() {
        let block = Block::from_framed(&genesis_framed(), 0).unwrap().unwrap();
        let txs = block.txs().unwrap();
        let first: Vec<Tx> = txs.iter().map(|t| t.unwrap()).collect();
        let second: Vec<Tx> = txs.iter().map(|t| t.unwrap()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn decoding_is_idempotent() {
        let a = Block::from_framed(&genesis_framed(), 0).unwrap().unwrap();
        let b = Block::from_framed(&genesis_framed(), 0).unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.block_hash(), b.block_hash());
    }

    #[test]
    fn framing_sentinels() {
        // End-of-data magic means "no block".
        let padded = Bytes::from(vec![0u8; 64]);
        assert!(Block::from_framed(&padded, UNKNOWN_HEIGHT).unwrap().is_none());

        // A partially written frame is not corruption either.
        let full = genesis_framed();
        let partial = full.slice(..full.len() - 10);
        assert!(Block::from_framed(&partial, UNKNOWN_HEIGHT).unwrap().is_none());

        // Any other magic is.
        let mut garbled = full.to_vec();
        garbled[0] ^= 0xFF;
        let err = Block::from_framed(&Bytes::from(garbled), UNKNOWN_HEIGHT).unwrap_err();
        assert!(matches!(err, ScanError::Corruption(msg) if msg.contains("magic")));
    }

    #[test]
    fn truncated_tx_is_malformed() {
        let block = Block::from_framed(&genesis_framed(), 0).unwrap().unwrap();
        let tx_section = block.raw().slice(BLOCK_HEADER_SIZE + 1..);
        let truncated = tx_section.slice(..tx_section.len() - 5);
        assert!(matches!(Tx::decode(&truncated), Err(ScanError::MalformedTx(_))));
    }

    #[test]
    fn only_the_first_input_becomes_coinbase() {
        // version | 2 inputs (the second with the sentinel index) | 0 outputs | locktime
        let mut raw = Vec::new();
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.push(2);
        for _ in 0..2 {
            raw.extend_from_slice(&[0u8; 32]);
            raw.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
            raw.push(0);
            raw.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        }
        raw.push(0);
        raw.extend_from_slice(&0u32.to_le_bytes());

        let tx = Tx::decode(&Bytes::from(raw)).unwrap();
        assert!(tx.inputs[0].is_coinbase());
        assert!(!tx.inputs[1].is_coinbase());
    }

    #[test]
    fn fee_accounting() {
        let mut tx = Tx {
            version: 1,
            inputs: vec![TxInput::Spending {
                spent_txid: TxId([9u8; 32]),
                spent_output_idx: 0,
                script: Bytes::new(),
                sequence: 0xFFFF_FFFF,
                spending_info: None,
            }],
            outputs: vec![TxOutput { value: 90, script: Bytes::new() }],
            locktime: 0,
            txid: TxId([1u8; 32]),
            rawsize: 0,
        };
        assert_eq!(tx.total_input_value(), None);
        assert_eq!(tx.fee(), None);

        if let TxInput::Spending { spending_info, .. } = &mut tx.inputs[0] {
            *spending_info = Some(SpendingInfo { value: 100, script: None, block_height: 0 });
        }
        assert_eq!(tx.total_input_value(), Some(100));
        assert_eq!(tx.fee(), Some(10));
    }
}
