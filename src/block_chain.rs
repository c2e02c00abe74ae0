use crate::err::ScanError;
use crate::model::{Block, BlockHash, Height};
use std::collections::HashMap;
use std::fmt;

/// Block metadata: what the chain index keeps once the payload is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_hash: BlockHash,
    pub height: Height,
    pub timestamp: u32,
    pub num_txs: u64,
    pub rawsize: usize,
}

impl BlockInfo {
    pub fn from_block(block: &Block) -> Result<BlockInfo, ScanError> {
        Ok(BlockInfo {
            block_hash: block.block_hash(),
            height: block.height,
            timestamp: block.timestamp(),
            num_txs: block.num_txs()?,
            rawsize: block.rawsize(),
        })
    }
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<BlockInfo #{} {}>", self.height, self.block_hash)
    }
}

/// The longest chain as an in-memory index: dense by height, with lookup by
/// block hash. Forks never enter it.
#[derive(Default)]
pub struct BlockChain {
    infos: Vec<BlockInfo>,
    by_hash: HashMap<BlockHash, usize>,
}

impl BlockChain {
    pub fn new() -> Self {
        BlockChain::default()
    }

    /// Height of the last block; -1 when empty, so the next expected height
    /// is always `height() + 1`.
    pub fn height(&self) -> Height {
        self.infos.len() as Height - 1
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Append the next block of the chain. Heights must be contiguous and
    /// hashes unique.
    pub fn append(&mut self, info: BlockInfo) -> Result<(), ScanError> {
        let expected = self.height() + 1;
        if info.height != expected {
            return Err(ScanError::Corruption(format!(
                "expected block at height {expected}, got {}",
                info.height
            )));
        }
        if self.by_hash.contains_key(&info.block_hash) {
            return Err(ScanError::Corruption(format!(
                "block hash already in chain: {}",
                info.block_hash
            )));
        }
        self.by_hash.insert(info.block_hash, self.infos.len());
        self.infos.push(info);
        Ok(())
    }

    pub fn genesis(&self) -> Option<&BlockInfo> {
        self.infos.first()
    }

    pub fn tip(&self) -> Option<&BlockInfo> {
        self.infos.last()
    }

    pub fn get_by_height(&self, height: Height) -> Option<&BlockInfo> {
        usize::try_from(height).ok().and_then(|i| self.infos.get(i))
    }

    pub fn get_by_hash(&self, hash: &BlockHash) -> Option<&BlockInfo> {
        self.by_hash.get(hash).map(|&i| &self.infos[i])
    }

    pub fn contains_hash(&self, hash: &BlockHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockInfo> {
        self.infos.iter()
    }
}

impl fmt::Display for BlockChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tip() {
            Some(tip) => write!(f, "<BlockChain {} blocks, tip {}>", self.len(), tip.block_hash),
            None => write!(f, "<BlockChain empty>"),
        }
    }
}
