use crate::codec::GENESIS_PREV_BLOCK_HASH;
use crate::err::ScanError;
use crate::info;
use crate::model::{Block, BlockHash, Height};
use std::collections::{HashMap, VecDeque};

/// Start/stop bounds for the blocks to include. Start is inclusive, stop is
/// exclusive. Block timestamps are only approximately ordered, so the time
/// bounds behave like the height bounds: the start bound gates until the
/// first included block, the stop bound ends the stream when first crossed.
#[derive(Debug, Clone, Default)]
pub struct BlockFilter {
    pub start_height: Option<Height>,
    pub stop_height: Option<Height>,
    pub start_time: Option<u32>,
    pub stop_time: Option<u32>,
}

enum FilterAction {
    Include,
    Skip,
    Stop,
}

/// A BlockFilter along with the state needed to apply it.
struct WorkingFilter {
    filter: BlockFilter,
    started: bool,
    ended: bool,
}

impl WorkingFilter {
    fn new(filter: BlockFilter) -> Self {
        WorkingFilter { filter, started: false, ended: false }
    }

    fn check(&mut self, block: &Block) -> FilterAction {
        if self.ended {
            return FilterAction::Stop;
        }
        if let Some(stop) = self.filter.stop_height {
            if block.height >= stop {
                self.ended = true;
                return FilterAction::Stop;
            }
        }
        if let Some(stop) = self.filter.stop_time {
            if block.timestamp() >= stop {
                self.ended = true;
                return FilterAction::Stop;
            }
        }
        if !self.started {
            if let Some(start) = self.filter.start_height {
                if block.height < start {
                    return FilterAction::Skip;
                }
            }
            if let Some(start) = self.filter.start_time {
                if block.timestamp() < start {
                    return FilterAction::Skip;
                }
            }
        }
        self.started = true;
        FilterAction::Include
    }
}

/// Reorders storage-order blocks into a topological order: a block is never
/// yielded before its parent. Blocks from competing forks interleave in
/// whatever order the files provide them. Heights are assigned here
/// (genesis parent is the all-zeros sentinel, genesis is height 0).
pub struct TopologicalBlocks<I> {
    inner: I,
    height_by_hash: HashMap<BlockHash, Height>,
    orphans: HashMap<BlockHash, Vec<Block>>,
    ready: VecDeque<Block>,
    done: bool,
}

impl<I: Iterator<Item = Result<Block, ScanError>>> TopologicalBlocks<I> {
    pub fn new(inner: I) -> Self {
        // Seed the sentinel so genesis links like any other block.
        let mut height_by_hash = HashMap::new();
        height_by_hash.insert(BlockHash(GENESIS_PREV_BLOCK_HASH), -1);
        TopologicalBlocks { inner, height_by_hash, orphans: HashMap::new(), ready: VecDeque::new(), done: false }
    }

    fn absorb(&mut self, block: Block) -> Result<(), ScanError> {
        let hash = block.block_hash();
        if self.height_by_hash.contains_key(&hash) {
            return Err(ScanError::Corruption(format!("block {hash} seen twice in the parent chain")));
        }
        match self.height_by_hash.get(&block.prev_block_hash()) {
            Some(&parent_height) => self.link(block, parent_height + 1),
            None => self
                .orphans
                .entry(block.prev_block_hash())
                .or_default()
                .push(block),
        }
        Ok(())
    }

    /// Assign the height, queue the block, and walk every dependent that was
    /// waiting on it.
    fn link(&mut self, block: Block, height: Height) {
        let mut pending = vec![(block, height)];
        while let Some((mut block, height)) = pending.pop() {
            block.height = height;
            let hash = block.block_hash();
            self.height_by_hash.insert(hash, height);
            self.ready.push_back(block);
            if let Some(children) = self.orphans.remove(&hash) {
                for child in children {
                    pending.push((child, height + 1));
                }
            }
        }
    }
}

impl<I: Iterator<Item = Result<Block, ScanError>>> Iterator for TopologicalBlocks<I> {
    type Item = Result<Block, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(block) = self.ready.pop_front() {
                return Some(Ok(block));
            }
            if self.done {
                return None;
            }
            match self.inner.next() {
                None => self.done = true,
                Some(Err(e)) => return Some(Err(e.into_stream())),
                Some(Ok(block)) => {
                    if let Err(e) = self.absorb(block) {
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}

/// Resolves the topological stream into the canonical longest chain:
/// emitted blocks have contiguous heights from 0 and each block's parent is
/// the previously emitted one.
///
/// A block is only released once the tip leads it by the safety margin, at
/// which point every competing branch below it is dead and gets dropped.
/// When the input ends, the last `safety_margin` blocks (and any shorter
/// forks) remain withheld, since a longer fork could still appear.
pub struct LongestChainBlocks<I> {
    inner: I,
    safety_margin: Height,
    by_hash: HashMap<BlockHash, Block>,
    children: HashMap<BlockHash, Vec<BlockHash>>,
    tip: BlockHash,
    tip_height: Height,
    emitted_height: Height,
    last_emitted: BlockHash,
    ready: VecDeque<Block>,
    filter: Option<WorkingFilter>,
    ended: bool,
}

impl<I: Iterator<Item = Result<Block, ScanError>>> LongestChainBlocks<I> {
    pub fn new(inner: I, safety_margin: u32, filter: Option<BlockFilter>) -> Self {
        let sentinel = BlockHash(GENESIS_PREV_BLOCK_HASH);
        LongestChainBlocks {
            inner,
            safety_margin: safety_margin as Height,
            by_hash: HashMap::new(),
            children: HashMap::new(),
            tip: sentinel,
            tip_height: -1,
            emitted_height: -1,
            last_emitted: sentinel,
            ready: VecDeque::new(),
            filter: filter.map(WorkingFilter::new),
            ended: false,
        }
    }

    fn absorb(&mut self, block: Block) -> Result<(), ScanError> {
        let hash = block.block_hash();
        let prev = block.prev_block_hash();

        // A parent that is neither buffered nor the last emitted block was
        // already dropped with its branch.
        if prev != self.last_emitted && !self.by_hash.contains_key(&prev) {
            info!("block ignored (from a fork already deemed inferior): {hash}");
            return Ok(());
        }

        self.children.entry(prev).or_default().push(hash);
        let height = block.height;
        self.by_hash.insert(hash, block);
        if height > self.tip_height {
            self.tip_height = height;
            self.tip = hash;
        }
        self.release()
    }

    /// Emit, in height order, every block the tip now buries below the
    /// safety margin, pruning losing branches as their fork point goes out.
    fn release(&mut self) -> Result<(), ScanError> {
        let release_upto = self.tip_height - self.safety_margin;
        if release_upto <= self.emitted_height {
            return Ok(());
        }

        // Ancestor path from the tip back to the emitted boundary.
        let mut path = Vec::with_capacity((self.tip_height - self.emitted_height) as usize);
        let mut cursor = self.tip;
        let mut height = self.tip_height;
        while height > self.emitted_height {
            let block = self.by_hash.get(&cursor).ok_or_else(|| {
                ScanError::Corruption(format!("chain walk lost block {cursor} at height {height}"))
            })?;
            path.push(cursor);
            cursor = block.prev_block_hash();
            height -= 1;
        }
        if cursor != self.last_emitted {
            return Err(ScanError::Corruption(format!(
                "reorganization deeper than the safety margin below height {}",
                self.emitted_height + 1
            )));
        }

        for &hash in path.iter().rev() {
            let block = self
                .by_hash
                .remove(&hash)
                .ok_or_else(|| ScanError::Corruption(format!("chain walk lost block {hash}")))?;
            if block.height > release_upto {
                self.by_hash.insert(hash, block);
                break;
            }

            let parent = block.prev_block_hash();
            if let Some(siblings) = self.children.remove(&parent) {
                for sibling in siblings {
                    if sibling != hash {
                        self.discard_branch(sibling);
                    }
                }
            }

            self.emitted_height = block.height;
            self.last_emitted = hash;
            match self.filter.as_mut().map(|f| f.check(&block)) {
                None | Some(FilterAction::Include) => self.ready.push_back(block),
                Some(FilterAction::Skip) => {}
                Some(FilterAction::Stop) => {
                    self.ended = true;
                    break;
                }
            }
        }
        Ok(())
    }

    fn discard_branch(&mut self, root: BlockHash) {
        let mut pending = vec![root];
        while let Some(hash) = pending.pop() {
            self.by_hash.remove(&hash);
            if let Some(children) = self.children.remove(&hash) {
                pending.extend(children);
            }
        }
    }
}

impl<I: Iterator<Item = Result<Block, ScanError>>> Iterator for LongestChainBlocks<I> {
    type Item = Result<Block, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(block) = self.ready.pop_front() {
                return Some(Ok(block));
            }
            if self.ended {
                return None;
            }
            match self.inner.next() {
                None => self.ended = true,
                Some(Err(e)) => return Some(Err(e.into_stream())),
                Some(Ok(block)) => {
                    if let Err(e) = self.absorb(block) {
                        self.ended = true;
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}
