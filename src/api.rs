use crate::block_chain::{BlockChain, BlockInfo};
use crate::block_provider::{RawBlockIterator, ShutdownFlag};
use crate::block_stream::{BlockFilter, LongestChainBlocks, TopologicalBlocks};
use crate::err::ScanError;
use crate::model::{Block, Height, Tx, TxIter};
use crate::monitor::ProgressMonitor;
use crate::settings::ScanConfig;
use crate::utxo::{OutputSlot, ScriptSlot, SpendingTracker, ValueSlot};

/// Everything a scan can be asked to do. `Default` gives a one-shot pass
/// over the longest chain of the configured data directory.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub config: ScanConfig,
    /// Keep watching for new blocks instead of stopping at the last one.
    pub tail: bool,
    /// Yield every stored block in topological order instead of resolving
    /// the longest chain. Block streams only; the tx stream always resolves.
    pub all_forks: bool,
    /// Height/time window, applied to the longest-chain stream.
    pub filter: Option<BlockFilter>,
    /// Resolve each tx input to the output it spends (tx streams only).
    pub track_spending: bool,
    pub show_progress: bool,
    pub shutdown: ShutdownFlag,
}

enum BlockStreamInner {
    Longest(LongestChainBlocks<TopologicalBlocks<RawBlockIterator>>),
    AllForks(TopologicalBlocks<RawBlockIterator>),
}

/// The composed block pipeline: raw files, framing, fork resolution.
pub struct BlockStream {
    inner: BlockStreamInner,
    monitor: Option<ProgressMonitor>,
}

impl Iterator for BlockStream {
    type Item = Result<Block, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = match &mut self.inner {
            BlockStreamInner::Longest(stream) => stream.next(),
            BlockStreamInner::AllForks(stream) => stream.next(),
        };
        if let (Some(Ok(block)), Some(monitor)) = (&item, &mut self.monitor) {
            monitor.on_block(block);
        }
        item
    }
}

/// Blocks of the longest chain in height order (or every stored block in
/// topological order with `all_forks`).
pub fn iter_blocks(options: ScanOptions) -> BlockStream {
    let raw = RawBlockIterator::new(
        options.config.data_dir_path(),
        options.tail,
        options.config.tail_poll_interval_s,
        options.shutdown.clone(),
    );
    let topological = TopologicalBlocks::new(raw);
    let inner = if options.all_forks {
        BlockStreamInner::AllForks(topological)
    } else {
        BlockStreamInner::Longest(LongestChainBlocks::new(
            topological,
            options.config.height_safety_margin,
            options.filter.clone(),
        ))
    };
    let monitor = options
        .show_progress
        .then(|| ProgressMonitor::new(options.config.progress_report_interval));
    BlockStream { inner, monitor }
}

/// The block stream flat-mapped over each block's transactions, preserving
/// in-block order. With `track_spending`, every non-coinbase input of a
/// yielded tx carries the `SpendingInfo` of the output it consumes; a spend
/// that cannot be resolved surfaces as an error item and iteration may
/// continue with partial tracking.
pub struct TxStream<S: OutputSlot = ValueSlot> {
    blocks: BlockStream,
    current: Option<(TxIter, Height)>,
    tracker: Option<SpendingTracker<S>>,
}

impl<S: OutputSlot> TxStream<S> {
    fn make(mut options: ScanOptions) -> TxStream<S> {
        // Spend tracking replays history; it only makes sense over the
        // resolved chain.
        options.all_forks = false;
        let tracker = options.track_spending.then(|| {
            SpendingTracker::with_utxoset(crate::utxo::UtxoSet::with_key_bytes(
                options.config.txid_key_bytes,
            ))
        });
        TxStream { blocks: iter_blocks(options), current: None, tracker }
    }

    /// The tracked set, e.g. for snapshotting once iteration is done.
    pub fn utxoset(&self) -> Option<&crate::utxo::UtxoSet<S>> {
        self.tracker.as_ref().map(|t| &t.utxoset)
    }
}

impl<S: OutputSlot> Iterator for TxStream<S> {
    type Item = Result<Tx, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((txs, block_height)) = &mut self.current {
                match txs.next() {
                    Some(Ok(mut tx)) => {
                        if let Some(tracker) = &mut self.tracker {
                            if let Err(e) = tracker.process_tx(&mut tx, *block_height) {
                                return Some(Err(e));
                            }
                        }
                        return Some(Ok(tx));
                    }
                    Some(Err(e)) => return Some(Err(e.into_stream())),
                    None => self.current = None,
                }
            }
            match self.blocks.next()? {
                Err(e) => return Some(Err(e)),
                Ok(block) => match block.txs() {
                    Ok(txs) => self.current = Some((txs.iter(), block.height)),
                    Err(e) => return Some(Err(e.into_stream())),
                },
            }
        }
    }
}

/// Transactions of the longest chain, minimal tracking mode.
pub fn iter_txs(options: ScanOptions) -> TxStream<ValueSlot> {
    TxStream::make(options)
}

/// Transactions of the longest chain, with locking scripts carried through
/// the tracker and handed out on each spend.
pub fn iter_txs_with_scripts(options: ScanOptions) -> TxStream<ScriptSlot> {
    TxStream::make(options)
}

/// Drive the block stream to its end and index what it emitted.
pub fn build_blockchain(mut options: ScanOptions) -> Result<BlockChain, ScanError> {
    // The index is dense by height; only the resolved chain fits it.
    options.all_forks = false;
    let mut chain = BlockChain::new();
    for block in iter_blocks(options) {
        let block = block?;
        chain.append(BlockInfo::from_block(&block)?)?;
    }
    Ok(chain)
}
