//! Iterate a Bitcoin node's on-disk blk*.dat files as ordered streams of
//! blocks and transactions: wire-format decoding over zero-copy byte views,
//! longest-chain resolution with a confirmation-depth safety margin, and an
//! in-memory UTXO tracker that resolves every input to the output it spends.

pub mod api;
pub mod block_chain;
pub mod block_provider;
pub mod block_stream;
pub mod codec;
pub mod err;
pub mod logger;
pub mod model;
pub mod monitor;
pub mod settings;
pub mod utxo;

pub use api::{build_blockchain, iter_blocks, iter_txs, iter_txs_with_scripts, BlockStream, ScanOptions, TxStream};
pub use block_chain::{BlockChain, BlockInfo};
pub use block_provider::ShutdownFlag;
pub use block_stream::BlockFilter;
pub use err::ScanError;
pub use model::{Block, BlockHash, Height, SpendingInfo, Tx, TxId, TxInput, TxOutput};
pub use settings::ScanConfig;
pub use utxo::{ScriptSlot, SpendingTracker, UtxoSet, ValueSlot};
