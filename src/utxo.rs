use crate::err::ScanError;
use crate::model::{Height, SpendingInfo, Tx, TxId, TxInput, TxOutput};
use crate::settings::DEFAULT_TXID_KEY_BYTES;
use std::collections::HashMap;

/// Overwrites a slot's value once spent. Never a legal satoshi amount, so a
/// second spend of the same slot is detectable.
pub const OUTPUT_SPENT_MARKER: u64 = u64::MAX;

/// One stored output of an unspent tx. The two implementations are the two
/// storage modes: values only, or values plus owned script buffers.
pub trait OutputSlot {
    fn from_output(out: &TxOutput) -> Self;
    fn value(&self) -> u64;
    fn set_spent(&mut self);
    /// Moves the script buffer out to the caller, if this mode stores one.
    fn take_script(&mut self) -> Option<Box<[u8]>>;

    fn is_spent(&self) -> bool {
        self.value() == OUTPUT_SPENT_MARKER
    }
}

/// Minimal mode: 8 bytes per output.
#[derive(Debug, Clone, Copy)]
pub struct ValueSlot(u64);

impl OutputSlot for ValueSlot {
    fn from_output(out: &TxOutput) -> Self {
        ValueSlot(out.value)
    }

    fn value(&self) -> u64 {
        self.0
    }

    fn set_spent(&mut self) {
        self.0 = OUTPUT_SPENT_MARKER;
    }

    fn take_script(&mut self) -> Option<Box<[u8]>> {
        None
    }
}

/// Script-tracking mode: the entry owns each locking script until the spend
/// hands it to the caller.
#[derive(Debug, Clone)]
pub struct ScriptSlot {
    value: u64,
    script: Option<Box<[u8]>>,
}

impl OutputSlot for ScriptSlot {
    fn from_output(out: &TxOutput) -> Self {
        ScriptSlot { value: out.value, script: Some(out.script.to_vec().into_boxed_slice()) }
    }

    fn value(&self) -> u64 {
        self.value
    }

    fn set_spent(&mut self) {
        self.value = OUTPUT_SPENT_MARKER;
    }

    fn take_script(&mut self) -> Option<Box<[u8]>> {
        self.script.take()
    }
}

/// All still-unspent outputs of one tx: a flat slot array sized to the tx's
/// exact output count, the count of slots not yet spent, and the height the
/// tx was confirmed at.
struct UtxEntry<S> {
    outputs: Box<[S]>,
    unspent: u32,
    block_height: Height,
}

/// A snapshot view of one tracked entry, for external serialization.
pub struct UtxoEntryRef<'a, S> {
    pub key: u64,
    pub block_height: Height,
    pub outputs: &'a [S],
}

/// The set of unspent tx outputs, keyed by a 64-bit txid prefix.
///
/// The full txid is never stored: its first `key_bytes` bytes (8 by default)
/// are collision-free over the whole chain and become the map key, keeping
/// the index at a fixed 8 bytes per tx regardless of prefix width.
pub struct UtxoSet<S: OutputSlot = ValueSlot> {
    map: HashMap<u64, UtxEntry<S>>,
    key_bytes: usize,
}

impl<S: OutputSlot> Default for UtxoSet<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: OutputSlot> UtxoSet<S> {
    pub fn new() -> Self {
        Self::with_key_bytes(DEFAULT_TXID_KEY_BYTES)
    }

    /// `key_bytes` must be in 1..=8; widen it if the chain ever outgrows the
    /// default margin.
    pub fn with_key_bytes(key_bytes: usize) -> Self {
        assert!((1..=8).contains(&key_bytes), "txid key width must be 1..=8 bytes");
        UtxoSet { map: HashMap::new(), key_bytes }
    }

    fn key(&self, txid: &TxId) -> u64 {
        let mut key = [0u8; 8];
        key[..self.key_bytes].copy_from_slice(&txid.0[..self.key_bytes]);
        u64::from_le_bytes(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Register every output of `tx` as unspent. A tx with no outputs has no
    /// unspent state and is not inserted.
    pub fn add_from_tx(&mut self, tx: &Tx, block_height: Height) {
        if tx.outputs.is_empty() {
            return;
        }
        let outputs: Box<[S]> = tx.outputs.iter().map(S::from_output).collect();
        let entry = UtxEntry { unspent: outputs.len() as u32, outputs, block_height };
        self.map.insert(self.key(&tx.txid), entry);
    }

    /// Resolve and consume the output `spent_txid:out_idx`. The entry is
    /// removed by the same call that spends its last output.
    ///
    /// An absent tx, an out-of-range index and an already-spent slot all
    /// fail with `NotFound`.
    pub fn spend(&mut self, spent_txid: &TxId, out_idx: u32) -> Result<SpendingInfo, ScanError> {
        let key = self.key(spent_txid);
        let not_found = || ScanError::NotFound { txid: spent_txid.hex(), vout: out_idx };

        let entry = self.map.get_mut(&key).ok_or_else(not_found)?;
        let slot = entry.outputs.get_mut(out_idx as usize).ok_or_else(not_found)?;
        if slot.is_spent() {
            return Err(not_found());
        }

        let info = SpendingInfo {
            value: slot.value(),
            script: slot.take_script(),
            block_height: entry.block_height,
        };
        slot.set_spent();
        entry.unspent -= 1;
        if entry.unspent == 0 {
            self.map.remove(&key);
        }
        Ok(info)
    }

    /// Iterate the live entries, e.g. to snapshot the set externally.
    pub fn entries(&self) -> impl Iterator<Item = UtxoEntryRef<'_, S>> {
        self.map.iter().map(|(key, entry)| UtxoEntryRef {
            key: *key,
            block_height: entry.block_height,
            outputs: &entry.outputs,
        })
    }
}

/// Applies each tx of a height-ordered stream to the set: outputs are added
/// before any of the tx's own inputs are resolved, so spends of outputs
/// created earlier in the same block land on already-registered entries.
/// Single-writer; callers wanting parallelism must partition above this.
pub struct SpendingTracker<S: OutputSlot = ValueSlot> {
    pub utxoset: UtxoSet<S>,
}

impl<S: OutputSlot> Default for SpendingTracker<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: OutputSlot> SpendingTracker<S> {
    pub fn new() -> Self {
        SpendingTracker { utxoset: UtxoSet::new() }
    }

    pub fn with_utxoset(utxoset: UtxoSet<S>) -> Self {
        SpendingTracker { utxoset }
    }

    /// Update the set with `tx` and fill the spending info slot of each
    /// non-coinbase input.
    pub fn process_tx(&mut self, tx: &mut Tx, block_height: Height) -> Result<(), ScanError> {
        self.utxoset.add_from_tx(tx, block_height);
        for input in &mut tx.inputs {
            if let TxInput::Spending { spent_txid, spent_output_idx, spending_info, .. } = input {
                *spending_info = Some(self.utxoset.spend(spent_txid, *spent_output_idx)?);
            }
        }
        Ok(())
    }
}
