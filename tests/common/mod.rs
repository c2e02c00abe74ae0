#![allow(dead_code)]

//! Builders for artificial blk*.dat data, forks included, with real framing
//! and real double-SHA256 hashes so the full pipeline can run against it.

use blkscan::codec::{double_sha256, MAGIC};
use std::fs;
use std::path::{Path, PathBuf};

pub const COINBASE_INDEX: u32 = 0xFFFF_FFFF;
pub const BASE_TIMESTAMP: u32 = 1_231_006_505;

pub fn encode_varint(n: u64) -> Vec<u8> {
    match n {
        0..=0xFC => vec![n as u8],
        0xFD..=0xFFFF => {
            let mut out = vec![0xFD];
            out.extend_from_slice(&(n as u16).to_le_bytes());
            out
        }
        0x10000..=0xFFFF_FFFF => {
            let mut out = vec![0xFE];
            out.extend_from_slice(&(n as u32).to_le_bytes());
            out
        }
        _ => {
            let mut out = vec![0xFF];
            out.extend_from_slice(&n.to_le_bytes());
            out
        }
    }
}

/// Serialize a tx: inputs are `(spent_txid, spent_output_idx, script)`,
/// outputs are `(value, script)`.
pub fn make_tx(inputs: &[([u8; 32], u32, Vec<u8>)], outputs: &[(u64, Vec<u8>)]) -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend_from_slice(&1u32.to_le_bytes());
    raw.extend_from_slice(&encode_varint(inputs.len() as u64));
    for (spent_txid, spent_output_idx, script) in inputs {
        raw.extend_from_slice(spent_txid);
        raw.extend_from_slice(&spent_output_idx.to_le_bytes());
        raw.extend_from_slice(&encode_varint(script.len() as u64));
        raw.extend_from_slice(script);
        raw.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    }
    raw.extend_from_slice(&encode_varint(outputs.len() as u64));
    for (value, script) in outputs {
        raw.extend_from_slice(&value.to_le_bytes());
        raw.extend_from_slice(&encode_varint(script.len() as u64));
        raw.extend_from_slice(script);
    }
    raw.extend_from_slice(&0u32.to_le_bytes());
    raw
}

/// A coinbase tx; `tag` lands in the script so every block's coinbase gets
/// a distinct txid.
pub fn coinbase_tx(tag: u32, outputs: &[(u64, Vec<u8>)]) -> Vec<u8> {
    make_tx(&[([0u8; 32], COINBASE_INDEX, tag.to_le_bytes().to_vec())], outputs)
}

pub fn txid(tx_raw: &[u8]) -> [u8; 32] {
    double_sha256(tx_raw)
}

/// Frame a block: magic, size, 80-byte header, tx count, txs.
pub fn make_block(prev_block_hash: [u8; 32], nonce: u32, timestamp: u32, txs: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&1u32.to_le_bytes());
    payload.extend_from_slice(&prev_block_hash);
    payload.extend_from_slice(&[0u8; 32]);
    payload.extend_from_slice(&timestamp.to_le_bytes());
    payload.extend_from_slice(&0x1d00_ffffu32.to_le_bytes());
    payload.extend_from_slice(&nonce.to_le_bytes());
    payload.extend_from_slice(&encode_varint(txs.len() as u64));
    for tx in txs {
        payload.extend_from_slice(tx);
    }

    let mut framed = Vec::with_capacity(8 + payload.len());
    framed.extend_from_slice(&MAGIC.to_le_bytes());
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(&payload);
    framed
}

/// Header hash of a framed block.
pub fn block_hash(framed: &[u8]) -> [u8; 32] {
    double_sha256(&framed[8..88])
}

/// A linear run of coinbase-only blocks chained onto `prev`. Nonces start
/// at `nonce_base` and double as coinbase tags.
pub fn gen_chain(prev: [u8; 32], nonce_base: u32, count: u32) -> Vec<Vec<u8>> {
    let mut blocks = Vec::with_capacity(count as usize);
    let mut prev = prev;
    for i in 0..count {
        let nonce = nonce_base + i;
        let cb = coinbase_tx(nonce, &[(5_000_000_000, vec![0x51])]);
        let block = make_block(prev, nonce, BASE_TIMESTAMP + nonce * 600, &[cb]);
        prev = block_hash(&block);
        blocks.push(block);
    }
    blocks
}

pub fn write_blk_file(dir: &Path, index: u32, blocks: &[Vec<u8>]) -> PathBuf {
    let path = dir.join(format!("blk{index:05}.dat"));
    let mut data = Vec::new();
    for block in blocks {
        data.extend_from_slice(block);
    }
    fs::write(&path, data).expect("failed to write raw file");
    path
}
