use crate::info;
use crate::model::Block;
use chrono::DateTime;
use std::time::Instant;

/// Periodic progress lines for long scans: one `info!` every
/// `report_interval` blocks with the position and observed throughput.
pub struct ProgressMonitor {
    report_interval: usize,
    start_time: Instant,
    blocks: usize,
    txs: u64,
}

impl ProgressMonitor {
    pub fn new(report_interval: usize) -> Self {
        ProgressMonitor { report_interval: report_interval.max(1), start_time: Instant::now(), blocks: 0, txs: 0 }
    }

    pub fn on_block(&mut self, block: &Block) {
        self.blocks += 1;
        self.txs += block.num_txs().unwrap_or(0);
        if self.blocks % self.report_interval != 0 {
            return;
        }
        let elapsed = self.start_time.elapsed().as_secs_f64().max(f64::EPSILON);
        info!(
            "Block @ {} : {} from {} at {:.1} blocks/s, {:.1} txs/s",
            block.height,
            &block.block_hash().hex()[..12],
            format_timestamp(block.timestamp()),
            self.blocks as f64 / elapsed,
            self.txs as f64 / elapsed,
        );
    }
}

fn format_timestamp(epoch: u32) -> String {
    match DateTime::from_timestamp(epoch as i64, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => epoch.to_string(),
    }
}
