use blkscan::codec::MAGIC;
use blkscan::model::Block;
use blkscan::utxo::{SpendingTracker, ValueSlot};
use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

fn synthetic_block(tx_count: usize) -> Bytes {
    let mut txs = Vec::new();
    for i in 0..tx_count {
        let mut tx = Vec::new();
        tx.extend_from_slice(&1u32.to_le_bytes());
        tx.push(1);
        tx.extend_from_slice(&[0u8; 32]);
        tx.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        tx.push(4);
        tx.extend_from_slice(&(i as u32).to_le_bytes());
        tx.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        tx.push(2);
        for vout in 0..2u64 {
            tx.extend_from_slice(&(50_000_000 + vout).to_le_bytes());
            tx.push(25);
            tx.extend_from_slice(&[0x76; 25]);
        }
        tx.extend_from_slice(&0u32.to_le_bytes());
        txs.push(tx);
    }

    let mut payload = Vec::new();
    payload.extend_from_slice(&1u32.to_le_bytes());
    payload.extend_from_slice(&[0u8; 32]);
    payload.extend_from_slice(&[0u8; 32]);
    payload.extend_from_slice(&1_231_006_505u32.to_le_bytes());
    payload.extend_from_slice(&0x1d00_ffffu32.to_le_bytes());
    payload.extend_from_slice(&0u32.to_le_bytes());
    payload.push(0xFD);
    payload.extend_from_slice(&(tx_count as u16).to_le_bytes());
    for tx in &txs {
        payload.extend_from_slice(tx);
    }

    let mut framed = Vec::new();
    framed.extend_from_slice(&MAGIC.to_le_bytes());
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(&payload);
    Bytes::from(framed)
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.warm_up_time(Duration::from_millis(200));
    group.measurement_time(Duration::from_secs(2));
    group.sample_size(20);

    for tx_count in [10usize, 500, 2500] {
        let framed = synthetic_block(tx_count);
        group.throughput(Throughput::Elements(tx_count as u64));
        group.bench_function(BenchmarkId::new("block_txs", tx_count), |bencher| {
            bencher.iter(|| {
                let block = Block::from_framed(&framed, 0).unwrap().unwrap();
                let mut total = 0u64;
                for tx in block.txs().unwrap().iter() {
                    total += tx.unwrap().total_output_value();
                }
                total
            });
        });
    }

    let framed = synthetic_block(1000);
    group.throughput(Throughput::Elements(1000));
    group.bench_function(BenchmarkId::from_parameter("utxo_add"), |bencher| {
        bencher.iter(|| {
            let block = Block::from_framed(&framed, 0).unwrap().unwrap();
            let mut tracker: SpendingTracker<ValueSlot> = SpendingTracker::new();
            for tx in block.txs().unwrap().iter() {
                let mut tx = tx.unwrap();
                tracker.process_tx(&mut tx, 0).unwrap();
            }
            tracker.utxoset.len()
        });
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
