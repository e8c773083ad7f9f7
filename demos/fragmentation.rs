//! Fragments a 4 KiB pool and compacts it back, logging every step.
//!
//! Run with `RUST_LOG=poolalloc=trace cargo run --example fragmentation`
//! to see individual allocations and moves.

use poolalloc::{AllocResult, Pool, PoolStats, align_word};
use tracing_subscriber::EnvFilter;

#[repr(C, align(16))]
struct Buffer([u8; 0x1000]);

fn report(label: &str, stats: PoolStats) {
    println!(
        "[{label}] blocks = {}, used = {}, free = {}, largest gap = {}, fragmentation = {:.2}",
        stats.blocks,
        stats.used,
        stats.free,
        stats.largest_gap,
        stats.fragmentation()
    );
}

fn main() -> AllocResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("aligned size test (3): {}", align_word(3));

    let mut buffer = Buffer([0; 0x1000]);
    let mut pool = Pool::initialize(&mut buffer.0)?;

    let blocks: Vec<_> = (0..12)
        .map(|_| pool.allocate(0x100))
        .collect::<AllocResult<_>>()?;
    report("filled", pool.stats());

    for ptr in blocks.iter().step_by(2) {
        pool.free(Some(*ptr))?;
    }
    report("fragmented", pool.stats());

    match pool.allocate(0x400) {
        Ok(_) => println!("a 1 KiB request fit before compaction"),
        Err(err) => println!("a 1 KiB request failed: {err}"),
    }

    let summary = pool.defragment();
    println!(
        "compaction moved {} blocks ({} bytes)",
        summary.blocks_moved, summary.bytes_moved
    );
    report("compacted", pool.stats());

    let big = pool.allocate(0x400)?;
    println!("a 1 KiB request now lands at {big:?}");

    Ok(())
}
