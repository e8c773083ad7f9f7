//! # poolalloc - a compacting allocator for a fixed, caller supplied pool
//!
//! This crate manages a single byte buffer without ever touching the global
//! allocator. Blocks are carved out of the buffer with a first-fit policy,
//! freed in place, and can be slid together on demand to get rid of
//! fragmentation.
//!
//! ```text
//!   Pool layout:
//!
//!   +----------+---------+-------+---------+-------+--------------------+
//!   | Sentinel | Block A |  gap  | Block B |  gap  |      tail gap      |
//!   +----------+---------+-------+---------+-------+--------------------+
//!   ^ buffer                                                   capacity ^
//!
//!   After `defragment`:
//!
//!   +----------+---------+---------+------------------------------------+
//!   | Sentinel | Block A | Block B |              tail gap              |
//!   +----------+---------+---------+------------------------------------+
//! ```
//!
//! Every block begins with a three word header (`length`, `previous`,
//! `next`) linking it to its neighbours in address order. There is no free
//! list: the space between two headers is free by definition.
//!
//! ## Crate Structure
//!
//! ```text
//!   poolalloc
//!   ├── pool     - Pool: initialize, allocate, free, defragment
//!   ├── handle   - HandlePool: handles that survive compaction
//!   ├── mapped   - MappedRegion: OS pages to back a pool
//!   ├── config   - PoolConfig
//!   ├── error    - AllocError
//!   ├── block    - block header layout (internal)
//!   ├── list     - address ordered header chain (internal)
//!   ├── gaps     - gap walking and first-fit search (internal)
//!   ├── compact  - the compactor (internal)
//!   └── utils    - alignment helpers
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded**: a pool can move between threads but must be
//!   wrapped in a lock to be shared.
//! - **Word alignment only**: payloads are aligned to `usize`, nothing more.
//! - **Compaction moves memory**: raw pointers to moved blocks dangle
//!   afterwards, see [`Pool::defragment_with`] and [`HandlePool`].

mod block;
mod compact;
mod config;
mod error;
mod gaps;
mod handle;
mod list;
mod mapped;
mod pool;
mod utils;

pub use block::{HEADER_SIZE, WORD_SIZE};
pub use compact::{Compaction, Relocation};
pub use config::PoolConfig;
pub use error::{AllocError, AllocResult};
pub use gaps::Gap;
pub use handle::{Handle, HandlePool};
pub use mapped::{MappedRegion, page_size};
pub use pool::{BlockInfo, Pool, PoolStats};
pub use utils::{align, align_word, checked_align_word};
