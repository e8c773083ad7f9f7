use std::{fmt, marker::PhantomData, mem, ptr::NonNull, slice};

use tracing::{debug, trace, warn};

use crate::{
    block::{HEADER_SIZE, Header},
    compact::{self, Compaction, Relocation},
    config::PoolConfig,
    error::{AllocError, AllocResult},
    gaps::{Gap, Gaps, adjusted_length, find_first_fit, offset_of},
    list::Chain,
};

/// A live block as seen from outside the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the block header from the start of the pool.
    pub offset: usize,
    /// Length of the block, header included.
    pub length: usize,
}

impl BlockInfo {
    /// Offset of the first payload byte.
    pub fn payload_offset(&self) -> usize {
        self.offset + HEADER_SIZE
    }

    /// Offset of the first byte after the block.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Point-in-time usage figures of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Bytes under management, sentinel included.
    pub capacity: usize,
    /// Bytes taken by the sentinel and every live block.
    pub used: usize,
    /// `capacity - used`, spread over every gap.
    pub free: usize,
    /// Size of the biggest gap, the largest request region that can
    /// currently succeed.
    pub largest_gap: usize,
    /// Live blocks.
    pub blocks: usize,
    /// Non-empty gaps, the tail included.
    pub fragments: usize,
}

impl PoolStats {
    /// Share of the free space that is unreachable for a request as large
    /// as the whole free space. `0.0` right after a compaction.
    pub fn fragmentation(&self) -> f64 {
        if self.free == 0 {
            return 0.0;
        }
        1.0 - self.largest_gap as f64 / self.free as f64
    }
}

/// A fixed size pool carved out of a caller supplied buffer.
///
/// Every managed region starts with a header, the first one being the
/// sentinel. Headers form an address ordered list and the space between two
/// of them is free.
///
/// ```text
/// +----------+---------+-----+---------+--------------------+
/// | Sentinel | Block A | gap | Block B |      tail gap      |
/// +----------+---------+-----+---------+--------------------+
/// ^ buffer                                         capacity ^
/// ```
///
/// Allocation is first-fit over those gaps. Nothing is ever merged or split
/// because a freed block simply disappears from the list, and
/// [`Pool::defragment`] slides the live blocks together when the gaps become
/// too small to be useful.
///
/// # Example
///
/// ```
/// use poolalloc::Pool;
///
/// #[repr(align(16))]
/// struct Buffer([u8; 4096]);
///
/// let mut buffer = Buffer([0; 4096]);
/// let mut pool = Pool::initialize(&mut buffer.0)?;
///
/// let a = pool.allocate(256)?;
/// let b = pool.allocate(256)?;
/// assert!(a < b);
///
/// pool.free(Some(a))?;
/// pool.defragment();
/// // `b` moved to where `a` was. The old pointer must not be used anymore.
/// let first = pool.blocks().next().map(|block| block.offset);
/// assert_eq!(first, Some(poolalloc::HEADER_SIZE));
/// # Ok::<(), poolalloc::AllocError>(())
/// ```
///
/// # Compaction invalidates pointers
///
/// Any pointer returned by [`Pool::allocate`] for a block that moves during
/// [`Pool::defragment`] is dangling afterwards. Use
/// [`Pool::defragment_with`] to learn where each block went, or a
/// [`crate::HandlePool`] to never hold raw addresses across a compaction.
pub struct Pool<'buf> {
    chain: Chain,
    config: PoolConfig,
    marker: PhantomData<&'buf mut [u8]>,
}

// SAFETY: the pool holds the only borrow of its buffer, and every header
// pointer it keeps points inside that buffer.
unsafe impl Send for Pool<'_> {}

impl<'buf> Pool<'buf> {
    /// Installs a pool over `buffer` with the default configuration.
    ///
    /// If `buffer` does not start on a word boundary the leading bytes are
    /// skipped, so the capacity may be slightly smaller than `buffer.len()`.
    ///
    /// # Errors
    ///
    /// [`AllocError::InsufficientCapacity`] if what is left of `buffer`
    /// cannot hold the sentinel header.
    pub fn initialize(buffer: &'buf mut [u8]) -> AllocResult<Self> {
        Self::with_config(buffer, PoolConfig::default())
    }

    /// Installs a pool over `buffer` using `config`.
    pub fn with_config(buffer: &'buf mut [u8], config: PoolConfig) -> AllocResult<Self> {
        let len = buffer.len();
        let skip = buffer.as_ptr().align_offset(mem::align_of::<Header>());

        let capacity = len.saturating_sub(skip);
        if skip > len || capacity < HEADER_SIZE {
            return Err(AllocError::InsufficientCapacity {
                capacity: len,
                required: HEADER_SIZE.saturating_add(skip),
            });
        }

        let base = NonNull::from(buffer).cast::<u8>();
        // SAFETY: `skip + HEADER_SIZE <= len`, and `base + skip` is word
        // aligned and valid for `capacity` bytes.
        let chain = unsafe { Chain::install(base.add(skip), capacity) };

        debug!(capacity, skipped = skip, ?config, "pool initialized");

        Ok(Self {
            chain,
            config,
            marker: PhantomData,
        })
    }

    /// Re-installs the sentinel, dropping every live block at once.
    ///
    /// Every pointer previously returned by this pool becomes invalid.
    pub fn reset(&mut self) {
        let capacity = self.capacity();
        let dropped = self.chain.len();

        // SAFETY: the sentinel address and capacity are the ones validated
        // when the pool was initialized.
        self.chain = unsafe { Chain::install(self.chain.sentinel().cast(), capacity) };

        debug!(capacity, dropped, "pool reset");
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Bytes under management, sentinel included.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.chain.capacity()
    }

    /// Number of live blocks.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.chain.len()
    }

    /// Returns true if no block is allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Allocates `len` usable bytes and returns a pointer to them.
    ///
    /// The block takes `align_word(len + HEADER_SIZE)` bytes of the pool and
    /// is placed in the earliest gap, by address, that can hold it. The
    /// returned pointer is word aligned.
    ///
    /// # Errors
    ///
    /// [`AllocError::OutOfMemory`] if no gap is large enough or if the size
    /// computation overflows. The pool is left untouched.
    pub fn allocate(&mut self, len: usize) -> AllocResult<NonNull<u8>> {
        let out_of_memory = AllocError::OutOfMemory { requested: len };

        let Some(adjusted) = adjusted_length(len) else {
            trace!(requested = len, "request size overflows");
            return Err(out_of_memory);
        };

        let Some(fit) = find_first_fit(&self.chain, adjusted) else {
            trace!(requested = len, adjusted, "no gap large enough");
            return Err(out_of_memory);
        };

        // SAFETY: `fit.start` begins a gap right after `fit.after` holding at
        // least `adjusted` bytes.
        let node = unsafe { self.chain.insert_after(fit.after, fit.start, adjusted) };
        let payload = Header::payload(node);

        if self.config.zero_on_alloc {
            unsafe { payload.as_ptr().write_bytes(0, adjusted - HEADER_SIZE) };
        }

        trace!(
            offset = offset_of(&self.chain, fit.start),
            length = adjusted,
            gap = fit.size,
            "allocated block"
        );

        Ok(payload)
    }

    /// Frees the block whose payload starts at `ptr`. `None` is a no-op.
    ///
    /// The freed bytes are left intact, unless [`PoolConfig::poison_on_free`]
    /// is set, and become part of the gap between the neighbouring blocks.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidPointer`] if `ptr` is not the payload of a live
    /// block of this pool, which covers double frees, interior pointers and
    /// pointers from other pools. The pool is left untouched.
    pub fn free(&mut self, ptr: Option<NonNull<u8>>) -> AllocResult<()> {
        let Some(ptr) = ptr else {
            return Ok(());
        };

        let Some(node) = self.chain.find(ptr) else {
            warn!(addr = ?ptr, "rejected free of unknown pointer");
            return Err(AllocError::InvalidPointer {
                addr: ptr.as_ptr() as usize,
            });
        };

        unsafe { self.release(node) };
        Ok(())
    }

    /// Frees the block whose payload starts at `ptr` without checking that
    /// it is a live block of this pool. Constant time, unlike [`Pool::free`].
    ///
    /// **SAFETY**: `ptr` must have been returned by [`Pool::allocate`] on
    /// this pool, must not have been freed already, and must not have been
    /// invalidated by a compaction.
    pub unsafe fn free_unchecked(&mut self, ptr: NonNull<u8>) {
        unsafe {
            let node = ptr.sub(HEADER_SIZE).cast::<Header>();
            self.release(node);
        }
    }

    /// **SAFETY**: `node` must be a live, non-sentinel block of this pool.
    unsafe fn release(&mut self, node: NonNull<Header>) {
        unsafe {
            let length = node.as_ref().length;

            if let Some(byte) = self.config.poison_on_free {
                Header::payload(node)
                    .as_ptr()
                    .write_bytes(byte, length - HEADER_SIZE);
            }

            self.chain.remove(node);

            trace!(offset = offset_of(&self.chain, node.cast()), length, "freed block");
        }
    }

    /// Moves every live block towards the start of the pool so that all the
    /// free space ends up in a single tail gap.
    ///
    /// Pointers to blocks that moved are invalidated, see
    /// [`Pool::defragment_with`].
    pub fn defragment(&mut self) -> Compaction {
        self.defragment_with(|_| {})
    }

    /// Same as [`Pool::defragment`], calling `on_move` for every block that
    /// changed address, in address order.
    pub fn defragment_with<F>(&mut self, on_move: F) -> Compaction
    where
        F: FnMut(Relocation),
    {
        let summary = compact::compact(&mut self.chain, on_move);

        debug!(
            moved = summary.blocks_moved,
            bytes = summary.bytes_moved,
            blocks = self.chain.len(),
            "pool defragmented"
        );

        summary
    }

    /// Returns true if `ptr` is the payload of a live block of this pool.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.chain.find(ptr).is_some()
    }

    /// Usable bytes of the block whose payload starts at `ptr`.
    pub fn payload(&self, ptr: NonNull<u8>) -> AllocResult<&[u8]> {
        let node = self.lookup(ptr)?;

        // SAFETY: `node` is live, its payload lies inside the pool and the
        // returned slice borrows the pool.
        unsafe { Ok(slice::from_raw_parts(ptr.as_ptr(), node.as_ref().payload_len())) }
    }

    /// Mutable version of [`Pool::payload`].
    pub fn payload_mut(&mut self, ptr: NonNull<u8>) -> AllocResult<&mut [u8]> {
        let node = self.lookup(ptr)?;

        unsafe { Ok(slice::from_raw_parts_mut(ptr.as_ptr(), node.as_ref().payload_len())) }
    }

    fn lookup(&self, ptr: NonNull<u8>) -> AllocResult<NonNull<Header>> {
        self.chain.find(ptr).ok_or(AllocError::InvalidPointer {
            addr: ptr.as_ptr() as usize,
        })
    }

    /// Live blocks in address order.
    pub fn blocks(&self) -> impl ExactSizeIterator<Item = BlockInfo> + '_ {
        self.chain.iter().map(|node| BlockInfo {
            offset: offset_of(&self.chain, node.cast()),
            length: unsafe { node.as_ref().length },
        })
    }

    /// Non-empty gaps in address order, the tail gap last if there is one.
    pub fn gaps(&self) -> impl Iterator<Item = Gap> + '_ {
        Gaps::new(&self.chain)
            .filter(|fit| fit.size > 0)
            .map(|fit| Gap {
                offset: offset_of(&self.chain, fit.start),
                size: fit.size,
            })
    }

    pub fn stats(&self) -> PoolStats {
        let capacity = self.capacity();
        let used = HEADER_SIZE + self.blocks().map(|block| block.length).sum::<usize>();

        let (largest_gap, fragments) = self
            .gaps()
            .fold((0, 0), |(largest, count), gap| (largest.max(gap.size), count + 1));

        PoolStats {
            capacity,
            used,
            free: capacity - used,
            largest_gap,
            blocks: self.chain.len(),
            fragments,
        }
    }
}

impl fmt::Debug for Pool<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity())
            .field("blocks", &self.chain.len())
            .field("config", &self.config)
            .finish()
    }
}
