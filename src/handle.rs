use std::ptr::NonNull;

use tracing::{trace, warn};

use crate::{
    compact::Compaction,
    config::PoolConfig,
    error::{AllocError, AllocResult},
    pool::Pool,
};

/// Opaque reference to an allocation of a [`HandlePool`].
///
/// Unlike a raw pointer, a handle stays valid across
/// [`HandlePool::defragment`]. The generation makes a handle to a freed
/// slot fail instead of resolving to whatever reused the slot.
///
/// Generations are 32 bits and wrap. After 2^32 frees of the same slot a
/// handle that old matches again and resolves to the slot's current
/// allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    fn invalid(self) -> AllocError {
        AllocError::InvalidHandle {
            index: self.index,
            generation: self.generation,
        }
    }
}

#[derive(Clone, Copy)]
struct Entry {
    /// Current payload address, `None` while the entry is vacant.
    payload: Option<NonNull<u8>>,
    generation: u32,
}

impl Entry {
    const VACANT: Self = Self {
        payload: None,
        generation: 0,
    };
}

/// A [`Pool`] whose allocations are reached through a fixed table of `N`
/// entries instead of raw addresses.
///
/// ```text
///   Handle { index: 1, generation: 3 }
///                  |
///   +-------+------v-------+-------+
///   | entry | payload, g=3 | entry |   <- table, owned by the HandlePool
///   +-------+------|-------+-------+
///                  v
///   | Sentinel | A |  B  |      tail      |   <- pool buffer
/// ```
///
/// The compactor reports every move and the table is patched in place, so
/// callers never hold an address across a compaction. The table lives
/// inline, no memory is requested from the global allocator.
pub struct HandlePool<'buf, const N: usize> {
    pool: Pool<'buf>,
    entries: [Entry; N],
    live: usize,
}

// SAFETY: every payload pointer in the table points into the buffer the
// inner pool borrows exclusively, the same reasoning that makes `Pool` Send.
unsafe impl<const N: usize> Send for HandlePool<'_, N> {}

impl<'buf, const N: usize> HandlePool<'buf, N> {
    /// Installs a handle pool over `buffer`. See [`Pool::initialize`].
    pub fn initialize(buffer: &'buf mut [u8]) -> AllocResult<Self> {
        Self::with_config(buffer, PoolConfig::default())
    }

    pub fn with_config(buffer: &'buf mut [u8], config: PoolConfig) -> AllocResult<Self> {
        Ok(Self {
            pool: Pool::with_config(buffer, config)?,
            entries: [Entry::VACANT; N],
            live: 0,
        })
    }

    /// Read only access to the underlying pool, for statistics.
    #[inline]
    pub fn pool(&self) -> &Pool<'buf> {
        &self.pool
    }

    /// Number of live handles.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Allocates `len` bytes and returns a handle to them.
    ///
    /// # Errors
    ///
    /// [`AllocError::HandlesExhausted`] when every entry is in use, or
    /// whatever [`Pool::allocate`] returns. Nothing changes on failure.
    pub fn allocate(&mut self, len: usize) -> AllocResult<Handle> {
        let Some(index) = self.entries.iter().position(|entry| entry.payload.is_none()) else {
            warn!(slots = N, "handle table exhausted");
            return Err(AllocError::HandlesExhausted { slots: N });
        };

        let payload = self.pool.allocate(len)?;
        let entry = &mut self.entries[index];
        entry.payload = Some(payload);
        self.live += 1;

        let handle = Handle {
            index: index as u32,
            generation: entry.generation,
        };
        trace!(index, generation = handle.generation, "handle issued");

        Ok(handle)
    }

    /// Frees the allocation behind `handle`.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidHandle`] if `handle` was already freed or does
    /// not come from this pool.
    pub fn free(&mut self, handle: Handle) -> AllocResult<()> {
        let payload = self.resolve(handle)?;
        self.pool.free(Some(payload))?;

        let entry = &mut self.entries[handle.index as usize];
        entry.payload = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.live -= 1;

        Ok(())
    }

    /// Usable bytes behind `handle`.
    pub fn get(&self, handle: Handle) -> AllocResult<&[u8]> {
        let payload = self.resolve(handle)?;
        self.pool.payload(payload)
    }

    /// Mutable version of [`HandlePool::get`].
    pub fn get_mut(&mut self, handle: Handle) -> AllocResult<&mut [u8]> {
        let payload = self.resolve(handle)?;
        self.pool.payload_mut(payload)
    }

    /// Compacts the pool. Every handle keeps resolving to its data.
    pub fn defragment(&mut self) -> Compaction {
        let entries = &mut self.entries;

        self.pool.defragment_with(|moved| {
            // Moves are reported in address order and each block only moves
            // down, so a `from` never matches an address already patched.
            if let Some(entry) = entries
                .iter_mut()
                .find(|entry| entry.payload == Some(moved.from))
            {
                entry.payload = Some(moved.to);
            }
        })
    }

    fn resolve(&self, handle: Handle) -> AllocResult<NonNull<u8>> {
        self.entries
            .get(handle.index as usize)
            .filter(|entry| entry.generation == handle.generation)
            .and_then(|entry| entry.payload)
            .ok_or_else(|| handle.invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::HEADER_SIZE;

    #[repr(C, align(16))]
    struct Buffer([u8; 1024]);

    #[test]
    fn handles_survive_compaction() {
        let mut buffer = Buffer([0; 1024]);
        let mut pool = HandlePool::<8>::initialize(&mut buffer.0).unwrap();

        let a = pool.allocate(64).unwrap();
        let b = pool.allocate(32).unwrap();
        let c = pool.allocate(16).unwrap();
        pool.get_mut(b).unwrap().fill(0xB0);
        pool.get_mut(c).unwrap().fill(0xC0);

        pool.free(a).unwrap();
        let summary = pool.defragment();

        assert_eq!(summary.blocks_moved, 2);
        assert!(pool.get(b).unwrap().iter().all(|&byte| byte == 0xB0));
        assert!(pool.get(c).unwrap().iter().all(|&byte| byte == 0xC0));
        assert_eq!(pool.pool().blocks().next().unwrap().offset, HEADER_SIZE);
    }

    #[test]
    fn stale_handle_is_rejected_after_reuse() {
        let mut buffer = Buffer([0; 1024]);
        let mut pool = HandlePool::<2>::initialize(&mut buffer.0).unwrap();

        let a = pool.allocate(8).unwrap();
        pool.free(a).unwrap();
        let b = pool.allocate(8).unwrap();

        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert_eq!(
            pool.get(a),
            Err(AllocError::InvalidHandle { index: a.index(), generation: a.generation() })
        );
        assert_eq!(pool.free(a), Err(a.invalid()));
        assert!(pool.get(b).is_ok());
    }

    #[test]
    fn table_exhaustion_leaves_pool_untouched() {
        let mut buffer = Buffer([0; 1024]);
        let mut pool = HandlePool::<1>::initialize(&mut buffer.0).unwrap();

        pool.allocate(8).unwrap();
        assert_eq!(pool.allocate(8), Err(AllocError::HandlesExhausted { slots: 1 }));
        assert_eq!(pool.pool().block_count(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn out_of_memory_keeps_entry_vacant() {
        let mut buffer = Buffer([0; 1024]);
        let mut pool = HandlePool::<2>::initialize(&mut buffer.0).unwrap();

        assert!(matches!(pool.allocate(4096), Err(AllocError::OutOfMemory { .. })));
        assert!(pool.is_empty());
        assert!(pool.allocate(8).is_ok());
    }

    #[test]
    fn generation_wraps_after_u32_max() {
        let mut buffer = Buffer([0; 1024]);
        let mut pool = HandlePool::<1>::initialize(&mut buffer.0).unwrap();
        pool.entries[0].generation = u32::MAX;

        let old = pool.allocate(8).unwrap();
        assert_eq!(old.generation(), u32::MAX);
        pool.free(old).unwrap();

        let new = pool.allocate(8).unwrap();
        assert_eq!(new.generation(), 0);
        assert!(pool.get(old).is_err());
    }

    #[test]
    fn handle_pool_is_send() {
        fn assert_send<T: Send>() {}

        assert_send::<HandlePool<'static, 4>>();
    }
}
