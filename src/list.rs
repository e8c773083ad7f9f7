use std::{marker::PhantomData, ptr::NonNull};

use crate::block::{HEADER_SIZE, Header};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// The block directory: an intrusive, address-ordered, doubly-linked list of
/// [`Header`]s embedded in the pool.
///
/// ```text
///  pool start                                                       pool end
///  +----------+---------+  gap  +---------+---------+    tail gap    +
///  | Sentinel | Block A | ..... | Block B | Block C | .............. |
///  +----------+---------+       +---------+---------+                +
///       |  next ^ |  next    ^     | next  ^  |
///       +-------+ +----------+     +-------+  +-> None
/// ```
///
/// Because we are the allocator, none of these methods allocate. Nodes are
/// always written at an address chosen by the caller inside the pool.
///
/// Invariants kept by every method:
/// - `address(h.next) > address(h)` whenever `h.next` exists.
/// - `h.next.previous == h` and `h.previous.next == h` for every live `h`.
/// - The sentinel is the head, it is never unlinked and has no `previous`.
pub(crate) struct Chain {
    sentinel: NonNull<Header>,
    /// Live blocks, sentinel excluded.
    len: usize,
}

pub(crate) struct Iter<'a> {
    current: Link<Header>,
    remaining: usize,
    marker: PhantomData<&'a Header>,
}

impl Chain {
    /// Writes the sentinel at `addr` and returns an empty chain anchored on it.
    ///
    /// **SAFETY**: `addr` must be word aligned and valid for writes of
    /// `capacity` bytes, with `capacity >= HEADER_SIZE`.
    pub unsafe fn install(addr: NonNull<u8>, capacity: usize) -> Self {
        let sentinel = addr.cast::<Header>();

        unsafe {
            sentinel.as_ptr().write(Header {
                length: capacity - HEADER_SIZE,
                previous: None,
                next: None,
            });
        }

        Self { sentinel, len: 0 }
    }

    #[inline]
    pub fn sentinel(&self) -> NonNull<Header> {
        self.sentinel
    }

    /// Total bytes under management, sentinel included.
    #[inline]
    pub fn capacity(&self) -> usize {
        unsafe { self.sentinel.as_ref().length + HEADER_SIZE }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First live block, in address order.
    #[inline]
    pub fn first(&self) -> Link<Header> {
        unsafe { self.sentinel.as_ref().next }
    }

    /// Writes a new header of `length` bytes at `addr` and links it right
    /// after `prev`.
    ///
    /// **SAFETY**: `prev` must be a live node of this chain and `addr` must
    /// lie inside the gap that follows `prev`, with `length` bytes available
    /// before `prev.next` (or the end of the pool).
    pub unsafe fn insert_after(
        &mut self,
        mut prev: NonNull<Header>,
        addr: NonNull<u8>,
        length: usize,
    ) -> NonNull<Header> {
        let node = addr.cast::<Header>();

        unsafe {
            let next = prev.as_ref().next;

            node.as_ptr().write(Header {
                length,
                previous: Some(prev),
                next,
            });

            if let Some(mut next) = next {
                next.as_mut().previous = Some(node);
            }
            prev.as_mut().next = Some(node);
        }

        self.len += 1;
        node
    }

    /// Unlinks `node`. Its bytes are left untouched and become part of the
    /// gap between its neighbours.
    ///
    /// **SAFETY**: `node` must be a live, non-sentinel node of this chain.
    pub unsafe fn remove(&mut self, node: NonNull<Header>) {
        unsafe {
            let next = node.as_ref().next;
            // Only the sentinel lacks a predecessor and it is never removed.
            let Some(mut prev) = node.as_ref().previous else {
                return;
            };

            prev.as_mut().next = next;
            if let Some(mut next) = next {
                next.as_mut().previous = Some(prev);
            }
        }

        self.len -= 1;
    }

    /// Moves `node` (header and payload, `node.length` bytes) down to `to`
    /// and repairs the links of both neighbours.
    ///
    /// **SAFETY**: `node` must be a live, non-sentinel node and `to` must be
    /// word aligned with `prev_end <= to <= node`, where `prev_end` is the
    /// end of the predecessor's region.
    pub unsafe fn relocate(&mut self, node: NonNull<Header>, to: NonNull<u8>) -> NonNull<Header> {
        unsafe {
            // Read the links before copying, the copy may overwrite `node`.
            let Header { length, previous, next } = node.as_ptr().read();

            // Source and destination may overlap when the gap is shorter
            // than the block.
            std::ptr::copy(node.cast::<u8>().as_ptr(), to.as_ptr(), length);

            let moved = to.cast::<Header>();
            (*moved.as_ptr()).previous = previous;

            if let Some(mut prev) = previous {
                prev.as_mut().next = Some(moved);
            }
            if let Some(mut next) = next {
                next.as_mut().previous = Some(moved);
            }

            moved
        }
    }

    /// Finds the live block whose payload starts at `payload`.
    pub fn find(&self, payload: NonNull<u8>) -> Link<Header> {
        let mut current = self.first();

        while let Some(node) = current {
            if Header::payload(node) == payload {
                return Some(node);
            }
            // Blocks are address ordered, no point in looking further.
            if node.cast::<u8>() > payload {
                return None;
            }
            current = unsafe { node.as_ref().next };
        }

        None
    }

    /// Iterates over live blocks (sentinel excluded) in address order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            current: self.first(),
            remaining: self.len,
            marker: PhantomData,
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = NonNull<Header>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
        }
        self.remaining -= 1;

        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::align_word;

    #[repr(C, align(16))]
    struct Storage([u8; 512]);

    fn chain(storage: &mut Storage) -> (Chain, NonNull<u8>) {
        let base = NonNull::from(&mut storage.0).cast::<u8>();
        (unsafe { Chain::install(base, storage.0.len()) }, base)
    }

    fn links(chain: &Chain, base: NonNull<u8>) -> Vec<(usize, usize)> {
        chain
            .iter()
            .map(|node| unsafe {
                (node.as_ptr() as usize - base.as_ptr() as usize, node.as_ref().length)
            })
            .collect()
    }

    #[test]
    fn new_chain_is_empty() {
        let mut storage = Storage([0; 512]);
        let (chain, _) = chain(&mut storage);

        assert_eq!(chain.len(), 0);
        assert!(chain.is_empty());
        assert!(chain.first().is_none());
        assert!(chain.iter().next().is_none());
        assert_eq!(chain.capacity(), 512);
    }

    #[test]
    fn insert_keeps_both_directions_linked() {
        let mut storage = Storage([0; 512]);
        let (mut chain, base) = chain(&mut storage);
        let len = align_word(HEADER_SIZE + 10);

        unsafe {
            let c = chain.insert_after(chain.sentinel(), base.add(200), len);
            let a = chain.insert_after(chain.sentinel(), base.add(HEADER_SIZE), len);
            let b = chain.insert_after(a, base.add(104), len);

            assert_eq!(links(&chain, base), vec![(HEADER_SIZE, len), (104, len), (200, len)]);
            assert_eq!(a.as_ref().previous, Some(chain.sentinel()));
            assert_eq!(b.as_ref().previous, Some(a));
            assert_eq!(c.as_ref().previous, Some(b));
            assert_eq!(c.as_ref().next, None);
        }
    }

    #[test]
    fn remove_middle_relinks_neighbours() {
        let mut storage = Storage([0; 512]);
        let (mut chain, base) = chain(&mut storage);
        let len = align_word(HEADER_SIZE + 10);

        unsafe {
            let a = chain.insert_after(chain.sentinel(), base.add(HEADER_SIZE), len);
            let b = chain.insert_after(a, base.add(104), len);
            let c = chain.insert_after(b, base.add(200), len);

            chain.remove(b);

            assert_eq!(chain.len(), 2);
            assert_eq!(a.as_ref().next, Some(c));
            assert_eq!(c.as_ref().previous, Some(a));
        }
    }

    #[test]
    fn relocate_moves_payload_and_links() {
        let mut storage = Storage([0; 512]);
        let (mut chain, base) = chain(&mut storage);
        let len = align_word(HEADER_SIZE + 16);

        unsafe {
            let a = chain.insert_after(chain.sentinel(), base.add(HEADER_SIZE), len);
            let b = chain.insert_after(a, base.add(256), len);
            let c = chain.insert_after(b, base.add(400), len);
            Header::payload(b).as_ptr().write_bytes(0x5A, 16);

            let to = Header::end(a);
            let moved = chain.relocate(b, to);

            assert_eq!(moved.cast::<u8>(), to);
            assert_eq!(moved.as_ref().length, len);
            assert_eq!(a.as_ref().next, Some(moved));
            assert_eq!(moved.as_ref().previous, Some(a));
            assert_eq!(moved.as_ref().next, Some(c));
            assert_eq!(c.as_ref().previous, Some(moved));

            let payload = std::slice::from_raw_parts(Header::payload(moved).as_ptr(), 16);
            assert!(payload.iter().all(|&b| b == 0x5A));
        }
    }

    #[test]
    fn find_matches_only_payload_starts() {
        let mut storage = Storage([0; 512]);
        let (mut chain, base) = chain(&mut storage);
        let len = align_word(HEADER_SIZE + 10);

        unsafe {
            let a = chain.insert_after(chain.sentinel(), base.add(HEADER_SIZE), len);

            assert_eq!(chain.find(Header::payload(a)), Some(a));
            assert_eq!(chain.find(a.cast()), None);
            assert_eq!(chain.find(Header::payload(a).add(1)), None);
        }
    }
}
