use std::ptr::NonNull;

use tracing::trace;

use crate::{block::Header, gaps::offset_of, list::Chain};

/// A block moved by [`crate::Pool::defragment_with`].
///
/// Both addresses are payload addresses, the ones handed out by
/// [`crate::Pool::allocate`]. `from` is no longer valid once reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Payload address before the move.
    pub from: NonNull<u8>,
    /// Payload address after the move.
    pub to: NonNull<u8>,
    /// Length of the moved block, header included.
    pub length: usize,
}

/// Summary of a compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Compaction {
    /// Number of blocks that changed address.
    pub blocks_moved: usize,
    /// Bytes copied, headers included.
    pub bytes_moved: usize,
}

/// Slides every live block down towards the sentinel so that no gap is left
/// between them and all the free space ends up in the tail gap.
///
/// ```text
/// before:  | S | A |   | B |      | C |          |
/// after:   | S | A | B | C |                      |
/// ```
///
/// Blocks keep their relative order and their lengths. A block that is
/// already in place is not copied.
pub(crate) fn compact<F>(chain: &mut Chain, mut on_move: F) -> Compaction
where
    F: FnMut(Relocation),
{
    let mut summary = Compaction::default();
    // Write cursor, first byte after the last block already in place.
    let mut pos = Header::payload(chain.sentinel());
    let mut current = chain.first();

    while let Some(node) = current {
        // Captured before the move, which may overwrite `node` itself.
        let (next, length) = unsafe { (node.as_ref().next, node.as_ref().length) };

        let placed = if node.cast::<u8>() > pos {
            trace!(
                from = offset_of(chain, node.cast()),
                to = offset_of(chain, pos),
                length,
                "moving block"
            );

            let moved = unsafe { chain.relocate(node, pos) };

            summary.blocks_moved += 1;
            summary.bytes_moved += length;
            on_move(Relocation {
                from: Header::payload(node),
                to: Header::payload(moved),
                length,
            });

            moved
        } else {
            node
        };

        pos = unsafe { Header::end(placed) };
        current = next;
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::HEADER_SIZE, utils::align_word};

    #[repr(C, align(16))]
    struct Storage([u8; 512]);

    fn offsets(chain: &Chain) -> Vec<usize> {
        chain.iter().map(|node| offset_of(chain, node.cast())).collect()
    }

    #[test]
    fn compacting_packed_chain_is_noop() {
        let mut storage = Storage([0; 512]);
        let base = NonNull::from(&mut storage.0).cast::<u8>();
        let mut chain = unsafe { Chain::install(base, 512) };
        let len = align_word(HEADER_SIZE + 8);

        unsafe {
            let a = chain.insert_after(chain.sentinel(), base.add(HEADER_SIZE), len);
            chain.insert_after(a, base.add(HEADER_SIZE + len), len);
        }

        let mut moves = 0;
        let summary = compact(&mut chain, |_| moves += 1);

        assert_eq!(summary, Compaction::default());
        assert_eq!(moves, 0);
        assert_eq!(offsets(&chain), vec![HEADER_SIZE, HEADER_SIZE + len]);
    }

    #[test]
    fn compacting_slides_blocks_in_order() {
        let mut storage = Storage([0; 512]);
        let base = NonNull::from(&mut storage.0).cast::<u8>();
        let mut chain = unsafe { Chain::install(base, 512) };
        let small = align_word(HEADER_SIZE + 8);
        let big = align_word(HEADER_SIZE + 64);

        unsafe {
            let a = chain.insert_after(chain.sentinel(), base.add(HEADER_SIZE + 2 * small), big);
            let b = chain.insert_after(a, base.add(HEADER_SIZE + 2 * small + big + 8 * small), small);
            Header::payload(a).as_ptr().write_bytes(0xA1, 64);
            Header::payload(b).as_ptr().write_bytes(0xB2, 8);
        }

        let mut relocations = Vec::new();
        let summary = compact(&mut chain, |moved| relocations.push(moved));

        assert_eq!(summary.blocks_moved, 2);
        assert_eq!(summary.bytes_moved, big + small);
        assert_eq!(offsets(&chain), vec![HEADER_SIZE, HEADER_SIZE + big]);
        assert_eq!(relocations.len(), 2);
        assert_eq!(offset_of(&chain, relocations[0].to), 2 * HEADER_SIZE);
        assert_eq!(relocations[1].length, small);

        let nodes: Vec<_> = chain.iter().collect();
        unsafe {
            assert_eq!(nodes[1].as_ref().previous, Some(nodes[0]));
            assert_eq!(nodes[0].as_ref().previous, Some(chain.sentinel()));

            let a = std::slice::from_raw_parts(Header::payload(nodes[0]).as_ptr(), 64);
            let b = std::slice::from_raw_parts(Header::payload(nodes[1]).as_ptr(), 8);
            assert!(a.iter().all(|&byte| byte == 0xA1));
            assert!(b.iter().all(|&byte| byte == 0xB2));
        }
    }
}
