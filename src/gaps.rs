use std::ptr::NonNull;

use crate::{
    block::{HEADER_SIZE, Header},
    list::{Chain, Link},
};

/// Unallocated range between two address-adjacent headers, or between the
/// last header and the end of the pool.
///
/// ```text
///          Gap                 Gap (tail)
///       +-------+          +---------------+
///       |       |          |               |
/// +----------+---+-------+---+---------------+
/// | Sentinel | A |       | B |               |
/// +----------+---+-------+---+---------------+
/// ```
///
/// Freed blocks don't need any bookkeeping of their own: once a header is
/// unlinked its bytes simply widen the gap between its neighbours. That is
/// why gaps are never stored, only computed by walking the headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    /// Distance in bytes from the start of the pool.
    pub offset: usize,
    /// Size of the gap in bytes.
    pub size: usize,
}

/// A gap together with the header it follows, which is where a new block
/// placed in it has to be linked.
pub(crate) struct Fit {
    pub after: NonNull<Header>,
    pub start: NonNull<u8>,
    pub size: usize,
}

/// Walks every gap of the chain in address order, zero sized ones included,
/// ending with the tail gap.
pub(crate) struct Gaps<'a> {
    chain: &'a Chain,
    /// Header whose region ends where the next gap begins.
    current: Link<Header>,
    /// First byte after `current`'s region.
    pos: NonNull<u8>,
}

impl<'a> Gaps<'a> {
    pub fn new(chain: &'a Chain) -> Self {
        let sentinel = chain.sentinel();

        // The sentinel only occupies its header, its `length` describes the
        // whole pool instead of its own region.
        Self {
            chain,
            current: Some(sentinel),
            pos: Header::payload(sentinel),
        }
    }
}

impl Iterator for Gaps<'_> {
    type Item = Fit;

    fn next(&mut self) -> Option<Fit> {
        let current = self.current?;

        unsafe {
            let fit = match current.as_ref().next {
                Some(next) => {
                    let size = next.cast::<u8>().offset_from(self.pos) as usize;
                    let fit = Fit { after: current, start: self.pos, size };

                    self.pos = Header::end(next);
                    self.current = Some(next);
                    fit
                }
                None => {
                    let end = self.chain.sentinel().cast::<u8>().add(self.chain.capacity());
                    let size = end.offset_from(self.pos) as usize;

                    self.current = None;
                    Fit { after: current, start: self.pos, size }
                }
            };

            Some(fit)
        }
    }
}

/// Returns the earliest gap, by address, able to hold `adjusted_len` bytes.
///
/// This is the first-fit policy: a later, larger gap is never preferred
/// over an earlier one that is big enough.
pub(crate) fn find_first_fit(chain: &Chain, adjusted_len: usize) -> Option<Fit> {
    Gaps::new(chain).find(|fit| fit.size >= adjusted_len)
}

/// Offset of `addr` from the start of the pool.
#[inline]
pub(crate) fn offset_of(chain: &Chain, addr: NonNull<u8>) -> usize {
    addr.as_ptr() as usize - chain.sentinel().as_ptr() as usize
}

/// Bytes a request of `len` payload bytes will occupy in the pool, or `None`
/// if the arithmetic would overflow.
#[inline]
pub(crate) fn adjusted_length(len: usize) -> Option<usize> {
    len.checked_add(HEADER_SIZE)
        .and_then(crate::utils::checked_align_word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::WORD_SIZE, utils::align_word};

    #[repr(C, align(16))]
    struct Storage([u8; 256]);

    #[test]
    fn empty_chain_has_one_tail_gap() {
        let mut storage = Storage([0; 256]);
        let base = NonNull::from(&mut storage.0).cast::<u8>();
        let chain = unsafe { Chain::install(base, 256) };

        let gaps: Vec<_> = Gaps::new(&chain)
            .map(|fit| (offset_of(&chain, fit.start), fit.size))
            .collect();

        assert_eq!(gaps, vec![(HEADER_SIZE, 256 - HEADER_SIZE)]);
    }

    #[test]
    fn first_fit_prefers_earliest_sufficient_gap() {
        let mut storage = Storage([0; 256]);
        let base = NonNull::from(&mut storage.0).cast::<u8>();
        let mut chain = unsafe { Chain::install(base, 256) };
        let len = align_word(HEADER_SIZE + 8);

        unsafe {
            // [sentinel][gap 2*len][A][gap len][B][tail]
            let a = chain.insert_after(chain.sentinel(), base.add(HEADER_SIZE + 2 * len), len);
            chain.insert_after(a, base.add(HEADER_SIZE + 4 * len), len);
        }

        let fit = find_first_fit(&chain, len).expect("gap available");
        assert_eq!(offset_of(&chain, fit.start), HEADER_SIZE);
        assert_eq!(fit.after, chain.sentinel());

        let fit = find_first_fit(&chain, 2 * len).expect("gap available");
        assert_eq!(offset_of(&chain, fit.start), HEADER_SIZE);

        // Only the tail can hold this one.
        let fit = find_first_fit(&chain, 2 * len + WORD_SIZE).expect("tail available");
        assert_eq!(offset_of(&chain, fit.start), HEADER_SIZE + 5 * len);

        assert!(find_first_fit(&chain, 256).is_none());
    }

    #[test]
    fn adjusted_length_rejects_overflow() {
        assert_eq!(adjusted_length(0), Some(HEADER_SIZE));
        assert_eq!(adjusted_length(1), Some(align_word(HEADER_SIZE + 1)));
        assert_eq!(adjusted_length(usize::MAX), None);
        assert_eq!(adjusted_length(usize::MAX - HEADER_SIZE), None);
    }
}
