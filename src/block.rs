use std::{mem, ptr::NonNull};

use crate::{list::Link, utils::align};

/// Machine word size in bytes. Every block length and every header address
/// inside a pool is a multiple of this.
pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// Size of the metadata record placed at the start of every managed region,
/// including the sentinel.
pub const HEADER_SIZE: usize = align(mem::size_of::<Header>(), WORD_SIZE);

/// This is the structure of a block header. It lives inside the pool itself,
/// right before the payload handed out to the caller.
///
/// ```text
/// +---------------------+ <------+
/// |       length        |        |
/// +---------------------+        |
/// |      previous       |        | -> Header (HEADER_SIZE bytes)
/// +---------------------+        |
/// |        next         |        |
/// +---------------------+ <------+ <- pointer returned by `allocate`
/// |       Payload       |        |
/// |         ...         |        | -> length - HEADER_SIZE bytes
/// |                     |        |
/// +---------------------+ <------+
/// ```
///
/// `length` covers the header too and is always word aligned, so the header
/// of the following block (or the next gap) also starts on a word boundary.
///
/// The very first header of a pool is the sentinel. Its `length` is
/// `capacity - HEADER_SIZE`: it describes the bounds of the pool rather than
/// an allocation and is never freed or moved.
#[repr(C)]
pub(crate) struct Header {
    /// Total size of the region, header included.
    pub length: usize,
    /// Address-ordered predecessor. `None` only for the sentinel.
    pub previous: Link<Header>,
    /// Address-ordered successor. `None` for the last block.
    pub next: Link<Header>,
}

impl Header {
    /// Address of the payload that follows `header`.
    #[inline]
    pub fn payload(header: NonNull<Header>) -> NonNull<u8> {
        // SAFETY: every header is followed by at least its own payload range
        // inside the pool, so the offset stays within the same allocation.
        unsafe { header.cast::<u8>().add(HEADER_SIZE) }
    }

    /// First byte after the region described by `header`.
    ///
    /// **SAFETY**: `header` must point to a live, initialized header that is
    /// not the sentinel.
    #[inline]
    pub unsafe fn end(header: NonNull<Header>) -> NonNull<u8> {
        unsafe { header.cast::<u8>().add(header.as_ref().length) }
    }

    /// Number of usable bytes in the block.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.length - HEADER_SIZE
    }
}
