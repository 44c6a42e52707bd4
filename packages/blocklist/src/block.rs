// single buffer with read and write cursors.

use bytes::{Bytes, BytesMut};
use std::{
    fmt::{self, Debug, Formatter},
    ops::{Deref, DerefMut},
};

/// Bytes of headroom an allocator leaves in front of the read cursor of a fresh block.
///
/// This lets protocol layers prepend small headers with [`Chain::pad`](crate::Chain::pad)
/// without reallocating.
pub const HDR_SPACE: usize = 64;

/// Contiguous buffer with a read cursor and a write cursor.
///
/// The backing storage spans `[0, alloc_len)`. The readable bytes are `[rp, wp)`, the space in
/// front of `rp` is headroom and the space behind `wp` is tailroom. The whole storage counts
/// towards the block's footprint, not only the readable bytes.
pub struct Block {
    // every byte of storage is initialized. its length is the block's capacity.
    storage: BytesMut,
    // invariant: rp <= wp <= storage.len()
    rp: usize,
    wp: usize,
}

impl Block {
    /// Construct from raw storage, placing both cursors at `headroom`.
    ///
    /// The current length of `storage` becomes the block's capacity. This is how [`Allocator`]
    /// implementations hand out blocks.
    ///
    /// Panics if `headroom` exceeds the storage length.
    ///
    /// [`Allocator`]: crate::Allocator
    pub fn from_storage(storage: BytesMut, headroom: usize) -> Self {
        assert!(headroom <= storage.len(), "block headroom exceeds storage");
        Block { storage, rp: headroom, wp: headroom }
    }

    /// Construct a block whose readable bytes are a copy of `data`, with no head or tail room.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Block { storage: BytesMut::from(data), rp: 0, wp: data.len() }
    }

    /// Number of readable bytes.
    pub fn len(&self) -> usize {
        self.wp - self.rp
    }

    /// Whether there are no readable bytes.
    pub fn is_empty(&self) -> bool {
        self.rp == self.wp
    }

    /// Footprint of the block: its entire storage, readable or not.
    pub fn alloc_len(&self) -> usize {
        self.storage.len()
    }

    /// Free space in front of the read cursor.
    pub fn headroom(&self) -> usize {
        self.rp
    }

    /// Free space behind the write cursor.
    pub fn tailroom(&self) -> usize {
        self.storage.len() - self.wp
    }

    /// Copy as much of `data` as fits into the tailroom, advancing the write cursor. Returns the
    /// number of bytes copied.
    pub fn put_slice(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.tailroom());
        self.storage[self.wp..self.wp + n].copy_from_slice(&data[..n]);
        self.wp += n;
        n
    }

    /// Append up to `n` zero bytes into the tailroom. Returns the number of bytes appended.
    pub fn put_zeros(&mut self, n: usize) -> usize {
        let n = n.min(self.tailroom());
        self.storage[self.wp..self.wp + n].fill(0);
        self.wp += n;
        n
    }

    /// Move the read cursor forward past `n` readable bytes.
    ///
    /// Panics if fewer than `n` bytes are readable.
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.len(), "advance past end of block");
        self.rp += n;
    }

    /// Shorten the readable bytes to `len`. Has no effect if already that short.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len() {
            self.wp = self.rp + len;
        }
    }

    /// Force the readable length to exactly `len` without reallocating, zero-filling any growth.
    ///
    /// Panics if `len` does not fit between the read cursor and the end of storage.
    pub fn set_len(&mut self, len: usize) {
        assert!(self.rp + len <= self.storage.len(), "block length exceeds capacity");
        if len > self.len() {
            self.storage[self.wp..self.rp + len].fill(0);
        }
        self.wp = self.rp + len;
    }

    // move the read cursor back over n bytes of headroom, zeroing them.
    pub(crate) fn extend_front(&mut self, n: usize) {
        assert!(n <= self.rp, "extend past start of block");
        self.rp -= n;
        self.storage[self.rp..self.rp + n].fill(0);
    }

    /// Detach the first `at` readable bytes into their own block without copying.
    ///
    /// The returned block keeps this block's headroom; this block keeps the rest of the storage.
    /// Panics if fewer than `at` bytes are readable.
    pub fn split_to(&mut self, at: usize) -> Block {
        assert!(at <= self.len(), "split past end of block");
        let cut = self.rp + at;
        let head = Block { storage: self.storage.split_to(cut), rp: self.rp, wp: cut };
        self.rp = 0;
        self.wp -= cut;
        head
    }

    /// Convert the readable bytes into an immutable [`Bytes`] without copying.
    pub fn freeze(self) -> Bytes {
        self.storage.freeze().slice(self.rp..self.wp)
    }
}

impl Deref for Block {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.storage[self.rp..self.wp]
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.storage[self.rp..self.wp]
    }
}

impl From<&[u8]> for Block {
    fn from(data: &[u8]) -> Self {
        Block::copy_from_slice(data)
    }
}

impl From<Vec<u8>> for Block {
    fn from(data: Vec<u8>) -> Self {
        let wp = data.len();
        match Bytes::from(data).try_into_mut() {
            Ok(storage) => Block { storage, rp: 0, wp },
            // a freshly converted vec is always unique, but copying is still correct
            Err(bytes) => Block::copy_from_slice(&bytes),
        }
    }
}

impl Debug for Block {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .finish()
    }
}
