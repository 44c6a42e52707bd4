// chains of blocks, and the operations on them.

use crate::{
    alloc::{AllocError, Allocator},
    block::Block,
};
use std::{
    collections::VecDeque,
    fmt::{self, Debug, Formatter},
    mem,
};
use thiserror::Error;

/// Error for chain operations that need more bytes than the chain holds, or that fail to
/// allocate.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChainError {
    /// A replacement block could not be allocated
    #[error(transparent)]
    Alloc(#[from] AllocError),
    /// The chain is shorter than the operation requires. The chain has been dropped.
    #[error("too few bytes")]
    TooFewBytes,
}

/// Ordered sequence of [`Block`]s forming one logical unit of data.
///
/// Unlike a flat byte buffer, block boundaries are preserved and every block keeps its own
/// footprint, which is what flow control accounts against. Zero-length blocks are allowed.
///
/// Operations that may need to copy take the [`Allocator`] to copy into. Operations documented
/// as single-block panic when called on any other chain: knowing which operations require an
/// unchained block is the caller's responsibility.
#[derive(Default)]
pub struct Chain {
    blocks: VecDeque<Block>,
}

impl Chain {
    /// Construct empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain holding a copy of `data`, in blocks of at most `max_block` bytes.
    ///
    /// Always produces at least one block, so empty `data` yields a single zero-length block.
    pub fn from_slice<A>(data: &[u8], max_block: usize, alloc: &A) -> Result<Chain, AllocError>
    where
        A: Allocator + ?Sized,
    {
        assert!(max_block > 0, "from_slice with zero max_block");
        let mut chain = Chain::new();
        if data.is_empty() {
            chain.push_back(alloc.alloc(0)?);
        }
        for chunk in data.chunks(max_block) {
            let mut block = alloc.alloc(chunk.len())?;
            block.put_slice(chunk);
            chain.push_back(block);
        }
        Ok(chain)
    }

    /// Sum of readable bytes across all blocks.
    pub fn len(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    /// Whether there are no readable bytes, regardless of how many blocks there are.
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(Block::is_empty)
    }

    /// Sum of footprints across all blocks.
    pub fn alloc_len(&self) -> usize {
        self.blocks.iter().map(Block::alloc_len).sum()
    }

    /// Number of blocks, including zero-length ones.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Iterate over blocks from front to back.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Convert into an iterator over blocks from front to back.
    pub fn into_blocks(self) -> impl Iterator<Item = Block> {
        self.blocks.into_iter()
    }

    /// First block, if any.
    pub fn front(&self) -> Option<&Block> {
        self.blocks.front()
    }

    pub fn push_back(&mut self, block: Block) {
        self.blocks.push_back(block);
    }

    pub fn push_front(&mut self, block: Block) {
        self.blocks.push_front(block);
    }

    pub fn pop_front(&mut self) -> Option<Block> {
        self.blocks.pop_front()
    }

    /// Move all of `other`'s blocks onto the back of this chain.
    pub fn append(&mut self, mut other: Chain) {
        self.blocks.append(&mut other.blocks);
    }

    /// Copy out all readable bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for block in &self.blocks {
            out.extend_from_slice(block);
        }
        out
    }

    // unwrap a chain that must consist of exactly one block.
    fn into_single(mut self, op: &str) -> Block {
        assert_eq!(self.blocks.len(), 1, "{} on a chain of {} blocks", op, self.blocks.len());
        match self.blocks.pop_front() {
            Some(block) => block,
            None => unreachable!(),
        }
    }

    /// Reserve `n` bytes of space in a single-block chain.
    ///
    /// If `n` is non-negative, the read cursor is moved back over `n` zeroed bytes, which become
    /// readable. If `n` is negative, at least `-n` bytes of tailroom are guaranteed. Either way,
    /// the block is reallocated and its data copied if it lacks the room.
    ///
    /// Panics unless the chain has exactly one block.
    pub fn pad<A>(self, n: isize, alloc: &A) -> Result<Chain, AllocError>
    where
        A: Allocator + ?Sized,
    {
        let mut block = self.into_single("pad");
        let size = n.unsigned_abs();
        if n >= 0 {
            if block.headroom() >= size {
                block.extend_front(size);
                return Ok(block.into());
            }
            let mut padded = alloc.alloc(size.saturating_add(block.len()))?;
            padded.put_zeros(size);
            padded.put_slice(&block);
            trace!(bytes = block.len(), "pad reallocated block");
            Ok(padded.into())
        } else {
            if block.tailroom() >= size {
                return Ok(block.into());
            }
            let mut padded = alloc.alloc(size.saturating_add(block.len()))?;
            padded.put_slice(&block);
            trace!(bytes = block.len(), "pad reallocated block");
            Ok(padded.into())
        }
    }

    /// Copy the whole chain into one freshly sized block, dropping the originals.
    ///
    /// A chain that is already a single block is returned as is.
    pub fn concat<A>(self, alloc: &A) -> Result<Block, AllocError>
    where
        A: Allocator + ?Sized,
    {
        let mut blocks = self.blocks;
        if blocks.len() == 1 {
            if let Some(block) = blocks.pop_front() {
                return Ok(block);
            }
        }
        let len = blocks.iter().map(Block::len).sum();
        let mut out = alloc.alloc(len)?;
        for block in &blocks {
            out.put_slice(block);
        }
        trace!(bytes = out.len(), "concat");
        Ok(out)
    }

    /// Guarantee that the first block holds at least `n` contiguous readable bytes.
    ///
    /// Bytes are copied forward from the following blocks, which are dropped once exhausted. If
    /// the first block lacks the capacity, a new first block is allocated in front of it. Errors,
    /// dropping the chain, if the chain holds fewer than `n` bytes.
    pub fn pullup<A>(mut self, n: usize, alloc: &A) -> Result<Chain, ChainError>
    where
        A: Allocator + ?Sized,
    {
        if n == 0 || self.blocks.front().is_some_and(|head| head.len() >= n) {
            return Ok(self);
        }
        if self.len() < n {
            return Err(ChainError::TooFewBytes);
        }
        let Some(mut head) = self.blocks.pop_front() else { return Err(ChainError::TooFewBytes) };
        if head.len() + head.tailroom() < n {
            // not enough room in the first block, so put a new one in front of it
            self.blocks.push_front(head);
            head = alloc.alloc(n)?;
        }

        let mut copied = 0;
        while head.len() < n {
            let Some(next) = self.blocks.front_mut() else { break };
            let take = (n - head.len()).min(next.len());
            head.put_slice(&next[..take]);
            next.advance(take);
            copied += take;
            if next.is_empty() {
                self.blocks.pop_front();
            }
        }
        trace!(bytes = copied, "pullup");
        self.blocks.push_front(head);
        Ok(self)
    }

    /// Reduce the chain to exactly the bytes in `[offset, offset + len)`.
    ///
    /// Leading and trailing blocks outside the range are dropped. Errors, dropping the chain, if
    /// the chain is shorter than `offset + len`.
    pub fn trim(mut self, offset: usize, len: usize) -> Result<Chain, ChainError> {
        let end = offset.checked_add(len).ok_or(ChainError::TooFewBytes)?;
        if self.len() < end {
            return Err(ChainError::TooFewBytes);
        }
        self.discard(offset);

        let mut remaining = len;
        let mut keep = 0;
        for block in self.blocks.iter_mut() {
            keep += 1;
            if block.len() >= remaining {
                block.truncate(remaining);
                break;
            }
            remaining -= block.len();
        }
        self.blocks.truncate(keep);
        Ok(self)
    }

    /// Copy the first `n` bytes into a new block, zero-padding if the chain is shorter. The
    /// chain is untouched.
    pub fn copy<A>(&self, n: usize, alloc: &A) -> Result<Block, AllocError>
    where
        A: Allocator + ?Sized,
    {
        let mut out = alloc.alloc(n)?;
        for block in &self.blocks {
            let want = n - out.len();
            if want == 0 {
                break;
            }
            out.put_slice(&block[..want.min(block.len())]);
        }
        let copied = out.len();
        out.put_zeros(n - copied);
        trace!(bytes = copied, "copy");
        Ok(out)
    }

    /// Force the readable length of a single-block chain to exactly `len`.
    ///
    /// Shrinking truncates, growing zero-fills, and growing beyond the block's capacity
    /// reallocates and copies.
    ///
    /// Panics unless the chain has exactly one block.
    pub fn adjust<A>(self, len: usize, alloc: &A) -> Result<Chain, AllocError>
    where
        A: Allocator + ?Sized,
    {
        let mut block = self.into_single("adjust");
        if block.headroom() + len > block.alloc_len() {
            let grown = Chain::from(block).copy(len, alloc)?;
            return Ok(grown.into());
        }
        block.set_len(len);
        Ok(block.into())
    }

    /// Drop up to `count` bytes from the front, dropping blocks as they are exhausted. Returns
    /// the number of bytes dropped.
    pub fn discard(&mut self, mut count: usize) -> usize {
        let mut discarded = 0;
        while count > 0 {
            let Some(front) = self.blocks.front_mut() else { break };
            let n = front.len().min(count);
            front.advance(n);
            discarded += n;
            count -= n;
            if front.is_empty() {
                self.blocks.pop_front();
            }
        }
        discarded
    }

    /// Reallocate every block whose readable bytes are under a quarter of its footprint into a
    /// right-sized one.
    pub fn pack<A>(self, alloc: &A) -> Result<Chain, AllocError>
    where
        A: Allocator + ?Sized,
    {
        let mut packed = Chain::new();
        for block in self.blocks {
            if block.len().saturating_mul(4) < block.alloc_len() {
                let mut smaller = alloc.alloc(block.len())?;
                smaller.put_slice(&block);
                trace!(bytes = smaller.len(), from = block.alloc_len(), "pack");
                packed.push_back(smaller);
            } else {
                packed.push_back(block);
            }
        }
        Ok(packed)
    }

    /// Copy bytes from the front of the chain into `buf`, dropping blocks as they are emptied.
    /// Returns the number of bytes copied.
    ///
    /// Whatever does not fit stays in the chain. Zero-length blocks are dropped when reached.
    pub fn read_into(&mut self, mut buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while let Some(front) = self.blocks.front_mut() {
            if front.len() > buf.len() {
                let n = buf.len();
                buf.copy_from_slice(&front[..n]);
                front.advance(n);
                copied += n;
                break;
            }
            let n = front.len();
            let (dst, rest) = mem::take(&mut buf).split_at_mut(n);
            dst.copy_from_slice(front);
            buf = rest;
            copied += n;
            self.blocks.pop_front();
        }
        copied
    }

    /// Detach the first `n` readable bytes as their own chain, splitting a block without copying
    /// if the boundary falls inside it.
    ///
    /// Panics if fewer than `n` bytes are readable.
    pub fn split_to(&mut self, mut n: usize) -> Chain {
        assert!(n <= self.len(), "split past end of chain");
        let mut head = Chain::new();
        while n > 0 {
            let Some(front) = self.blocks.front_mut() else { break };
            if front.len() > n {
                head.push_back(front.split_to(n));
                break;
            }
            n -= front.len();
            if let Some(block) = self.blocks.pop_front() {
                head.push_back(block);
            }
        }
        head
    }
}

impl From<Block> for Chain {
    fn from(block: Block) -> Self {
        let mut chain = Chain::new();
        chain.push_back(block);
        chain
    }
}

impl FromIterator<Block> for Chain {
    fn from_iter<I: IntoIterator<Item = Block>>(blocks: I) -> Self {
        Chain { blocks: blocks.into_iter().collect() }
    }
}

impl Extend<Block> for Chain {
    fn extend<I: IntoIterator<Item = Block>>(&mut self, blocks: I) {
        self.blocks.extend(blocks);
    }
}

impl PartialEq<[u8]> for Chain {
    fn eq(&self, mut rhs: &[u8]) -> bool {
        if self.len() != rhs.len() {
            return false;
        }
        for block in &self.blocks {
            let (rhs1, rhs2) = rhs.split_at(block.len());
            if &block[..] != rhs1 {
                return false;
            }
            rhs = rhs2;
        }
        true
    }
}

impl Debug for Chain {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_list().entries(self.blocks.iter()).finish()
    }
}
