//! Buffers with read and write cursors, and chains of them.
//!
//! A [`Block`] is the smallest unit of queued data: one contiguous allocation with a read cursor
//! and a write cursor. A [`Chain`] is an ordered sequence of blocks representing one logical
//! write or message. Chains are owned exclusively and move wholesale between owners; dropping a
//! chain frees its blocks.
//!
//! Blocks come from an [`Allocator`], which has a sleeping path for process context and a
//! non-sleeping, fallible path for interrupt context.

#[macro_use]
extern crate tracing;

pub extern crate bytes;

mod alloc;
mod block;
mod chain;

pub use crate::{
    alloc::{AllocError, Allocator, Budget, Heap},
    block::{Block, HDR_SPACE},
    chain::{Chain, ChainError},
};
