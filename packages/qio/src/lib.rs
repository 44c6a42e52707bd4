//! Bounded queues of block chains with flow control, for moving bytes and datagrams between
//! interrupt handlers, kernel threads and blocked processes.
//!
//! A [`Queue`] decouples a producer from a consumer running in a different execution context.
//! The non-blocking entry points ([`Queue::produce`], [`Queue::pass`], [`Queue::iwrite`],
//! [`Queue::get`], [`Queue::consume`]) never sleep and are safe to call from interrupt or
//! driver-callback context. The blocking entry points ([`Queue::write`], [`Queue::bwrite`],
//! [`Queue::read`], [`Queue::bread`]) are for process context and wait for room or data.

#[macro_use]
extern crate tracing;

pub extern crate blocklist;

mod config;
mod queue;
mod stats;

pub use crate::{
    config::{QueueBuilder, EOF_READS, MAX_ATOMIC, PRINT_BACKLOG},
    queue::{Bypass, Kick, Mode, Queue, State, HUNG_UP},
    stats::Stats,
};

/// Error types
pub mod error;
