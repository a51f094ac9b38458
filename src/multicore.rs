//! # Cross-Core Queues
//!
//! Requests travel between cores over one bounded FIFO per ordered pair of
//! cores, so two requests sent from core A to core B are served in the order
//! they were sent. The queues are fixed-capacity ring buffers: a full queue
//! is reported to the sender, never grown.
//!
//! ```text
//!           to 0    to 1    to 2    to 3
//! from 0     -     [....]  [....]  [....]
//! from 1  [....]     -     [....]  [....]
//!  ...
//! ```

use crate::config::{CROSS_CORE_QUEUE_DEPTH, MAX_CORES};
use crate::syscall::SyscallRequest;
use crate::types::CoreId;

/// Fixed-capacity FIFO ring buffer.
#[derive(Debug, Clone, Copy)]
pub struct BoundedQueue<T: Copy, const N: usize> {
    slots: [Option<T>; N],
    head: usize,
    len: usize,
}

impl<T: Copy, const N: usize> BoundedQueue<T, N> {
    pub const fn new() -> Self {
        Self {
            slots: [None; N],
            head: 0,
            len: 0,
        }
    }

    /// Append `item`, handing it back if the queue is full.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.len == N {
            return Err(item);
        }
        self.slots[(self.head + self.len) % N] = Some(item);
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % N;
        self.len -= 1;
        item
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }
}

impl<T: Copy, const N: usize> Default for BoundedQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A request in flight from one core to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossCoreMessage {
    pub from: CoreId,
    pub to: CoreId,
    pub request: SyscallRequest,
}

/// One FIFO per ordered pair of cores.
pub struct Links {
    queues: [[BoundedQueue<CrossCoreMessage, CROSS_CORE_QUEUE_DEPTH>; MAX_CORES]; MAX_CORES],
}

impl Links {
    pub fn new() -> Self {
        Self {
            queues: [[BoundedQueue::new(); MAX_CORES]; MAX_CORES],
        }
    }

    /// Queue `message` on its `from → to` link.
    pub fn push(&mut self, message: CrossCoreMessage) -> Result<(), CrossCoreMessage> {
        self.queues[message.from.index()][message.to.index()].push(message)
    }

    pub fn pop(&mut self, from: CoreId, to: CoreId) -> Option<CrossCoreMessage> {
        self.queues[from.index()][to.index()].pop()
    }

    pub fn pending(&self, from: CoreId, to: CoreId) -> usize {
        self.queues[from.index()][to.index()].len()
    }
}

impl Default for Links {
    fn default() -> Self {
        Self::new()
    }
}
