//! # Ready Queues
//!
//! A core's ready queue holds *activation records*, not tasks: a task with
//! three pending activations occupies three records. Both implementations
//! order records by priority and, within a priority, by insertion time, with
//! one exception: a preempted task is put back at the *head* of its tier so
//! that it resumes before anything activated after it.
//!
//! | Algorithm            | push_back | pop_highest | Memory              |
//! |----------------------|-----------|-------------|---------------------|
//! | [`ClzQueue`]         | O(1)      | O(1)        | bitmap + head/tail per priority |
//! | [`LinkedQueue`]      | O(n)      | O(1)        | one sorted chain    |
//!
//! The algorithm is picked once from [`QueueAlgorithm`] when the core is
//! built; callers only see [`ReadyQueue`].

mod clz;
mod linked;

pub use clz::ClzQueue;
pub use linked::LinkedQueue;

use crate::config::{QueueAlgorithm, MAX_ACTIVATION_LINKS};
use crate::types::{Priority, TaskId};

/// The record pool has no free slot left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// Index of an activation record in a [`RecordPool`].
type Link = u8;

/// Fixed pool of activation records threaded into singly linked chains.
#[derive(Debug, Clone)]
struct RecordPool {
    task: [TaskId; MAX_ACTIVATION_LINKS],
    priority: [Priority; MAX_ACTIVATION_LINKS],
    next: [Option<Link>; MAX_ACTIVATION_LINKS],
    free: Option<Link>,
    used: usize,
}

impl RecordPool {
    fn new() -> Self {
        let mut next = [None; MAX_ACTIVATION_LINKS];
        for (i, slot) in next.iter_mut().enumerate().take(MAX_ACTIVATION_LINKS - 1) {
            *slot = Some((i + 1) as Link);
        }
        Self {
            task: [TaskId(0); MAX_ACTIVATION_LINKS],
            priority: [Priority::LOWEST; MAX_ACTIVATION_LINKS],
            next,
            free: Some(0),
            used: 0,
        }
    }

    fn alloc(&mut self, task: TaskId, priority: Priority) -> Result<Link, QueueFull> {
        let link = self.free.ok_or(QueueFull)?;
        let i = link as usize;
        self.free = self.next[i];
        self.task[i] = task;
        self.priority[i] = priority;
        self.next[i] = None;
        self.used += 1;
        Ok(link)
    }

    fn release(&mut self, link: Link) {
        self.next[link as usize] = self.free;
        self.free = Some(link);
        self.used -= 1;
    }

    #[inline]
    fn entry(&self, link: Link) -> (TaskId, Priority) {
        (self.task[link as usize], self.priority[link as usize])
    }
}

/// A core's set of ready activation records.
#[derive(Debug, Clone)]
pub enum ReadyQueue {
    Clz(ClzQueue),
    Linked(LinkedQueue),
}

impl ReadyQueue {
    pub fn new(algorithm: QueueAlgorithm) -> Self {
        match algorithm {
            QueueAlgorithm::Clz => ReadyQueue::Clz(ClzQueue::new()),
            QueueAlgorithm::Linked => ReadyQueue::Linked(LinkedQueue::new()),
        }
    }

    /// Queue a new activation behind all records of equal priority.
    pub fn push_back(&mut self, task: TaskId, priority: Priority) -> Result<(), QueueFull> {
        match self {
            ReadyQueue::Clz(q) => q.push_back(task, priority),
            ReadyQueue::Linked(q) => q.push_back(task, priority),
        }
    }

    /// Queue a preempted task ahead of all records of equal priority.
    pub fn push_front(&mut self, task: TaskId, priority: Priority) -> Result<(), QueueFull> {
        match self {
            ReadyQueue::Clz(q) => q.push_front(task, priority),
            ReadyQueue::Linked(q) => q.push_front(task, priority),
        }
    }

    pub fn peek_highest(&self) -> Option<(TaskId, Priority)> {
        match self {
            ReadyQueue::Clz(q) => q.peek_highest(),
            ReadyQueue::Linked(q) => q.peek_highest(),
        }
    }

    pub fn pop_highest(&mut self) -> Option<(TaskId, Priority)> {
        match self {
            ReadyQueue::Clz(q) => q.pop_highest(),
            ReadyQueue::Linked(q) => q.pop_highest(),
        }
    }

    /// Drop every record of `task`. Returns how many were removed.
    pub fn remove_task(&mut self, task: TaskId) -> usize {
        match self {
            ReadyQueue::Clz(q) => q.remove_task(task),
            ReadyQueue::Linked(q) => q.remove_task(task),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ReadyQueue::Clz(q) => q.len(),
            ReadyQueue::Linked(q) => q.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
