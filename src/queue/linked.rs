//! Linked-list ready queue.
//!
//! All records of a core form one chain sorted by descending priority. A new
//! activation is linked in after the last record of its priority, a
//! preempted task before the first one.

use super::{Link, QueueFull, RecordPool};
use crate::types::{Priority, TaskId};

#[derive(Debug, Clone)]
pub struct LinkedQueue {
    pool: RecordPool,
    head: Option<Link>,
}

impl LinkedQueue {
    pub fn new() -> Self {
        Self {
            pool: RecordPool::new(),
            head: None,
        }
    }

    /// Link `link` in front of the first record for which `stop` holds.
    fn insert_before(&mut self, link: Link, stop: impl Fn(Priority) -> bool) {
        let mut prev: Option<Link> = None;
        let mut cursor = self.head;
        while let Some(at) = cursor {
            if stop(self.pool.priority[at as usize]) {
                break;
            }
            prev = Some(at);
            cursor = self.pool.next[at as usize];
        }
        self.pool.next[link as usize] = cursor;
        match prev {
            Some(prev) => self.pool.next[prev as usize] = Some(link),
            None => self.head = Some(link),
        }
    }

    pub fn push_back(&mut self, task: TaskId, priority: Priority) -> Result<(), QueueFull> {
        let link = self.pool.alloc(task, priority)?;
        self.insert_before(link, |p| p < priority);
        Ok(())
    }

    pub fn push_front(&mut self, task: TaskId, priority: Priority) -> Result<(), QueueFull> {
        let link = self.pool.alloc(task, priority)?;
        self.insert_before(link, |p| p <= priority);
        Ok(())
    }

    pub fn peek_highest(&self) -> Option<(TaskId, Priority)> {
        self.head.map(|link| self.pool.entry(link))
    }

    pub fn pop_highest(&mut self) -> Option<(TaskId, Priority)> {
        let link = self.head?;
        let entry = self.pool.entry(link);
        self.head = self.pool.next[link as usize];
        self.pool.release(link);
        Some(entry)
    }

    pub fn remove_task(&mut self, task: TaskId) -> usize {
        let mut removed = 0;
        let mut prev: Option<Link> = None;
        let mut cursor = self.head;
        while let Some(link) = cursor {
            let next = self.pool.next[link as usize];
            if self.pool.task[link as usize] == task {
                match prev {
                    Some(prev) => self.pool.next[prev as usize] = next,
                    None => self.head = next,
                }
                self.pool.release(link);
                removed += 1;
            } else {
                prev = Some(link);
            }
            cursor = next;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.pool.used
    }
}

impl Default for LinkedQueue {
    fn default() -> Self {
        Self::new()
    }
}
