//! Priority-bitmap ready queue.
//!
//! One bit per priority says whether that tier holds any records; a master
//! word has one bit per bitmap word. The highest ready priority is found with
//! two count-leading-zeros operations regardless of how many tasks exist.

use super::{Link, QueueFull, RecordPool};
use crate::config::MAX_PRIORITIES;
use crate::types::{Priority, TaskId};

const WORDS: usize = MAX_PRIORITIES / 32;

#[derive(Debug, Clone)]
pub struct ClzQueue {
    pool: RecordPool,
    master: u32,
    bitmap: [u32; WORDS],
    head: [Option<Link>; MAX_PRIORITIES],
    tail: [Option<Link>; MAX_PRIORITIES],
}

impl ClzQueue {
    pub fn new() -> Self {
        Self {
            pool: RecordPool::new(),
            master: 0,
            bitmap: [0; WORDS],
            head: [None; MAX_PRIORITIES],
            tail: [None; MAX_PRIORITIES],
        }
    }

    #[inline]
    fn mark(&mut self, prio: usize) {
        self.bitmap[prio / 32] |= 1 << (prio % 32);
        self.master |= 1 << (prio / 32);
    }

    #[inline]
    fn unmark(&mut self, prio: usize) {
        let word = prio / 32;
        self.bitmap[word] &= !(1 << (prio % 32));
        if self.bitmap[word] == 0 {
            self.master &= !(1 << word);
        }
    }

    fn highest_tier(&self) -> Option<usize> {
        if self.master == 0 {
            return None;
        }
        let word = 31 - self.master.leading_zeros() as usize;
        let bit = 31 - self.bitmap[word].leading_zeros() as usize;
        Some(word * 32 + bit)
    }

    pub fn push_back(&mut self, task: TaskId, priority: Priority) -> Result<(), QueueFull> {
        let link = self.pool.alloc(task, priority)?;
        let p = priority.index();
        match self.tail[p] {
            Some(tail) => self.pool.next[tail as usize] = Some(link),
            None => self.head[p] = Some(link),
        }
        self.tail[p] = Some(link);
        self.mark(p);
        Ok(())
    }

    pub fn push_front(&mut self, task: TaskId, priority: Priority) -> Result<(), QueueFull> {
        let link = self.pool.alloc(task, priority)?;
        let p = priority.index();
        self.pool.next[link as usize] = self.head[p];
        if self.head[p].is_none() {
            self.tail[p] = Some(link);
        }
        self.head[p] = Some(link);
        self.mark(p);
        Ok(())
    }

    pub fn peek_highest(&self) -> Option<(TaskId, Priority)> {
        let p = self.highest_tier()?;
        self.head[p].map(|link| self.pool.entry(link))
    }

    pub fn pop_highest(&mut self) -> Option<(TaskId, Priority)> {
        let p = self.highest_tier()?;
        let link = self.head[p]?;
        let entry = self.pool.entry(link);
        self.head[p] = self.pool.next[link as usize];
        if self.head[p].is_none() {
            self.tail[p] = None;
            self.unmark(p);
        }
        self.pool.release(link);
        Some(entry)
    }

    pub fn remove_task(&mut self, task: TaskId) -> usize {
        let mut removed = 0;
        for p in 0..MAX_PRIORITIES {
            let mut prev: Option<Link> = None;
            let mut cursor = self.head[p];
            while let Some(link) = cursor {
                let next = self.pool.next[link as usize];
                if self.pool.task[link as usize] == task {
                    match prev {
                        Some(prev) => self.pool.next[prev as usize] = next,
                        None => self.head[p] = next,
                    }
                    if self.tail[p] == Some(link) {
                        self.tail[p] = prev;
                    }
                    self.pool.release(link);
                    removed += 1;
                } else {
                    prev = Some(link);
                }
                cursor = next;
            }
            if self.head[p].is_none() {
                self.unmark(p);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.pool.used
    }
}

impl Default for ClzQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_across_words() {
        let mut q = ClzQueue::new();
        q.push_back(TaskId(0), Priority(3)).unwrap();
        q.push_back(TaskId(1), Priority(40)).unwrap();
        q.push_back(TaskId(2), Priority(31)).unwrap();
        assert_eq!(q.peek_highest(), Some((TaskId(1), Priority(40))));
        assert_eq!(q.pop_highest(), Some((TaskId(1), Priority(40))));
        assert_eq!(q.master, 1);
        assert_eq!(q.pop_highest(), Some((TaskId(2), Priority(31))));
        assert_eq!(q.pop_highest(), Some((TaskId(0), Priority(3))));
        assert_eq!(q.pop_highest(), None);
        assert_eq!(q.bitmap, [0; WORDS]);
    }

    #[test]
    fn test_remove_clears_tier_bit() {
        let mut q = ClzQueue::new();
        q.push_back(TaskId(4), Priority(7)).unwrap();
        q.push_back(TaskId(5), Priority(7)).unwrap();
        q.push_back(TaskId(4), Priority(7)).unwrap();
        assert_eq!(q.remove_task(TaskId(4)), 2);
        assert_eq!(q.len(), 1);
        assert_eq!(q.remove_task(TaskId(5)), 1);
        assert_eq!(q.peek_highest(), None);
        assert_eq!(q.master, 0);
    }
}
