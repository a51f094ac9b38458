//! # Task Control Block
//!
//! The dynamic half of a task. The static half ([`TaskConfig`]) comes from the
//! configuration tables and never changes; everything here is owned by the
//! core the task is assigned to.
//!
//! [`TaskConfig`]: crate::config::TaskConfig

use crate::interrupt::InterruptLocks;
use crate::types::{EventMask, Priority, ResourceId};

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///                 activate               dispatch
///   ┌───────────┐ ───────► ┌─────────┐ ─────────► ┌─────────┐
///   │ Suspended │          │  Ready  │            │ Running │
///   └───────────┘ ◄─────── └─────────┘ ◄───────── └─────────┘
///         ▲      terminate      ▲        preempt        │
///         │   (last activation) │                       │ wait_event
///         │                     │ set_event       ┌─────▼─────┐
///         └─────────────────────┴──────────────── │  Waiting  │
///                                                 └───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Suspended,
    Ready,
    Running,
    Waiting,
}

impl TaskState {
    pub const fn code(self) -> usize {
        match self {
            TaskState::Suspended => 0,
            TaskState::Ready => 1,
            TaskState::Running => 2,
            TaskState::Waiting => 3,
        }
    }

    pub const fn from_code(code: usize) -> Option<TaskState> {
        match code {
            0 => Some(TaskState::Suspended),
            1 => Some(TaskState::Ready),
            2 => Some(TaskState::Running),
            3 => Some(TaskState::Waiting),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Task control block
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskControlBlock {
    pub state: TaskState,
    /// Priority the task currently runs or waits at. Raised by resources and
    /// by non-preemptable scheduling.
    pub current_priority: Priority,
    /// Pending activations, including the one running.
    pub activations: u8,
    /// A frame for the current activation exists: the next dispatch resumes
    /// it instead of starting the body afresh.
    pub entered: bool,
    pub events: EventMask,
    pub wait_mask: EventMask,
    /// Most recently taken resource; the rest hang off the resources' own
    /// `next` links.
    pub last_resource: Option<ResourceId>,
    pub locks: InterruptLocks,
}

impl TaskControlBlock {
    pub const fn empty() -> Self {
        Self {
            state: TaskState::Suspended,
            current_priority: Priority::LOWEST,
            activations: 0,
            entered: false,
            events: EventMask::NONE,
            wait_mask: EventMask::NONE,
            last_resource: None,
            locks: InterruptLocks::new(),
        }
    }

    /// Back to a freshly configured task at `base`.
    pub fn reset(&mut self, base: Priority) {
        *self = Self::empty();
        self.current_priority = base;
    }

    #[inline]
    pub fn holds_resources(&self) -> bool {
        self.last_resource.is_some()
    }
}

impl Default for TaskControlBlock {
    fn default() -> Self {
        Self::empty()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
