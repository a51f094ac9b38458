//! # Resource Manager
//!
//! Immediate priority ceiling protocol. Taking a resource raises the holder
//! to the resource's ceiling at once, so no task that could contend for it
//! can run until it is released. Held resources form a LIFO chain per
//! holder threaded through [`ResourceControl::next`]:
//!
//! ```text
//!   tcb.last_resource ─► R2 ─► R1 ─► (none)
//!                        │     └─ saved: priority before R1
//!                        └─ saved: priority before R2 (= ceiling of R1)
//! ```
//!
//! Resources with an interrupt ceiling additionally raise the interrupt
//! level while held and may be taken by category-2 ISRs.

use crate::arch::InterruptControl;
use crate::config::Ceiling;
use crate::error::OsError;
use crate::kernel::CoreState;
use crate::syscall::Caller;
use crate::types::{IntLevel, IsrId, Priority, ResourceId, TaskId};

/// Current holder of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Task(TaskId),
    Isr(IsrId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceControl {
    pub owner: Option<Owner>,
    /// Holder's priority before it took the resource.
    pub saved_priority: Priority,
    /// Interrupt level before an interrupt ceiling raised it.
    pub saved_level: Option<IntLevel>,
    /// Resource the holder took before this one.
    pub next: Option<ResourceId>,
}

impl ResourceControl {
    pub const FREE: ResourceControl = ResourceControl {
        owner: None,
        saved_priority: Priority::LOWEST,
        saved_level: None,
        next: None,
    };
}

impl CoreState {
    /// Holder the caller acts as, if it may hold resources at all.
    fn resource_owner(&self, caller: Caller) -> Result<Owner, OsError> {
        match caller {
            Caller::Task(task) => Ok(Owner::Task(task)),
            Caller::Isr(isr) => Ok(Owner::Isr(isr)),
            _ => Err(OsError::CallLevel),
        }
    }

    fn last_resource(&self, owner: Owner) -> Option<ResourceId> {
        match owner {
            Owner::Task(task) => self.tasks[task.index()].last_resource,
            Owner::Isr(_) => self.interrupts.current().and_then(|f| f.last_resource),
        }
    }

    fn set_last_resource(&mut self, owner: Owner, resource: Option<ResourceId>) {
        match owner {
            Owner::Task(task) => self.tasks[task.index()].last_resource = resource,
            Owner::Isr(_) => {
                if let Some(frame) = self.interrupts.current_mut() {
                    frame.last_resource = resource;
                }
            }
        }
    }

    /// `GetResource`.
    pub(crate) fn get_resource(&mut self, caller: Caller, resource: ResourceId) -> Result<(), OsError> {
        let owner = self.resource_owner(caller)?;
        let ceiling = self.config().resources[resource.index()].ceiling;
        if self.resources[resource.index()].owner.is_some() {
            return Err(OsError::Access);
        }

        let extended = self.config().status == crate::config::StatusLevel::Extended;
        let ceiling_priority = match ceiling {
            Ceiling::Task(p) => p,
            Ceiling::Scheduler | Ceiling::Interrupt(_) => self.top_priority,
        };
        let level = match ceiling {
            Ceiling::Interrupt(level) => Some(level),
            _ => None,
        };

        let saved_priority = match owner {
            Owner::Task(task) => {
                let current = self.tasks[task.index()].current_priority;
                if extended && ceiling_priority < self.base_priority(task) {
                    return Err(OsError::Access);
                }
                self.tasks[task.index()].current_priority = current.max(ceiling_priority);
                current
            }
            Owner::Isr(isr) => {
                let isr_level = self.config().isrs[isr.index()].level;
                if level.map_or(true, |l| l < isr_level) {
                    return Err(OsError::Access);
                }
                Priority::LOWEST
            }
        };

        let saved_level = level.map(|ceiling_level| {
            let current = self.irq.level();
            self.irq.set_level(current.max(ceiling_level));
            current
        });

        let next = self.last_resource(owner);
        self.resources[resource.index()] = ResourceControl {
            owner: Some(owner),
            saved_priority,
            saved_level,
            next,
        };
        self.set_last_resource(owner, Some(resource));
        log::trace!("{}: {:?} took {}", self.id(), owner, resource);
        Ok(())
    }

    /// `ReleaseResource`: only the most recently taken resource may go.
    pub(crate) fn release_resource(&mut self, caller: Caller, resource: ResourceId) -> Result<(), OsError> {
        let owner = self.resource_owner(caller)?;
        if self.resources[resource.index()].owner != Some(owner) {
            return Err(OsError::NoFunc);
        }
        if self.last_resource(owner) != Some(resource) {
            return Err(OsError::Nesting);
        }
        self.unlink(owner, resource);
        log::trace!("{}: {:?} released {}", self.id(), owner, resource);
        Ok(())
    }

    /// Pop `resource` off the holder's chain and undo what taking it did.
    fn unlink(&mut self, owner: Owner, resource: ResourceId) {
        let control = self.resources[resource.index()];
        if let Owner::Task(task) = owner {
            self.tasks[task.index()].current_priority = control.saved_priority;
        }
        if let Some(level) = control.saved_level {
            self.irq.set_level(level);
        }
        self.set_last_resource(owner, control.next);
        self.resources[resource.index()] = ResourceControl::FREE;
    }

    /// Release everything `task` still holds, newest first.
    pub(crate) fn release_all_resources(&mut self, task: TaskId) {
        let owner = Owner::Task(task);
        while let Some(resource) = self.last_resource(owner) {
            self.unlink(owner, resource);
        }
    }

    /// Release everything the ISR on top of the stack still holds.
    pub(crate) fn release_isr_resources(&mut self, isr: IsrId) {
        let owner = Owner::Isr(isr);
        while let Some(resource) = self.last_resource(owner) {
            self.unlink(owner, resource);
        }
    }
}
