// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Requirements: what each master needs from each slave it may use.
//!
//! A requirement links one master (or the system) to one slave. All requirements live in a
//! fixed-size pool and are threaded onto two singly linked lists, one per master and one per
//! slave. They are never freed one by one; the whole pool is cleared when a new base
//! configuration is loaded.

use super::{
    Engine, NodeId, PmError,
    master::MasterState,
    node::{MAX_LATENCY, NodeRef},
    slave::Capabilities,
};
use crate::platform::Platform;
use arrayvec::ArrayVec;
use bitflags::bitflags;
use core::{
    iter,
    ops::{Index, IndexMut},
};
use log::{debug, error, warn};

/// The maximum number of requirements.
pub const MAX_REQUIREMENTS: usize = 128;

bitflags! {
    /// Runtime flags of a requirement.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RequirementFlags: u8 {
        /// The master uses the slave.
        const USED = 1 << 0;
        /// The master asked for the slave itself, rather than getting it preallocated.
        const REQUESTED = 1 << 1;
        /// The slave should wake the master while it is suspended.
        const WAKEUP = 1 << 2;
    }
}

/// One master's requirement on one slave.
#[derive(Debug)]
pub struct Requirement {
    /// `None` for requirements held by the system.
    master: Option<usize>,
    slave: usize,
    pub(crate) next_in_master: Option<usize>,
    pub(crate) next_in_slave: Option<usize>,
    flags: RequirementFlags,
    /// Capabilities in effect.
    curr: Capabilities,
    /// Capabilities to switch to at the next suspend or wake.
    next: Capabilities,
    /// Capabilities given when the master starts.
    pre: Capabilities,
    /// Capabilities the master keeps while suspended.
    default: Capabilities,
    latency: u32,
}

impl Requirement {
    fn new(master: Option<usize>, slave: usize) -> Self {
        Self {
            master,
            slave,
            next_in_master: None,
            next_in_slave: None,
            flags: RequirementFlags::empty(),
            curr: Capabilities::empty(),
            next: Capabilities::empty(),
            pre: Capabilities::empty(),
            default: Capabilities::empty(),
            latency: MAX_LATENCY,
        }
    }

    /// Returns the index of the master, or `None` for the system.
    pub fn master(&self) -> Option<usize> {
        self.master
    }

    /// Returns the index of the slave.
    pub fn slave(&self) -> usize {
        self.slave
    }

    /// Returns the runtime flags.
    pub fn flags(&self) -> RequirementFlags {
        self.flags
    }

    /// Returns the capabilities in effect.
    pub fn curr(&self) -> Capabilities {
        self.curr
    }

    /// Returns the capabilities scheduled for the next transition.
    pub fn next(&self) -> Capabilities {
        self.next
    }

    /// Returns the capabilities preallocated by the configuration.
    pub fn pre(&self) -> Capabilities {
        self.pre
    }

    /// Returns the maximum wake-up latency the master accepts.
    pub fn latency(&self) -> u32 {
        self.latency
    }

    pub(crate) fn set_flags(&mut self, flags: RequirementFlags, value: bool) {
        self.flags.set(flags, value);
    }

    pub(crate) fn set_pre(&mut self, caps: Capabilities) {
        self.pre = caps;
    }

    pub(crate) fn set_default(&mut self, caps: Capabilities) {
        self.default = caps;
    }

    /// Drops everything the master holds. The configured capabilities stay.
    pub(crate) fn clear(&mut self) {
        self.flags = RequirementFlags::empty();
        self.curr = Capabilities::empty();
        self.next = Capabilities::empty();
        self.latency = MAX_LATENCY;
    }
}

/// The pool all requirements are allocated from.
#[derive(Debug, Default)]
pub struct RequirementPool {
    reqs: ArrayVec<Requirement, MAX_REQUIREMENTS>,
}

impl RequirementPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of allocated requirements.
    pub fn len(&self) -> usize {
        self.reqs.len()
    }

    /// Returns whether no requirement is allocated.
    pub fn is_empty(&self) -> bool {
        self.reqs.is_empty()
    }

    fn push(&mut self, req: Requirement) -> Result<usize, PmError> {
        let index = self.reqs.len();
        self.reqs.try_push(req).map_err(|_| {
            error!("Requirement pool exhausted");
            PmError::Internal
        })?;
        Ok(index)
    }

    pub(crate) fn clear(&mut self) {
        self.reqs.clear();
    }
}

impl Index<usize> for RequirementPool {
    type Output = Requirement;

    fn index(&self, index: usize) -> &Requirement {
        &self.reqs[index]
    }
}

impl IndexMut<usize> for RequirementPool {
    fn index_mut(&mut self, index: usize) -> &mut Requirement {
        &mut self.reqs[index]
    }
}

/// Which of a master's requirements to release.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReleaseKind {
    /// Every requirement.
    All,
    /// Requirements the master uses but never asked for.
    Unrequested,
}

impl<P: Platform> Engine<P> {
    /// Iterates over the requirements of a master.
    pub(crate) fn master_requirements(&self, master: usize) -> impl Iterator<Item = usize> + '_ {
        iter::successors(self.masters[master].reqs, |&req| {
            self.reqs[req].next_in_master
        })
    }

    /// Allocates a requirement and links it into the master's and the slave's lists.
    pub(crate) fn req_add(
        &mut self,
        master: Option<usize>,
        slave: usize,
    ) -> Result<usize, PmError> {
        let mut req = Requirement::new(master, slave);
        req.next_in_slave = self.slaves[slave].reqs;
        if let Some(master) = master {
            req.next_in_master = self.masters[master].reqs;
        }
        let index = self.reqs.push(req)?;
        self.slaves[slave].reqs = Some(index);
        if let Some(master) = master {
            self.masters[master].reqs = Some(index);
        }
        Ok(index)
    }

    /// Finds the requirement of a master on a slave.
    pub(crate) fn find_requirement(&self, master: usize, slave: usize) -> Option<usize> {
        self.master_requirements(master)
            .find(|&req| self.reqs[req].slave == slave)
    }

    /// Finds the caller's requirement on the slave with the given identifier.
    fn caller_requirement(&self, master: usize, id: NodeId) -> Result<usize, PmError> {
        let Some(NodeRef::Slave(slave)) = self.node_by_id(id) else {
            return Err(PmError::InvalidParam);
        };
        self.find_requirement(master, slave)
            .ok_or(PmError::NoAccess)
    }

    fn req_request(&mut self, req: usize, caps: Capabilities) -> Result<(), PmError> {
        let record = &self.reqs[req];
        if record.flags.contains(RequirementFlags::REQUESTED) {
            return Err(PmError::DoubleRequest);
        }
        let slave = record.slave;
        if !self.slaves[slave].shareable {
            let used_by_other = self.slave_requirements(slave).any(|other| {
                let other = &self.reqs[other];
                other.master.is_some()
                    && other.master != self.reqs[req].master
                    && other.flags.contains(RequirementFlags::USED)
            });
            if used_by_other {
                return Err(PmError::NodeUsed);
            }
        }

        let flags = self.reqs[req].flags;
        self.reqs[req].flags |= RequirementFlags::USED | RequirementFlags::REQUESTED;
        if let Err(e) = self.req_update(req, caps) {
            self.reqs[req].flags = flags;
            return Err(e);
        }
        Ok(())
    }

    /// Puts new capabilities into effect at once.
    pub(crate) fn req_update(&mut self, req: usize, caps: Capabilities) -> Result<(), PmError> {
        let record = &mut self.reqs[req];
        let (curr, next) = (record.curr, record.next);
        record.curr = caps;
        record.next = caps;
        let slave = record.slave;
        if let Err(e) = self.slave_update(slave) {
            let record = &mut self.reqs[req];
            record.curr = curr;
            record.next = next;
            return Err(e);
        }
        Ok(())
    }

    /// Schedules capabilities for the master's next suspend.
    fn req_schedule(&mut self, req: usize, caps: Capabilities) -> Result<(), PmError> {
        let slave = self.reqs[req].slave;
        if self.slaves[slave].desc.fsm.lowest_state_with(caps).is_none() {
            return Err(PmError::Conflict);
        }
        self.reqs[req].next = caps;
        Ok(())
    }

    /// Releases a requirement. Releasing an unused requirement does nothing.
    pub(crate) fn req_release(&mut self, req: usize) -> Result<(), PmError> {
        let record = &mut self.reqs[req];
        if !record.flags.contains(RequirementFlags::USED) && record.curr.is_empty() {
            record.clear();
            return Ok(());
        }
        record.clear();
        let slave = record.slave;
        self.slave_update(slave)
    }

    /// Releases the master's requirements of the given kind.
    pub(crate) fn release_requirements(
        &mut self,
        master: usize,
        kind: ReleaseKind,
    ) -> Result<(), PmError> {
        let mut cursor = self.masters[master].reqs;
        while let Some(req) = cursor {
            cursor = self.reqs[req].next_in_master;
            let flags = self.reqs[req].flags;
            let release = match kind {
                ReleaseKind::All => true,
                ReleaseKind::Unrequested => {
                    flags.contains(RequirementFlags::USED)
                        && !flags.contains(RequirementFlags::REQUESTED)
                }
            };
            if release {
                self.req_release(req)?;
            }
        }
        Ok(())
    }

    /// Puts the scheduled capabilities of a master into effect.
    ///
    /// With `swap`, which the master's suspend uses, the capabilities in effect before become the
    /// scheduled ones, unless the configuration gives the master defaults to keep across a
    /// suspend. The wake then switches back.
    pub(crate) fn update_scheduled(&mut self, master: usize, swap: bool) -> Result<(), PmError> {
        let mut cursor = self.masters[master].reqs;
        while let Some(req) = cursor {
            let record = &mut self.reqs[req];
            cursor = record.next_in_master;
            if record.curr == record.next {
                continue;
            }
            let scheduled = record.next;
            if swap {
                record.next = if record.default.is_empty() {
                    record.curr
                } else {
                    record.default
                };
            }
            record.curr = scheduled;
            let slave = record.slave;
            self.slave_update(slave)?;
        }
        Ok(())
    }

    /// Drops the capabilities scheduled by a master.
    pub(crate) fn cancel_scheduled(&mut self, master: usize) {
        let mut cursor = self.masters[master].reqs;
        while let Some(req) = cursor {
            let record = &mut self.reqs[req];
            cursor = record.next_in_master;
            record.next = record.curr;
        }
    }

    /// Puts the preallocated capabilities of a master into effect.
    pub(crate) fn pre_request(&mut self, master: usize) -> Result<(), PmError> {
        let mut cursor = self.masters[master].reqs;
        while let Some(req) = cursor {
            let record = &mut self.reqs[req];
            cursor = record.next_in_master;
            if record.pre.is_empty() {
                continue;
            }
            record.flags |= RequirementFlags::USED;
            if record.curr == record.pre {
                continue;
            }
            let pre = record.pre;
            self.req_update(req, pre)?;
        }
        Ok(())
    }

    /// Requests a slave for the caller.
    pub fn request_node(
        &mut self,
        master: usize,
        id: NodeId,
        caps: Capabilities,
    ) -> Result<(), PmError> {
        let req = self.caller_requirement(master, id)?;
        self.req_request(req, caps)?;
        debug!("{} requested {id} with {caps:?}", self.masters[master].name());
        Ok(())
    }

    /// Releases a slave the caller requested.
    pub fn release_node(&mut self, master: usize, id: NodeId) -> Result<(), PmError> {
        let req = self.caller_requirement(master, id)?;
        if !self.reqs[req].flags.contains(RequirementFlags::USED) {
            warn!("{} releases unused {id}", self.masters[master].name());
        }
        self.req_release(req)
    }

    /// Changes the caller's capabilities on a slave it uses.
    ///
    /// While the caller is suspending, the change is scheduled for its suspend instead.
    pub fn set_requirement(
        &mut self,
        master: usize,
        id: NodeId,
        caps: Capabilities,
    ) -> Result<(), PmError> {
        let req = self.caller_requirement(master, id)?;
        if !self.reqs[req].flags.contains(RequirementFlags::USED) {
            return Err(PmError::NoAccess);
        }
        if self.masters[master].state() == MasterState::Suspending {
            self.req_schedule(req, caps)
        } else {
            self.req_update(req, caps)
        }
    }

    /// Sets the latency the caller tolerates for a slave it uses.
    pub fn set_max_latency(
        &mut self,
        master: usize,
        id: NodeId,
        latency: u32,
    ) -> Result<(), PmError> {
        let req = self.caller_requirement(master, id)?;
        let record = &mut self.reqs[req];
        if !record.flags.contains(RequirementFlags::USED) {
            return Err(PmError::NoAccess);
        }
        let previous = record.latency;
        record.latency = latency;
        let slave = record.slave;
        if let Err(e) = self.slave_update(slave) {
            self.reqs[req].latency = previous;
            return Err(e);
        }
        Ok(())
    }
}
