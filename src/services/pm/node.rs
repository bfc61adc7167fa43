// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The record shared by every managed node, and the class operations dispatched on [`NodeRef`].

use super::{
    Engine, OpCharType, PmError,
    clock::ClockId,
    power::PowerState,
    requirement::RequirementFlags,
};
use crate::{debug::CHECK_INVARIANTS, platform::Platform};
use arrayvec::ArrayVec;
use bitflags::bitflags;
use core::fmt::{self, Display, Formatter};
use log::{debug, error};

/// Latency value meaning that a node has no latency constraint.
pub const MAX_LATENCY: u32 = u32::MAX;

/// The maximum number of clocks a single node consumes.
pub const MAX_NODE_CLOCKS: usize = 3;

/// `GET_NODE_STATUS` usage bit: the caller uses the node.
pub const USAGE_CURRENT_MASTER: u32 = 1 << 0;
/// `GET_NODE_STATUS` usage bit: some other master uses the node.
pub const USAGE_OTHER_MASTER: u32 = 1 << 1;

/// The identifier of a node on the wire.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(pub u32);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "node {:#x}", self.0)
    }
}

bitflags! {
    /// Runtime flags of a node.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct NodeFlags: u8 {
        /// The node holds a use count on each of its clocks.
        const LOCKED_CLOCK = 1 << 0;
        /// The node holds a use count on its power parent.
        const LOCKED_POWER = 1 << 1;
        /// The node was idled before its owner was forced down.
        const IDLED = 1 << 2;
    }
}

/// Refers to a node by class and index into the engine's table for that class.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeRef {
    /// A processor.
    Processor(usize),
    /// A power domain or island.
    Power(usize),
    /// A slave device.
    Slave(usize),
}

/// The static description of a node.
#[derive(Debug)]
pub struct NodeDesc {
    /// Wire identifier.
    pub id: NodeId,
    /// Name used in logs.
    pub name: &'static str,
    /// The power domain or island the node is supplied from.
    pub parent: Option<NodeId>,
    /// The clocks the node consumes.
    pub clocks: &'static [ClockId],
    /// Power consumption in each state of the node, indexed by state.
    pub power: &'static [u32],
}

impl NodeDesc {
    /// Describes a node with no parent, clocks or power figures.
    pub const fn new(id: NodeId, name: &'static str) -> Self {
        Self {
            id,
            name,
            parent: None,
            clocks: &[],
            power: &[],
        }
    }

    /// Sets the power parent.
    pub const fn parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets the consumed clocks.
    pub const fn clocks(mut self, clocks: &'static [ClockId]) -> Self {
        self.clocks = clocks;
        self
    }

    /// Sets the power consumption per state.
    pub const fn power(mut self, power: &'static [u32]) -> Self {
        self.power = power;
        self
    }
}

/// The runtime record of a node.
#[derive(Debug)]
pub struct Node {
    desc: &'static NodeDesc,
    state: u8,
    /// Index of the power parent.
    parent: Option<usize>,
    /// Indices into the clock tree.
    clocks: ArrayVec<usize, MAX_NODE_CLOCKS>,
    latency_margin: u32,
    flags: NodeFlags,
}

impl Node {
    pub(crate) fn new(desc: &'static NodeDesc) -> Self {
        Self {
            desc,
            state: 0,
            parent: None,
            clocks: ArrayVec::new(),
            latency_margin: MAX_LATENCY,
            flags: NodeFlags::empty(),
        }
    }

    /// Returns the wire identifier.
    pub fn id(&self) -> NodeId {
        self.desc.id
    }

    /// Returns the name used in logs.
    pub fn name(&self) -> &'static str {
        self.desc.name
    }

    /// Returns the current state, as an index into the class's state table.
    pub fn state(&self) -> u8 {
        self.state
    }

    /// Returns the index of the power parent.
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Returns the indices of the consumed clocks.
    pub fn clocks(&self) -> &[usize] {
        &self.clocks
    }

    /// Returns how much extra wake-up latency the node's users tolerate.
    pub fn latency_margin(&self) -> u32 {
        self.latency_margin
    }

    /// Returns the runtime flags.
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    /// Returns the power consumption in the given state.
    pub fn power_in_state(&self, state: u8) -> u32 {
        self.desc.power.get(usize::from(state)).copied().unwrap_or(0)
    }

    pub(crate) fn desc(&self) -> &'static NodeDesc {
        self.desc
    }

    /// Sets the state without any side effect. Only for initialisation.
    pub(crate) fn init_state(&mut self, state: u8) {
        self.state = state;
    }

    pub(crate) fn set_parent(&mut self, parent: usize) {
        self.parent = Some(parent);
    }

    pub(crate) fn add_clock(&mut self, clock: usize) -> Result<(), PmError> {
        self.clocks.try_push(clock).map_err(|_| {
            error!("Too many clocks for {}", self.desc.name);
            PmError::Internal
        })
    }

    pub(crate) fn set_latency_margin(&mut self, margin: u32) {
        self.latency_margin = margin;
    }

    pub(crate) fn set_flags(&mut self, flags: NodeFlags, value: bool) {
        self.flags.set(flags, value);
    }

    /// Resets the runtime fields that depend on the loaded configuration.
    ///
    /// The lock flags record resources the node actually holds, so they survive.
    pub(crate) fn clear_config(&mut self) {
        self.latency_margin = MAX_LATENCY;
        self.flags.remove(NodeFlags::IDLED);
    }
}

/// The result of `GET_NODE_STATUS`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeStatus {
    /// Current state of the node.
    pub state: u8,
    /// Capabilities the caller currently holds on the node.
    pub requirements: u32,
    /// Combination of `USAGE_*` bits.
    pub usage: u32,
}

impl<P: Platform> Engine<P> {
    /// Returns the node record of the given node.
    pub fn node(&self, node: NodeRef) -> &Node {
        match node {
            NodeRef::Processor(index) => &self.procs[index].node,
            NodeRef::Power(index) => &self.powers[index].node,
            NodeRef::Slave(index) => &self.slaves[index].node,
        }
    }

    pub(crate) fn node_mut(&mut self, node: NodeRef) -> &mut Node {
        match node {
            NodeRef::Processor(index) => &mut self.procs[index].node,
            NodeRef::Power(index) => &mut self.powers[index].node,
            NodeRef::Slave(index) => &mut self.slaves[index].node,
        }
    }

    /// Finds a node by its wire identifier.
    ///
    /// Some identifiers name both a master and the power island it lives in. Such identifiers
    /// resolve to the power island.
    pub fn node_by_id(&self, id: NodeId) -> Option<NodeRef> {
        if let Some(index) = self.powers.iter().position(|power| power.node.id() == id) {
            Some(NodeRef::Power(index))
        } else if let Some(index) = self.procs.iter().position(|proc| proc.node.id() == id) {
            Some(NodeRef::Processor(index))
        } else {
            self.slaves
                .iter()
                .position(|slave| slave.node.id() == id)
                .map(NodeRef::Slave)
        }
    }

    /// Returns the current state of the node with the given identifier.
    pub fn node_state_by_id(&self, id: NodeId) -> Option<u8> {
        self.node_by_id(id).map(|node| self.node(node).state())
    }

    /// Changes the state of a node and tells the platform about it.
    pub(crate) fn set_node_state(&mut self, node: NodeRef, state: u8) {
        let record = self.node_mut(node);
        if record.state == state {
            return;
        }
        let old = record.state;
        record.state = state;
        let (id, name) = (record.id(), record.name());
        debug!("{name} ({id}): state {old} -> {state}");
        self.platform.node_state_changed(id, state);
        if CHECK_INVARIANTS {
            self.check_power_invariants();
        }
    }

    /// Forces the node to its lowest state, whatever its users require.
    pub fn node_force_down(&mut self, node: NodeRef) -> Result<(), PmError> {
        match node {
            NodeRef::Processor(index) => self.proc_force_down(index),
            NodeRef::Power(index) => self.power_force_down(index),
            NodeRef::Slave(index) => self.slave_force_down(index),
        }
    }

    /// Returns whether the loaded configuration gives the node to any master.
    pub fn node_is_usable(&self, node: NodeRef) -> bool {
        match node {
            NodeRef::Processor(index) => self.procs[index]
                .master()
                .is_some_and(|master| self.masters[master].is_configured()),
            NodeRef::Power(index) => self.power_is_usable(index),
            NodeRef::Slave(index) => self.slaves[index].reqs.is_some(),
        }
    }

    /// Returns the time the node needs to become fully usable from its current state.
    pub fn node_wake_latency(&self, node: NodeRef) -> u32 {
        match node {
            NodeRef::Processor(index) => self.proc_wake_latency(index),
            NodeRef::Power(index) => self.power_wake_latency(index),
            NodeRef::Slave(index) => {
                let slave = &self.slaves[index];
                self.slave_state_wake_latency(index, slave.node.state())
            }
        }
    }

    /// Returns the power the node consumes in its current state.
    pub fn node_power_data(&self, node: NodeRef) -> u32 {
        match node {
            NodeRef::Power(index) => self.power_data(index),
            NodeRef::Processor(_) | NodeRef::Slave(_) => {
                let record = self.node(node);
                record.power_in_state(record.state())
            }
        }
    }

    /// Returns the IPI mask of the masters allowed to control the node.
    pub fn node_permissions(&self, node: NodeRef) -> u32 {
        match node {
            NodeRef::Processor(index) => self.procs[index]
                .master()
                .map_or(0, |master| self.masters[master].ipi_mask()),
            NodeRef::Power(index) => self.powers[index].force_perms(),
            NodeRef::Slave(index) => self
                .slave_requirements(index)
                .filter_map(|req| self.reqs[req].master())
                .fold(0, |mask, master| mask | self.masters[master].ipi_mask()),
        }
    }

    pub(crate) fn node_clear_config(&mut self, node: NodeRef) {
        self.node_mut(node).clear_config();
    }

    /// Returns the state of the node, the caller's requirements on it and who uses it.
    pub fn get_node_status(&self, master: usize, id: NodeId) -> Result<NodeStatus, PmError> {
        let node = self.node_by_id(id).ok_or(PmError::InvalidParam)?;
        let state = self.node(node).state();
        let NodeRef::Slave(slave) = node else {
            return Ok(NodeStatus {
                state,
                requirements: 0,
                usage: 0,
            });
        };

        let mut status = NodeStatus {
            state,
            requirements: 0,
            usage: 0,
        };
        for req in self.slave_requirements(slave) {
            let req = &self.reqs[req];
            let Some(owner) = req.master() else {
                continue;
            };
            if owner == master {
                status.requirements = u32::from(req.curr().bits());
                if req.flags().contains(RequirementFlags::USED) {
                    status.usage |= USAGE_CURRENT_MASTER;
                }
            } else if req.flags().contains(RequirementFlags::USED) {
                status.usage |= USAGE_OTHER_MASTER;
            }
        }
        Ok(status)
    }

    /// Returns an operating characteristic of the node.
    pub fn get_op_characteristic(&self, id: NodeId, kind: OpCharType) -> Result<u32, PmError> {
        let node = self.node_by_id(id).ok_or(PmError::InvalidParam)?;
        match kind {
            OpCharType::Power => Ok(self.node_power_data(node)),
            OpCharType::Latency => Ok(self.node_wake_latency(node)),
            OpCharType::Temperature => Err(PmError::NotSupported),
        }
    }

    /// Checks that every power node with users is on.
    fn check_power_invariants(&self) {
        for power in &self.powers {
            if power.use_count() > 0 && power.node.state() != PowerState::On as u8 {
                error!(
                    "{} is off but has {} users",
                    power.node.name(),
                    power.use_count()
                );
            }
        }
    }
}
