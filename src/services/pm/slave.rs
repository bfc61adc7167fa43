// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Slave devices and their table-driven capability state machines.

use super::{
    Engine, PmError,
    node::{MAX_LATENCY, Node, NodeDesc, NodeFlags, NodeRef},
    requirement::RequirementFlags,
};
use crate::platform::Platform;
use bitflags::bitflags;
use core::iter;
use log::{debug, error};

bitflags! {
    /// Capabilities of a slave state, and capabilities masters require of a slave.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Capabilities: u8 {
        /// The slave is accessible.
        const ACCESS = 1 << 0;
        /// The slave retains its context.
        const CONTEXT = 1 << 1;
        /// The slave can wake its master.
        const WAKEUP = 1 << 2;
        /// The slave's power parent is on. Never requested by masters.
        const POWER = 1 << 3;
        /// The slave's clocks run. Never requested by masters.
        const CLOCKED = 1 << 4;

        /// Capabilities a master may request.
        const WIRE = Self::ACCESS.bits() | Self::CONTEXT.bits() | Self::WAKEUP.bits();
    }
}

impl Capabilities {
    /// Converts capabilities requested over the wire.
    pub fn from_wire(value: u32) -> Result<Self, PmError> {
        u8::try_from(value)
            .ok()
            .and_then(|bits| Self::from_bits(bits))
            .filter(|caps| Self::WIRE.contains(*caps))
            .ok_or(PmError::InvalidParam)
    }
}

/// A legal transition between two states of a slave.
#[derive(Debug)]
pub struct SlaveTransition {
    /// State before the transition.
    pub from: u8,
    /// State after the transition.
    pub to: u8,
    /// Time the transition takes, in microseconds.
    pub latency: u32,
}

/// A slave state machine: states ordered by increasing power, and the legal transitions.
#[derive(Debug)]
pub struct SlaveFsm {
    /// The capabilities of each state. State 0 is the lowest.
    pub states: &'static [Capabilities],
    /// Legal transitions. Empty for single-state machines.
    pub transitions: &'static [SlaveTransition],
}

impl SlaveFsm {
    /// Returns the capabilities of a state.
    pub fn caps(&self, state: u8) -> Capabilities {
        self.states
            .get(usize::from(state))
            .copied()
            .unwrap_or_default()
    }

    /// Returns the states providing at least `caps`, lowest first.
    pub fn states_with(&self, caps: Capabilities) -> impl Iterator<Item = u8> + '_ {
        (0u8..)
            .zip(self.states)
            .filter(move |(_, state)| state.contains(caps))
            .map(|(index, _)| index)
    }

    /// Returns the lowest state providing at least `caps`.
    pub fn lowest_state_with(&self, caps: Capabilities) -> Option<u8> {
        self.states_with(caps).next()
    }

    /// Returns the transition from one state to another, if it is legal.
    pub fn transition(&self, from: u8, to: u8) -> Option<&SlaveTransition> {
        self.transitions
            .iter()
            .find(|transition| transition.from == from && transition.to == to)
    }

    fn highest_state(&self) -> u8 {
        u8::try_from(self.states.len().saturating_sub(1)).unwrap_or(u8::MAX)
    }

    /// Returns the time to get from `state` to the highest state.
    pub fn wake_latency(&self, state: u8) -> u32 {
        let highest = self.highest_state();
        if state >= highest {
            return 0;
        }
        self.transition(state, highest)
            .map_or(MAX_LATENCY, |transition| transition.latency)
    }
}

/// The GIC proxy bit through which a slave wakes its master.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WakeSource {
    /// GIC proxy group.
    pub group: u8,
    /// Bit within the group.
    pub mask: u32,
}

/// The static description of a slave.
#[derive(Debug)]
pub struct SlaveDesc {
    /// The common node description.
    pub node: NodeDesc,
    /// The state machine.
    pub fsm: &'static SlaveFsm,
    /// State of the hardware at boot, unless the platform reports otherwise.
    pub initial_state: u8,
    /// How the slave wakes its master, if it can.
    pub wake: Option<WakeSource>,
}

/// The runtime record of a slave.
#[derive(Debug)]
pub struct Slave {
    pub(crate) node: Node,
    pub(crate) desc: &'static SlaveDesc,
    /// Head of the list of requirements on the slave.
    pub(crate) reqs: Option<usize>,
    pub(crate) shareable: bool,
}

impl Slave {
    pub(crate) fn new(desc: &'static SlaveDesc) -> Self {
        Self {
            node: Node::new(&desc.node),
            desc,
            reqs: None,
            shareable: false,
        }
    }

    /// Returns whether several masters may use the slave at once.
    pub fn is_shareable(&self) -> bool {
        self.shareable
    }

    pub(crate) fn clear_config(&mut self) {
        self.reqs = None;
        self.shareable = false;
    }
}

impl<P: Platform> Engine<P> {
    /// Iterates over the requirements on a slave.
    pub(crate) fn slave_requirements(&self, slave: usize) -> impl Iterator<Item = usize> + '_ {
        iter::successors(self.slaves[slave].reqs, |&req| self.reqs[req].next_in_slave)
    }

    /// Returns the tightest latency any user of the slave asks for.
    fn slave_min_latency(&self, slave: usize) -> u32 {
        self.slave_requirements(slave)
            .map(|req| &self.reqs[req])
            .filter(|req| req.flags().contains(RequirementFlags::USED))
            .map(|req| req.latency())
            .min()
            .unwrap_or(MAX_LATENCY)
    }

    /// Returns the time for the slave to become fully usable from `state`.
    ///
    /// States without power also pay for powering the parent up, if it is off.
    pub(crate) fn slave_state_wake_latency(&self, slave: usize, state: u8) -> u32 {
        let record = &self.slaves[slave];
        let fsm = record.desc.fsm;
        let mut latency = fsm.wake_latency(state);
        if !fsm.caps(state).contains(Capabilities::POWER)
            && let Some(parent) = record.node.parent()
        {
            latency = latency.saturating_add(self.power_wake_latency(parent));
        }
        latency
    }

    /// Picks the state the slave should be in.
    ///
    /// That is the lowest state providing every capability any master currently requires, moved
    /// up to the first such state that also wakes fast enough for every user.
    pub(crate) fn slave_resolve(&self, slave: usize) -> Result<u8, PmError> {
        let caps = self
            .slave_requirements(slave)
            .fold(Capabilities::empty(), |caps, req| caps | self.reqs[req].curr());
        let min_latency = self.slave_min_latency(slave);
        let fsm = self.slaves[slave].desc.fsm;

        if fsm.lowest_state_with(caps).is_none() {
            debug!(
                "{}: no state provides {caps:?}",
                self.slaves[slave].node.name()
            );
            return Err(PmError::Conflict);
        }
        fsm.states_with(caps)
            .find(|&state| self.slave_state_wake_latency(slave, state) <= min_latency)
            .ok_or_else(|| {
                debug!(
                    "{}: no state wakes within {min_latency}",
                    self.slaves[slave].node.name()
                );
                PmError::Conflict
            })
    }

    /// Brings the slave into the state its requirements call for.
    pub(crate) fn slave_update(&mut self, slave: usize) -> Result<(), PmError> {
        let state = self.slave_resolve(slave)?;
        self.slave_change_state(slave, state, false)?;
        self.slave_update_margin(slave)
    }

    fn slave_update_margin(&mut self, slave: usize) -> Result<(), PmError> {
        let min_latency = self.slave_min_latency(slave);
        let margin = if min_latency == MAX_LATENCY {
            MAX_LATENCY
        } else {
            let state = self.slaves[slave].node.state();
            min_latency.saturating_sub(self.slave_state_wake_latency(slave, state))
        };
        let node = &mut self.slaves[slave].node;
        node.set_latency_margin(margin);
        match node.parent() {
            Some(parent) => self.power_update_latency(parent),
            None => Ok(()),
        }
    }

    /// Moves the slave into another state.
    ///
    /// Power and clocks the new state needs are taken before the hardware is touched, and the
    /// ones only the old state needed are given back after. `force` skips the check that the
    /// transition is legal.
    pub(crate) fn slave_change_state(
        &mut self,
        slave: usize,
        state: u8,
        force: bool,
    ) -> Result<(), PmError> {
        let record = &self.slaves[slave];
        let fsm = record.desc.fsm;
        let old = record.node.state();
        if old == state {
            return Ok(());
        }
        if usize::from(state) >= fsm.states.len() {
            error!("{}: no state {state}", record.node.name());
            return Err(PmError::Internal);
        }
        if !force && fsm.transition(old, state).is_none() {
            return Err(PmError::Conflict);
        }

        let node = NodeRef::Slave(slave);
        let id = record.node.id();
        let (old_caps, new_caps) = (fsm.caps(old), fsm.caps(state));
        if new_caps.contains(Capabilities::POWER) {
            self.request_parent_power(node)?;
        }
        let result = if new_caps.contains(Capabilities::CLOCKED) {
            self.request_node_clocks(node)
        } else {
            Ok(())
        };
        let result = result.and_then(|()| self.platform.slave_enter_state(id, state));
        if let Err(e) = result {
            if !old_caps.contains(Capabilities::CLOCKED) {
                self.release_node_clocks(node)?;
            }
            if !old_caps.contains(Capabilities::POWER) {
                self.release_parent_power(node)?;
            }
            return Err(e);
        }

        self.set_node_state(node, state);
        if !new_caps.contains(Capabilities::CLOCKED) {
            self.release_node_clocks(node)?;
        }
        if !new_caps.contains(Capabilities::POWER) {
            self.release_parent_power(node)?;
        }
        Ok(())
    }

    /// Drops every master's requirement on the slave and moves it to its lowest state.
    pub(crate) fn slave_force_down(&mut self, slave: usize) -> Result<(), PmError> {
        let mut cursor = self.slaves[slave].reqs;
        while let Some(req) = cursor {
            cursor = self.reqs[req].next_in_slave;
            if self.reqs[req].master().is_some()
                && self.reqs[req].flags().contains(RequirementFlags::USED)
            {
                self.reqs[req].clear();
            }
        }
        self.slave_change_state(slave, 0, true)?;
        self.slave_update_margin(slave)
    }

    /// Idles a slave whose only user is going down, if its clock is running.
    pub(crate) fn slave_idle_if_active(&mut self, slave: usize) -> Result<(), PmError> {
        let node = NodeRef::Slave(slave);
        if !self.node_clock_is_active(node) {
            return Ok(());
        }
        self.platform.slave_idle(self.slaves[slave].node.id())?;
        self.node_mut(node).set_flags(NodeFlags::IDLED, true);
        Ok(())
    }
}
