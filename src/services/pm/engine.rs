// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

use super::{
    NodeId, PmError,
    clock::{ClockDesc, ClockTree},
    master::{Master, MasterDesc, MasterState},
    node::NodeRef,
    power::{MAX_POWER_DEPTH, PowerDesc, PowerNode, PowerState},
    proc::{ProcDesc, ProcState, Processor},
    requirement::RequirementPool,
    reset::{ResetDesc, ResetTable},
    slave::{Capabilities, Slave, SlaveDesc},
    system::{System, SystemRequirement},
};
use crate::{ipi::CALLBACK_ARG_CNT, platform::Platform};
use arrayvec::ArrayVec;
use core::fmt::{self, Debug, Formatter};
use log::{error, info};

/// The maximum number of processors.
pub const MAX_PROCS: usize = 8;
/// The maximum number of power domains and islands.
pub const MAX_POWER_NODES: usize = 8;
/// The maximum number of slaves.
pub const MAX_SLAVES: usize = 32;
/// The maximum number of masters.
pub const MAX_MASTERS: usize = 4;

/// The static description of a chip.
#[derive(Debug)]
pub struct Topology {
    /// All processors.
    pub processors: &'static [ProcDesc],
    /// All power domains and islands.
    pub power_nodes: &'static [PowerDesc],
    /// All slave devices.
    pub slaves: &'static [SlaveDesc],
    /// The clock tree, PLLs first.
    pub clocks: &'static [ClockDesc],
    /// All masters.
    pub masters: &'static [MasterDesc],
    /// All reset lines a master may control.
    pub resets: &'static [ResetDesc],
    /// Requirements held by the system itself once a configuration is loaded.
    pub system_requirements: &'static [SystemRequirement],
    /// Power nodes that must all be off before the reference oscillator may be parked.
    pub oscillator_gate: &'static [NodeId],
}

/// The power management engine.
///
/// Holds every node, clock, master and requirement of the chip and runs all operations on them.
pub struct Engine<P: Platform> {
    pub(crate) platform: P,
    pub(crate) topology: &'static Topology,
    pub(crate) procs: ArrayVec<Processor, MAX_PROCS>,
    pub(crate) powers: ArrayVec<PowerNode, MAX_POWER_NODES>,
    pub(crate) slaves: ArrayVec<Slave, MAX_SLAVES>,
    pub(crate) clocks: ClockTree,
    pub(crate) masters: ArrayVec<Master, MAX_MASTERS>,
    pub(crate) reqs: RequirementPool,
    pub(crate) resets: ResetTable,
    pub(crate) system: System,
}

fn table_full(what: &str) -> PmError {
    error!("Too many {what} in topology");
    PmError::Internal
}

impl<P: Platform> Engine<P> {
    /// Builds the engine for the given chip and reads the initial state of every node from the
    /// platform.
    pub fn new(platform: P, topology: &'static Topology) -> Result<Self, PmError> {
        let mut engine = Self {
            platform,
            topology,
            procs: ArrayVec::new(),
            powers: ArrayVec::new(),
            slaves: ArrayVec::new(),
            clocks: ClockTree::new(topology.clocks)?,
            masters: ArrayVec::new(),
            reqs: RequirementPool::new(),
            resets: ResetTable::new(topology.resets)?,
            system: System::new(),
        };
        for desc in topology.power_nodes {
            engine
                .powers
                .try_push(PowerNode::new(desc))
                .map_err(|_| table_full("power nodes"))?;
        }
        for desc in topology.processors {
            engine
                .procs
                .try_push(Processor::new(desc))
                .map_err(|_| table_full("processors"))?;
        }
        for desc in topology.slaves {
            engine
                .slaves
                .try_push(Slave::new(desc))
                .map_err(|_| table_full("slaves"))?;
        }
        for desc in topology.masters {
            engine
                .masters
                .try_push(Master::new(desc))
                .map_err(|_| table_full("masters"))?;
        }
        engine.link()?;
        engine.init()?;
        Ok(engine)
    }

    pub(crate) fn all_nodes(&self) -> impl Iterator<Item = NodeRef> + use<P> {
        let (powers, procs, slaves) = (self.powers.len(), self.procs.len(), self.slaves.len());
        (0..powers)
            .map(NodeRef::Power)
            .chain((0..procs).map(NodeRef::Processor))
            .chain((0..slaves).map(NodeRef::Slave))
    }

    fn power_index(&self, id: NodeId) -> Option<usize> {
        self.powers.iter().position(|power| power.node.id() == id)
    }

    /// Resolves the links between the static tables.
    fn link(&mut self) -> Result<(), PmError> {
        for node in self.all_nodes() {
            let desc = self.node(node).desc();
            if let Some(parent) = desc.parent {
                let index = self.power_index(parent).ok_or_else(|| {
                    error!("{} has unknown power parent {parent}", desc.name);
                    PmError::Internal
                })?;
                self.node_mut(node).set_parent(index);
                self.powers[index].add_child(node)?;
            }
            for &clock in desc.clocks {
                let index = self.clocks.index_of(clock).ok_or_else(|| {
                    error!("{} uses unknown {clock}", desc.name);
                    PmError::Internal
                })?;
                self.node_mut(node).add_clock(index)?;
                self.clocks.add_user(index, node)?;
            }
        }

        for power in 0..self.powers.len() {
            let mut depth = 0;
            let mut cursor = self.powers[power].node.parent();
            while let Some(parent) = cursor {
                depth += 1;
                if depth >= MAX_POWER_DEPTH {
                    error!("{} is nested too deep", self.powers[power].node.name());
                    return Err(PmError::Internal);
                }
                cursor = self.powers[parent].node.parent();
            }
        }

        for master in 0..self.masters.len() {
            let desc = self.masters[master].desc();
            for &id in desc.procs {
                let proc = self
                    .procs
                    .iter()
                    .position(|proc| proc.node.id() == id)
                    .ok_or_else(|| {
                        error!("{} owns unknown processor {id}", desc.name);
                        PmError::Internal
                    })?;
                self.procs[proc].master = Some(master);
                self.masters[master].add_proc(proc)?;
            }
            for &id in desc.mem_list {
                let Some(NodeRef::Slave(slave)) = self.node_by_id(id) else {
                    error!("{} keeps unknown memory {id}", desc.name);
                    return Err(PmError::Internal);
                };
                self.masters[master].add_memory(slave)?;
            }
        }
        Ok(())
    }

    /// Reads the state of the hardware, and takes the use counts that state implies.
    fn init(&mut self) -> Result<(), PmError> {
        self.clocks.init(&self.platform);

        for power in 0..self.powers.len() {
            let on = self.platform.power_is_on(self.powers[power].node.id());
            let state = if on { PowerState::On } else { PowerState::Off };
            self.powers[power].node.init_state(state as u8);
        }
        for power in 0..self.powers.len() {
            if self.powers[power].is_on() {
                self.request_parent_power(NodeRef::Power(power))?;
                self.request_node_clocks(NodeRef::Power(power))?;
            }
        }

        for proc in 0..self.procs.len() {
            let node = NodeRef::Processor(proc);
            if self.platform.processor_is_running(self.procs[proc].node.id()) {
                self.procs[proc].node.init_state(ProcState::Active as u8);
                self.request_parent_power(node)?;
                self.request_node_clocks(node)?;
            } else {
                self.procs[proc].node.init_state(ProcState::ForcedOff as u8);
            }
        }

        for slave in 0..self.slaves.len() {
            let desc = self.slaves[slave].desc;
            let state = self
                .platform
                .slave_initial_state(desc.node.id)
                .unwrap_or(desc.initial_state);
            if usize::from(state) >= desc.fsm.states.len() {
                error!("{} starts in invalid state {state}", desc.node.name);
                return Err(PmError::Internal);
            }
            self.slaves[slave].node.init_state(state);
            let caps = desc.fsm.caps(state);
            if caps.contains(Capabilities::POWER) {
                self.request_parent_power(NodeRef::Slave(slave))?;
            }
            if caps.contains(Capabilities::CLOCKED) {
                self.request_node_clocks(NodeRef::Slave(slave))?;
            }
        }

        for master in 0..self.masters.len() {
            let active = self.masters[master]
                .procs
                .iter()
                .any(|&proc| self.procs[proc].state() == ProcState::Active);
            let state = if active {
                MasterState::Active
            } else {
                MasterState::Uninitialized
            };
            self.masters[master].set_state(state);
        }
        info!("Power management engine initialised");
        Ok(())
    }

    /// Forgets the loaded configuration.
    ///
    /// Every requirement is dropped without changing any slave's state, and all permissions are
    /// revoked. The static topology and the state of the hardware are untouched.
    pub fn reset(&mut self) {
        self.reqs.clear();
        for master in &mut self.masters {
            master.clear_config();
        }
        for slave in &mut self.slaves {
            slave.clear_config();
        }
        for power in &mut self.powers {
            power.clear_config();
        }
        for node in self.all_nodes() {
            self.node_clear_config(node);
        }
        self.resets.clear_config();
        self.system.clear_config();
    }

    /// Returns the platform.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Returns the platform mutably.
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Finds the configured master that owns the given IPI channel.
    pub fn master_by_ipi(&self, ipi_mask: u32) -> Option<usize> {
        self.masters
            .iter()
            .position(|master| master.is_configured() && master.ipi_mask() & ipi_mask != 0)
    }

    /// Finds a master by its node identifier.
    pub fn master_by_node(&self, id: NodeId) -> Option<usize> {
        self.masters.iter().position(|master| master.id() == id)
    }

    /// Returns the IPI mask of a master.
    pub fn master_ipi_mask(&self, master: usize) -> u32 {
        self.masters[master].ipi_mask()
    }

    pub(crate) fn send_callback(&mut self, ipi_mask: u32, payload: [u32; CALLBACK_ARG_CNT]) {
        if ipi_mask == 0 {
            return;
        }
        self.platform.send_callback(ipi_mask, &payload);
    }
}

impl<P: Platform> Debug for Engine<P> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Engine")
            .field("procs", &self.procs)
            .field("powers", &self.powers)
            .field("slaves", &self.slaves)
            .field("masters", &self.masters)
            .field("reqs", &self.reqs)
            .field("system", &self.system)
            .finish_non_exhaustive()
    }
}
