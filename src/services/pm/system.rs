// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! System-wide policy: requirements held by the system itself, shutdown, the power-off suspend
//! state and register access on behalf of masters.

use super::{
    Engine, NodeId, PmError,
    master::{MAX_MASTER_MEMORIES, MasterState},
    node::NodeRef,
    requirement::RequirementFlags,
    slave::Capabilities,
};
use crate::platform::Platform;
use arrayvec::ArrayVec;
use log::{error, info, warn};
use num_enum::TryFromPrimitive;

/// The kind of system shutdown.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum ShutdownType {
    /// Stay down.
    Shutdown = 0,
    /// Come back up.
    Reset = 1,
}

/// What a system shutdown applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum ShutdownSubtype {
    /// Only the calling master.
    Subsystem = 0,
    /// The processing system, leaving the programmable logic alone.
    PsOnly = 1,
    /// The whole chip.
    System = 2,
}

/// A requirement the system holds on a slave whenever a configuration is loaded.
#[derive(Debug)]
pub struct SystemRequirement {
    /// The slave.
    pub slave: NodeId,
    /// The capabilities it always keeps.
    pub caps: Capabilities,
}

/// System-wide configuration and state.
#[derive(Debug, Default)]
pub struct System {
    pub(crate) shutdown_perms: u32,
    pub(crate) set_config_perms: u32,
    /// Whether any configuration object was loaded since boot.
    pub(crate) config_loaded: bool,
    pub(crate) gpo: u32,
    /// The master whose suspend put the system into the power-off suspend state.
    pos_master: Option<usize>,
}

impl System {
    /// Creates the state for a system with no configuration loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether a configuration object was loaded.
    pub fn config_loaded(&self) -> bool {
        self.config_loaded
    }

    /// Returns whether the system is in the power-off suspend state.
    pub fn in_power_off_suspend(&self) -> bool {
        self.pos_master.is_some()
    }

    /// Drops the permissions. Whether a configuration was ever loaded is remembered.
    pub(crate) fn clear_config(&mut self) {
        self.shutdown_perms = 0;
        self.set_config_perms = 0;
        self.gpo = 0;
    }
}

impl<P: Platform> Engine<P> {
    /// Adds the requirements the system keeps on its own.
    pub(crate) fn system_add_requirements(&mut self) -> Result<(), PmError> {
        for requirement in self.topology.system_requirements {
            let Some(NodeRef::Slave(slave)) = self.node_by_id(requirement.slave) else {
                error!("System requirement on unknown slave {}", requirement.slave);
                return Err(PmError::Internal);
            };
            let req = self.req_add(None, slave)?;
            let record = &mut self.reqs[req];
            record.set_flags(RequirementFlags::USED, true);
            record.set_default(requirement.caps);
            self.req_update(req, requirement.caps)?;
        }
        Ok(())
    }

    /// Shuts down or restarts the caller, the processing system or the whole chip.
    pub fn system_shutdown(
        &mut self,
        master: usize,
        kind: ShutdownType,
        subtype: ShutdownSubtype,
    ) -> Result<(), PmError> {
        if subtype == ShutdownSubtype::Subsystem {
            info!("{} shuts down its subsystem ({kind:?})", self.masters[master].name());
            self.master_force_down(master)?;
            if kind == ShutdownType::Reset {
                self.master_wake(master)?;
            }
            return Ok(());
        }
        if self.system.shutdown_perms & self.masters[master].ipi_mask() == 0 {
            return Err(PmError::NoAccess);
        }
        info!("System {kind:?} ({subtype:?}) by {}", self.masters[master].name());
        self.platform.system_shutdown(kind, subtype)
    }

    /// Enters the power-off suspend state if the master going to sleep was the last one running.
    ///
    /// Returns whether the state was entered.
    pub(crate) fn system_try_power_off_suspend(&mut self, master: usize) -> Result<bool, PmError> {
        let others_down = (0..self.masters.len())
            .filter(|&other| other != master)
            .all(|other| {
                matches!(
                    self.masters[other].state(),
                    MasterState::Suspended | MasterState::Killed | MasterState::Uninitialized
                )
            });
        if !others_down {
            info!("Power-off suspend refused: other masters are running");
            return Ok(false);
        }

        let record = &self.masters[master];
        if record.mem_list.is_empty() {
            warn!("Power-off suspend refused: {} keeps no memory", record.name());
            return Ok(false);
        }
        let mut retained = ArrayVec::<NodeId, MAX_MASTER_MEMORIES>::new();
        for &slave in &record.mem_list {
            let slave = &self.slaves[slave];
            if !slave
                .desc
                .fsm
                .caps(slave.node.state())
                .contains(Capabilities::CONTEXT)
            {
                warn!("Power-off suspend refused: {} would lose its context", slave.node.name());
                return Ok(false);
            }
            retained.push(slave.node.id());
        }

        self.clocks.save_all(&self.platform);
        self.platform.enter_power_off_suspend(&retained)?;
        self.system.pos_master = Some(master);
        info!("Entered power-off suspend");
        Ok(true)
    }

    /// Brings the system back from the power-off suspend state and wakes the master that entered
    /// it.
    pub fn resume_power_off_suspend(&mut self) -> Result<(), PmError> {
        let Some(master) = self.system.pos_master.take() else {
            warn!("Resume from power-off suspend, but it was never entered");
            return Ok(());
        };
        self.clocks.restore_all(&mut self.platform);
        info!("Resuming from power-off suspend");
        self.master_wake(master)
    }

    /// Writes the bits of `value` selected by `mask` to a register on behalf of a master.
    pub fn mmio_write(
        &mut self,
        master: usize,
        address: u32,
        mask: u32,
        value: u32,
    ) -> Result<(), PmError> {
        let ipi_mask = self.masters[master].ipi_mask();
        if !self.platform.mmio_permitted(ipi_mask, address, true) {
            return Err(PmError::NoAccess);
        }
        self.platform.write_register(address, mask, value);
        Ok(())
    }

    /// Reads a register on behalf of a master.
    pub fn mmio_read(&self, master: usize, address: u32) -> Result<u32, PmError> {
        let ipi_mask = self.masters[master].ipi_mask();
        if !self.platform.mmio_permitted(ipi_mask, address, false) {
            return Err(PmError::NoAccess);
        }
        Ok(self.platform.read_register(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::{
            test::{Event, TestPlatform, test_helpers::*},
            zynqmp::*,
        },
        services::pm::{SuspendState, proc::ProcState},
    };

    fn suspend_apu(engine: &mut Engine<TestPlatform>, state: SuspendState) {
        let apu = engine.master_by_node(NODE_APU).unwrap();
        engine
            .self_suspend(apu, NODE_APU_0, u32::MAX, state, 0x4000)
            .unwrap();
        let Some(NodeRef::Processor(apu_0)) = engine.node_by_id(NODE_APU_0) else {
            panic!();
        };
        let wfi = engine.procs[apu_0].desc.wfi_mask;
        engine.handle_wfi_status(wfi).unwrap();
        assert_eq!(MasterState::Suspended, engine.masters[apu].state());
    }

    fn entered_pos(engine: &Engine<TestPlatform>) -> bool {
        engine
            .platform()
            .events
            .iter()
            .any(|event| matches!(event, Event::EnterPos(_)))
    }

    #[test]
    fn system_requirement_keeps_context() {
        let mut engine = configured_engine();
        let apu = engine.master_by_node(NODE_APU).unwrap();
        let Some(NodeRef::Slave(ddr)) = engine.node_by_id(NODE_DDR) else {
            panic!();
        };
        let system = engine
            .slave_requirements(ddr)
            .find(|&req| engine.reqs[req].master().is_none())
            .unwrap();
        assert_eq!(Capabilities::CONTEXT, engine.reqs[system].curr());

        engine.release_node(apu, NODE_DDR).unwrap();
        assert_eq!(Some(1), engine.node_state_by_id(NODE_DDR));
    }

    #[test]
    fn power_off_suspend_and_resume() {
        let mut engine = configured_engine();
        suspend_apu(&mut engine, SuspendState::PowerOff);
        assert!(engine.platform().events.contains(&Event::EnterPos(vec![
            NODE_OCM_0, NODE_OCM_1, NODE_OCM_2, NODE_OCM_3, NODE_DDR
        ])));
        assert!(engine.system.in_power_off_suspend());

        engine.resume_power_off_suspend().unwrap();
        assert!(!engine.system.in_power_off_suspend());
        let apu = engine.master_by_node(NODE_APU).unwrap();
        assert_eq!(MasterState::Active, engine.masters[apu].state());
        assert_eq!(
            Some(&Event::ProcWake(NODE_APU_0, Some(0x4000))),
            engine
                .platform()
                .events
                .iter()
                .rfind(|event| matches!(event, Event::ProcWake(..)))
        );
    }

    #[test]
    fn power_off_suspend_needs_retained_memory() {
        let mut engine = configured_engine();
        let ocm = engine.node_by_id(NODE_OCM_2).unwrap();
        engine.node_force_down(ocm).unwrap();
        suspend_apu(&mut engine, SuspendState::PowerOff);
        assert!(!entered_pos(&engine));
        assert!(!engine.system.in_power_off_suspend());
    }

    #[test]
    fn power_off_suspend_needs_other_masters_down() {
        let mut engine = configured_engine();
        let apu = engine.master_by_node(NODE_APU).unwrap();
        engine.request_wakeup(apu, NODE_RPU_0, None).unwrap();
        suspend_apu(&mut engine, SuspendState::PowerOff);
        assert!(!entered_pos(&engine));
    }

    #[test]
    fn cpu_idle_suspend_never_enters_pos() {
        let mut engine = configured_engine();
        suspend_apu(&mut engine, SuspendState::CpuIdle);
        assert!(!entered_pos(&engine));
    }

    #[test]
    fn resume_without_pos_does_nothing() {
        let mut engine = configured_engine();
        let events = engine.platform().events.len();
        engine.resume_power_off_suspend().unwrap();
        assert_eq!(events, engine.platform().events.len());
    }

    #[test]
    fn subsystem_shutdown_and_restart() {
        let mut engine = configured_engine();
        let apu = engine.master_by_node(NODE_APU).unwrap();
        let rpu = engine.master_by_node(NODE_RPU_0).unwrap();
        engine.request_wakeup(apu, NODE_RPU_0, None).unwrap();

        engine
            .system_shutdown(rpu, ShutdownType::Reset, ShutdownSubtype::Subsystem)
            .unwrap();
        assert_eq!(MasterState::Active, engine.masters[rpu].state());
        let events = &engine.platform().events;
        let down = events
            .iter()
            .rposition(|event| *event == Event::ProcForceDown(NODE_RPU_0))
            .unwrap();
        let up = events
            .iter()
            .rposition(|event| *event == Event::ProcWake(NODE_RPU_0, None))
            .unwrap();
        assert!(down < up);

        engine
            .system_shutdown(apu, ShutdownType::Shutdown, ShutdownSubtype::Subsystem)
            .unwrap();
        assert_eq!(MasterState::Killed, engine.masters[apu].state());
        let Some(NodeRef::Processor(apu_0)) = engine.node_by_id(NODE_APU_0) else {
            panic!();
        };
        assert_eq!(ProcState::ForcedOff, engine.procs[apu_0].state());
    }

    #[test]
    fn system_shutdown_needs_permission() {
        let mut engine = configured_engine();
        let apu = engine.master_by_node(NODE_APU).unwrap();
        let rpu = engine.master_by_node(NODE_RPU_0).unwrap();
        assert_eq!(
            Err(PmError::NoAccess),
            engine.system_shutdown(rpu, ShutdownType::Reset, ShutdownSubtype::System)
        );
        engine
            .system_shutdown(apu, ShutdownType::Reset, ShutdownSubtype::PsOnly)
            .unwrap();
        assert_eq!(
            Some(&Event::Shutdown(ShutdownType::Reset, ShutdownSubtype::PsOnly)),
            engine.platform().events.last()
        );
    }

    #[test]
    fn mmio_access() {
        let mut engine = configured_engine();
        let apu = engine.master_by_node(NODE_APU).unwrap();
        let rpu = engine.master_by_node(NODE_RPU_0).unwrap();
        const ADDRESS: u32 = 0xFF0A_0040;

        engine.mmio_write(apu, ADDRESS, 0xFF, 0x1234).unwrap();
        assert_eq!(Ok(0x34), engine.mmio_read(apu, ADDRESS));
        assert_eq!(
            Err(PmError::NoAccess),
            engine.mmio_write(rpu, ADDRESS, 0xFF, 0)
        );
        assert_eq!(Err(PmError::NoAccess), engine.mmio_read(rpu, ADDRESS));
    }

    #[test]
    fn clear_config_remembers_load() {
        let mut system = System::new();
        system.config_loaded = true;
        system.shutdown_perms = 1;
        system.clear_config();
        assert!(system.config_loaded());
        assert_eq!(0, system.shutdown_perms);
    }
}
