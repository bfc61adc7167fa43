// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Masters: the processor clusters that make requests, and their suspend/wake state machine.

use super::{
    AbortReason, CallbackId, Engine, NodeId, PmError, RequestAck, SuspendReason, SuspendState,
    callback_payload,
    node::NodeRef,
    proc::{ProcEvent, ProcState},
    requirement::{ReleaseKind, RequirementFlags},
};
use crate::{ipi::SUCCESS, platform::Platform};
use arrayvec::ArrayVec;
use log::{debug, info, warn};
use num_enum::TryFromPrimitive;

/// The maximum number of processors in a master.
pub const MAX_MASTER_PROCS: usize = 4;
/// The maximum number of memories a master keeps across the power-off suspend state.
pub const MAX_MASTER_MEMORIES: usize = 8;

/// The state of a master.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum MasterState {
    /// None of its processors has run since the engine started.
    #[default]
    Uninitialized = 0,
    /// At least one processor is running.
    Active = 1,
    /// The last running processor is about to suspend.
    Suspending = 2,
    /// Every processor is asleep or off, after a suspend.
    Suspended = 3,
    /// Every processor was forced off.
    Killed = 4,
}

/// Events driving the master state machine, forwarded from its processors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MasterEvent {
    /// A processor announced its suspend.
    SelfSuspend,
    /// A processor went to sleep.
    Sleep,
    /// A processor woke.
    Wake,
    /// A processor aborted its suspend.
    Abort,
    /// A processor was forced off.
    ForcedProc,
}

/// The static description of a master.
#[derive(Debug)]
pub struct MasterDesc {
    /// The identifier other masters address it by.
    pub id: NodeId,
    /// Name used in logs.
    pub name: &'static str,
    /// The IPI channels of the master until a configuration says otherwise.
    pub ipi_mask: u32,
    /// Its processors. The first is woken when no other is known to have suspended last.
    pub procs: &'static [NodeId],
    /// Memories that must keep their context in the power-off suspend state.
    pub mem_list: &'static [NodeId],
    /// Whether the master's wake interrupts go through the GIC proxy.
    pub gic_proxy: bool,
}

#[derive(Clone, Copy, Debug)]
struct PendingSuspend {
    initiator: usize,
    ack: RequestAck,
}

/// A master.
#[derive(Debug)]
pub struct Master {
    desc: &'static MasterDesc,
    state: MasterState,
    configured: bool,
    ipi_mask: u32,
    suspend_timeout: u32,
    suspend_perms: u32,
    wake_perms: u32,
    pub(crate) procs: ArrayVec<usize, MAX_MASTER_PROCS>,
    pub(crate) mem_list: ArrayVec<usize, MAX_MASTER_MEMORIES>,
    /// Head of the list of the master's requirements.
    pub(crate) reqs: Option<usize>,
    /// The processor to wake when the master as a whole is woken.
    wake_proc: Option<usize>,
    pending_suspend: Option<PendingSuspend>,
    pub(crate) pos_requested: bool,
}

impl Master {
    pub(crate) fn new(desc: &'static MasterDesc) -> Self {
        Self {
            desc,
            state: MasterState::Uninitialized,
            configured: false,
            ipi_mask: desc.ipi_mask,
            suspend_timeout: 0,
            suspend_perms: 0,
            wake_perms: 0,
            procs: ArrayVec::new(),
            mem_list: ArrayVec::new(),
            reqs: None,
            wake_proc: None,
            pending_suspend: None,
            pos_requested: false,
        }
    }

    pub(crate) fn desc(&self) -> &'static MasterDesc {
        self.desc
    }

    /// Returns the master's identifier.
    pub fn id(&self) -> NodeId {
        self.desc.id
    }

    /// Returns the master's name.
    pub fn name(&self) -> &'static str {
        self.desc.name
    }

    /// Returns the current state.
    pub fn state(&self) -> MasterState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: MasterState) {
        if self.state != state {
            debug!("{}: {:?} -> {state:?}", self.desc.name, self.state);
            self.state = state;
        }
    }

    /// Returns whether a configuration object has assigned the master.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Returns the master's IPI channels.
    pub fn ipi_mask(&self) -> u32 {
        self.ipi_mask
    }

    /// Returns the IPI mask of the masters allowed to ask this one to suspend.
    pub fn suspend_perms(&self) -> u32 {
        self.suspend_perms
    }

    /// Returns the IPI mask of the masters allowed to wake this one.
    pub fn wake_perms(&self) -> u32 {
        self.wake_perms
    }

    pub(crate) fn add_proc(&mut self, proc: usize) -> Result<(), PmError> {
        self.procs
            .try_push(proc)
            .map_err(|_| PmError::Internal)
    }

    pub(crate) fn add_memory(&mut self, slave: usize) -> Result<(), PmError> {
        self.mem_list
            .try_push(slave)
            .map_err(|_| PmError::Internal)
    }

    pub(crate) fn configure(
        &mut self,
        ipi_mask: u32,
        suspend_timeout: u32,
        suspend_perms: u32,
        wake_perms: u32,
    ) {
        self.configured = true;
        self.ipi_mask = ipi_mask;
        self.suspend_timeout = suspend_timeout;
        self.suspend_perms = suspend_perms;
        self.wake_perms = wake_perms;
    }

    /// Forgets the configuration. The state of the master's processors stays as it is.
    pub(crate) fn clear_config(&mut self) {
        self.configured = false;
        self.ipi_mask = self.desc.ipi_mask;
        self.suspend_timeout = 0;
        self.suspend_perms = 0;
        self.wake_perms = 0;
        self.reqs = None;
        self.pending_suspend = None;
        self.pos_requested = false;
    }
}

impl<P: Platform> Engine<P> {
    fn master_procs_all(&self, master: usize, f: impl Fn(ProcState) -> bool) -> bool {
        self.masters[master]
            .procs
            .iter()
            .all(|&proc| f(self.procs[proc].state()))
    }

    /// Runs an event from processor `proc` through the state machine of its master.
    pub(crate) fn master_fsm(
        &mut self,
        master: usize,
        event: MasterEvent,
        proc: usize,
    ) -> Result<(), PmError> {
        let state = self.masters[master].state;
        match (state, event) {
            (MasterState::Active, MasterEvent::SelfSuspend) => {
                let last_awake = self.masters[master]
                    .procs
                    .iter()
                    .all(|&other| other == proc || self.procs[other].state() != ProcState::Active);
                if last_awake {
                    self.masters[master].set_state(MasterState::Suspending);
                }
            }
            (MasterState::Suspending, MasterEvent::Sleep) => {
                if self.master_procs_all(master, |state| {
                    matches!(state, ProcState::Sleep | ProcState::ForcedOff)
                }) {
                    self.master_suspend(master)?;
                }
            }
            (MasterState::Suspended, MasterEvent::Wake) => {
                self.update_scheduled(master, false)?;
                self.master_wake_sources(master, false);
                self.masters[master].set_state(MasterState::Active);
            }
            (MasterState::Killed | MasterState::Uninitialized, MasterEvent::Wake) => {
                self.pre_request(master)?;
                self.masters[master].set_state(MasterState::Active);
            }
            (MasterState::Suspending, MasterEvent::Wake) => {
                self.cancel_scheduled(master);
                self.masters[master].set_state(MasterState::Active);
            }
            (MasterState::Suspending, MasterEvent::Abort) => {
                self.cancel_scheduled(master);
                self.masters[master].set_state(MasterState::Active);
                self.master_ack_initiator(master, PmError::AbortSuspend.into());
            }
            (_, MasterEvent::ForcedProc) => {
                if state != MasterState::Killed
                    && self.master_procs_all(master, |state| state == ProcState::ForcedOff)
                {
                    self.master_cleanup(master)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Puts the master's suspended requirements into effect once its last processor sleeps.
    fn master_suspend(&mut self, master: usize) -> Result<(), PmError> {
        self.update_scheduled(master, true)?;
        self.masters[master].set_state(MasterState::Suspended);
        info!("{} suspended", self.masters[master].name());
        self.master_wake_sources(master, true);
        self.master_ack_initiator(master, SUCCESS);
        if self.masters[master].pos_requested {
            self.masters[master].pos_requested = false;
            self.system_try_power_off_suspend(master)?;
        }
        Ok(())
    }

    /// Tells the master that asked this one to suspend how it went.
    fn master_ack_initiator(&mut self, master: usize, status: u32) {
        let Some(pending) = self.masters[master].pending_suspend.take() else {
            return;
        };
        if pending.ack != RequestAck::NonBlocking {
            return;
        }
        let id = self.masters[master].id();
        let state = self.node_state_by_id(id).unwrap_or_default();
        let ipi_mask = self.masters[pending.initiator].ipi_mask();
        self.send_callback(
            ipi_mask,
            callback_payload(CallbackId::Acknowledge, [id.0, status, state.into(), 0]),
        );
    }

    /// Enables or disables the wake sources the master has asked for.
    fn master_wake_sources(&mut self, master: usize, enable: bool) {
        if !self.masters[master].desc.gic_proxy {
            return;
        }
        let mut cursor = self.masters[master].reqs;
        while let Some(req) = cursor {
            let record = &self.reqs[req];
            cursor = record.next_in_master;
            if !record.flags().contains(RequirementFlags::WAKEUP) {
                continue;
            }
            if let Some(wake) = self.slaves[record.slave()].desc.wake {
                self.platform.gic_proxy_wake(wake.group, wake.mask, enable);
            }
        }
    }

    /// Wakes the processor of the master that suspended last.
    pub(crate) fn master_wake(&mut self, master: usize) -> Result<(), PmError> {
        let record = &self.masters[master];
        let Some(proc) = record.wake_proc.or_else(|| record.procs.first().copied()) else {
            return Err(PmError::Internal);
        };
        match self.procs[proc].state() {
            ProcState::Sleep | ProcState::ForcedOff => self.proc_fsm(proc, ProcEvent::Wake),
            ProcState::Suspending => self.proc_fsm(proc, ProcEvent::Abort),
            ProcState::Active => Ok(()),
        }
    }

    /// Gives up everything a master whose processors are all off holds.
    fn master_cleanup(&mut self, master: usize) -> Result<(), PmError> {
        let mut cursor = self.masters[master].reqs;
        while let Some(req) = cursor {
            let record = &self.reqs[req];
            cursor = record.next_in_master;
            if !record.flags().contains(RequirementFlags::USED) {
                continue;
            }
            let slave = record.slave();
            let shared = self.slave_requirements(slave).any(|other| {
                let other = &self.reqs[other];
                other.master().is_some_and(|owner| owner != master)
                    && other.flags().contains(RequirementFlags::USED)
            });
            if !shared {
                self.slave_idle_if_active(slave)?;
            }
        }
        self.release_requirements(master, ReleaseKind::All)?;

        let record = &mut self.masters[master];
        record.pending_suspend = None;
        record.pos_requested = false;
        record.wake_proc = None;
        if record.state != MasterState::Uninitialized {
            record.set_state(MasterState::Killed);
        }
        info!("{} is down", record.name());
        Ok(())
    }

    /// Forces every processor of the master off and releases everything it holds.
    pub(crate) fn master_force_down(&mut self, master: usize) -> Result<(), PmError> {
        for index in 0..self.masters[master].procs.len() {
            let proc = self.masters[master].procs[index];
            self.proc_force_down(proc)?;
        }
        if self.masters[master].state != MasterState::Killed {
            self.master_cleanup(master)?;
        }
        Ok(())
    }

    /// Resolves a processor of the caller.
    fn own_processor(&self, master: usize, node: NodeId) -> Result<usize, PmError> {
        let Some(NodeRef::Processor(proc)) = self.node_by_id(node) else {
            return Err(PmError::InvalidParam);
        };
        if self.procs[proc].master != Some(master) {
            return Err(PmError::NoAccess);
        }
        Ok(proc)
    }

    /// Asks another master to suspend.
    pub fn request_suspend(
        &mut self,
        master: usize,
        target: NodeId,
        ack: RequestAck,
        latency: u32,
        state: u32,
    ) -> Result<(), PmError> {
        let target = self.master_by_node(target).ok_or(PmError::InvalidParam)?;
        let caller_mask = self.masters[master].ipi_mask();
        let record = &mut self.masters[target];
        if record.suspend_perms & caller_mask == 0 {
            return Err(PmError::NoAccess);
        }
        if record.state != MasterState::Active {
            return Err(PmError::Conflict);
        }
        record.pending_suspend = Some(PendingSuspend {
            initiator: master,
            ack,
        });
        let (ipi_mask, timeout) = (record.ipi_mask, record.suspend_timeout);
        self.send_callback(
            ipi_mask,
            callback_payload(
                CallbackId::InitSuspend,
                [SuspendReason::PowerUnitRequest as u32, latency, state, timeout],
            ),
        );
        Ok(())
    }

    /// Announces that a processor of the caller is about to suspend.
    pub fn self_suspend(
        &mut self,
        master: usize,
        node: NodeId,
        latency: u32,
        state: SuspendState,
        address: u64,
    ) -> Result<(), PmError> {
        let proc = self.own_processor(master, node)?;
        self.proc_fsm(proc, ProcEvent::SelfSuspend)?;
        self.procs[proc].resume_address = Some(address);
        self.proc_set_latency(proc, latency)?;
        let record = &mut self.masters[master];
        record.wake_proc = Some(proc);
        record.pos_requested = state == SuspendState::PowerOff;
        Ok(())
    }

    /// Aborts a suspend the caller announced.
    pub fn abort_suspend(
        &mut self,
        master: usize,
        reason: AbortReason,
        node: NodeId,
    ) -> Result<(), PmError> {
        let proc = self.own_processor(master, node)?;
        info!("{} aborts suspend: {reason:?}", self.masters[master].name());
        self.proc_fsm(proc, ProcEvent::Abort)
    }

    /// Wakes a processor, or the master with the given identifier.
    pub fn request_wakeup(
        &mut self,
        master: usize,
        target: NodeId,
        address: Option<u64>,
    ) -> Result<(), PmError> {
        let (owner, proc) = if let Some(owner) = self.master_by_node(target) {
            let record = &self.masters[owner];
            let proc = record
                .wake_proc
                .or_else(|| record.procs.first().copied())
                .ok_or(PmError::Internal)?;
            (owner, proc)
        } else if let Some(NodeRef::Processor(proc)) = self.node_by_id(target) {
            (self.procs[proc].master.ok_or(PmError::InvalidParam)?, proc)
        } else {
            return Err(PmError::InvalidParam);
        };
        if owner != master
            && self.masters[owner].wake_perms & self.masters[master].ipi_mask() == 0
        {
            return Err(PmError::NoAccess);
        }

        if address.is_some() {
            self.procs[proc].resume_address = address;
        }
        match self.procs[proc].state() {
            ProcState::Active => Ok(()),
            ProcState::Suspending => self.proc_fsm(proc, ProcEvent::Abort),
            ProcState::Sleep | ProcState::ForcedOff => self.proc_fsm(proc, ProcEvent::Wake),
        }
    }

    /// Forces a processor or a power node down.
    pub fn force_powerdown(&mut self, master: usize, node: NodeId) -> Result<(), PmError> {
        let caller_mask = self.masters[master].ipi_mask();
        match self.node_by_id(node).ok_or(PmError::InvalidParam)? {
            NodeRef::Power(power) => {
                if self.powers[power].force_perms() & caller_mask == 0 {
                    return Err(PmError::NoAccess);
                }
                self.power_force_down(power)
            }
            NodeRef::Processor(proc) => {
                let record = &self.procs[proc];
                let allowed = record.master == Some(master)
                    || record
                        .node
                        .parent()
                        .is_some_and(|parent| self.powers[parent].force_perms() & caller_mask != 0);
                if !allowed {
                    return Err(PmError::NoAccess);
                }
                self.proc_force_down(proc)
            }
            NodeRef::Slave(_) => Err(PmError::InvalidParam),
        }
    }

    /// Sets or clears a slave as a wake source of the caller.
    pub fn set_wakeup_source(
        &mut self,
        master: usize,
        target: NodeId,
        source: NodeId,
        enable: bool,
    ) -> Result<(), PmError> {
        let target = self.master_by_node(target).ok_or(PmError::InvalidParam)?;
        if target != master {
            return Err(PmError::NoAccess);
        }
        let Some(NodeRef::Slave(slave)) = self.node_by_id(source) else {
            return Err(PmError::InvalidParam);
        };
        if self.slaves[slave].desc.wake.is_none() {
            return Err(PmError::InvalidParam);
        }
        let req = self
            .find_requirement(master, slave)
            .ok_or(PmError::NoAccess)?;
        self.reqs[req].set_flags(RequirementFlags::WAKEUP, enable);
        Ok(())
    }

    /// Wakes every suspended master one of whose wake sources fired.
    pub fn handle_gic_proxy_event(&mut self, group: u8, status: u32) -> Result<(), PmError> {
        let mut woken = false;
        for master in 0..self.masters.len() {
            if self.masters[master].state != MasterState::Suspended {
                continue;
            }
            let fired = self.master_requirements(master).any(|req| {
                let record = &self.reqs[req];
                record.flags().contains(RequirementFlags::WAKEUP)
                    && self.slaves[record.slave()]
                        .desc
                        .wake
                        .is_some_and(|wake| wake.group == group && wake.mask & status != 0)
            });
            if fired {
                debug!("{} woken by GIC proxy group {group}", self.masters[master].name());
                self.master_wake(master)?;
                woken = true;
            }
        }
        if !woken {
            warn!("Unexpected GIC proxy event in group {group}: {status:#x}");
        }
        Ok(())
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
        services::pm::slave::Capabilities,
    };

    fn proc(engine: &Engine<TestPlatform>, id: NodeId) -> usize {
        let Some(NodeRef::Processor(index)) = engine.node_by_id(id) else {
            panic!("{id} is not a processor");
        };
        index
    }

    fn masters(engine: &Engine<TestPlatform>) -> (usize, usize) {
        (
            engine.master_by_node(NODE_APU).unwrap(),
            engine.master_by_node(NODE_RPU_0).unwrap(),
        )
    }

    fn sleep(engine: &mut Engine<TestPlatform>, id: NodeId) {
        let wfi = engine.procs[proc(engine, id)].desc.wfi_mask;
        engine.handle_wfi_status(wfi).unwrap();
    }

    #[test]
    fn last_processor_suspends_master() {
        let mut engine = configured_engine();
        let (apu, _) = masters(&engine);
        engine.request_wakeup(apu, NODE_APU_1, None).unwrap();
        assert_eq!(
            ProcState::Active,
            engine.procs[proc(&engine, NODE_APU_1)].state()
        );

        engine
            .self_suspend(apu, NODE_APU_0, u32::MAX, SuspendState::CpuIdle, 0x1000)
            .unwrap();
        assert_eq!(MasterState::Active, engine.masters[apu].state());
        sleep(&mut engine, NODE_APU_0);
        assert_eq!(MasterState::Active, engine.masters[apu].state());

        engine
            .self_suspend(apu, NODE_APU_1, u32::MAX, SuspendState::CpuIdle, 0x2000)
            .unwrap();
        assert_eq!(MasterState::Suspending, engine.masters[apu].state());
        sleep(&mut engine, NODE_APU_1);
        assert_eq!(MasterState::Suspended, engine.masters[apu].state());

        // The processor that suspended last is the one woken.
        engine.request_wakeup(apu, NODE_APU, None).unwrap();
        assert_eq!(
            Some(&Event::ProcWake(NODE_APU_1, Some(0x2000))),
            engine.platform().events.last()
        );
        assert_eq!(MasterState::Active, engine.masters[apu].state());
    }

    #[test]
    fn scheduled_requirements_follow_suspend_and_wake() {
        let mut engine = configured_engine();
        let (apu, _) = masters(&engine);
        engine
            .request_node(apu, NODE_OCM_0, Capabilities::ACCESS | Capabilities::CONTEXT)
            .unwrap();
        engine
            .self_suspend(apu, NODE_APU_0, u32::MAX, SuspendState::CpuIdle, 0)
            .unwrap();
        engine
            .set_requirement(apu, NODE_OCM_0, Capabilities::CONTEXT)
            .unwrap();
        assert_eq!(Some(2), engine.node_state_by_id(NODE_OCM_0));

        sleep(&mut engine, NODE_APU_0);
        assert_eq!(MasterState::Suspended, engine.masters[apu].state());
        assert_eq!(Some(1), engine.node_state_by_id(NODE_OCM_0));

        let wake = engine.procs[proc(&engine, NODE_APU_0)].desc.wake_mask;
        engine.handle_wake_status(wake).unwrap();
        assert_eq!(MasterState::Active, engine.masters[apu].state());
        assert_eq!(Some(2), engine.node_state_by_id(NODE_OCM_0));
    }

    #[test]
    fn abort_drops_scheduled_requirements() {
        let mut engine = configured_engine();
        let (apu, _) = masters(&engine);
        engine
            .request_node(apu, NODE_OCM_0, Capabilities::ACCESS | Capabilities::CONTEXT)
            .unwrap();
        engine
            .self_suspend(apu, NODE_APU_0, u32::MAX, SuspendState::CpuIdle, 0)
            .unwrap();
        engine
            .set_requirement(apu, NODE_OCM_0, Capabilities::empty())
            .unwrap();
        engine
            .abort_suspend(apu, AbortReason::WakeupEvent, NODE_APU_0)
            .unwrap();

        assert_eq!(MasterState::Active, engine.masters[apu].state());
        let Some(NodeRef::Slave(ocm)) = engine.node_by_id(NODE_OCM_0) else {
            panic!();
        };
        let req = engine.find_requirement(apu, ocm).unwrap();
        assert_eq!(engine.reqs[req].curr(), engine.reqs[req].next());
        assert_eq!(Some(2), engine.node_state_by_id(NODE_OCM_0));
    }

    #[test]
    fn suspend_request_is_acknowledged() {
        let mut engine = configured_engine();
        let (apu, rpu) = masters(&engine);
        engine
            .request_suspend(rpu, NODE_APU, RequestAck::NonBlocking, 100, 0)
            .unwrap();
        assert_eq!(
            Some(&Event::Callback(
                IPI_APU,
                [CallbackId::InitSuspend as u32, 201, 100, 0, 1000]
            )),
            engine.platform().events.last()
        );

        engine
            .self_suspend(apu, NODE_APU_0, u32::MAX, SuspendState::CpuIdle, 0)
            .unwrap();
        sleep(&mut engine, NODE_APU_0);
        let state = engine.node_state_by_id(NODE_APU).unwrap();
        assert!(engine.platform().events.contains(&Event::Callback(
            IPI_RPU_0,
            [CallbackId::Acknowledge as u32, NODE_APU.0, SUCCESS, state.into(), 0]
        )));
    }

    #[test]
    fn aborted_suspend_request_is_acknowledged() {
        let mut engine = configured_engine();
        let (apu, rpu) = masters(&engine);
        engine
            .request_suspend(rpu, NODE_APU, RequestAck::NonBlocking, 0, 0)
            .unwrap();
        engine
            .self_suspend(apu, NODE_APU_0, u32::MAX, SuspendState::CpuIdle, 0)
            .unwrap();
        engine
            .abort_suspend(apu, AbortReason::NoPowerDown, NODE_APU_0)
            .unwrap();
        let Some(Event::Callback(ipi_mask, payload)) = engine.platform().events.last() else {
            panic!("no callback");
        };
        assert_eq!(IPI_RPU_0, *ipi_mask);
        assert_eq!(u32::from(PmError::AbortSuspend), payload[2]);
    }

    #[test]
    fn suspend_request_checks() {
        let mut engine = configured_engine();
        let (apu, _) = masters(&engine);
        assert_eq!(
            Err(PmError::NoAccess),
            engine.request_suspend(apu, NODE_APU, RequestAck::Blocking, 0, 0)
        );
        // The RPU hasn't started.
        assert_eq!(
            Err(PmError::Conflict),
            engine.request_suspend(apu, NODE_RPU_0, RequestAck::Blocking, 0, 0)
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.request_suspend(apu, NODE_UART_0, RequestAck::Blocking, 0, 0)
        );
    }

    #[test]
    fn self_suspend_needs_own_processor() {
        let mut engine = configured_engine();
        let (_, rpu) = masters(&engine);
        assert_eq!(
            Err(PmError::NoAccess),
            engine.self_suspend(rpu, NODE_APU_0, 0, SuspendState::CpuIdle, 0)
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.self_suspend(rpu, NODE_UART_0, 0, SuspendState::CpuIdle, 0)
        );
    }

    #[test]
    fn wakeup_of_suspending_processor_aborts() {
        let mut engine = configured_engine();
        let (apu, _) = masters(&engine);
        engine
            .self_suspend(apu, NODE_APU_0, u32::MAX, SuspendState::CpuIdle, 0)
            .unwrap();
        engine.request_wakeup(apu, NODE_APU_0, None).unwrap();
        assert_eq!(
            ProcState::Active,
            engine.procs[proc(&engine, NODE_APU_0)].state()
        );
        assert_eq!(MasterState::Active, engine.masters[apu].state());
        // Waking a running processor does nothing.
        engine.request_wakeup(apu, NODE_APU_0, None).unwrap();
    }

    #[test]
    fn wakeup_needs_permission() {
        let mut engine = configured_engine();
        let (_, rpu) = masters(&engine);
        engine.masters[rpu].wake_perms = 0;
        let (apu, _) = masters(&engine);
        assert_eq!(
            Err(PmError::NoAccess),
            engine.request_wakeup(apu, NODE_RPU_0, None)
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.request_wakeup(apu, NODE_DDR, None)
        );
    }

    #[test]
    fn killed_master_gets_preallocation_back() {
        let mut engine = engine();
        engine
            .set_configuration(None, &base_config_with(&[[NODE_TCM_0_A.0, 1, 0x3]]))
            .unwrap();
        let (apu, rpu) = masters(&engine);
        assert_eq!(MasterState::Uninitialized, engine.masters[rpu].state());
        // Granted by the configuration before the RPU ever runs.
        assert_eq!(Some(2), engine.node_state_by_id(NODE_TCM_0_A));

        engine.request_wakeup(apu, NODE_RPU_0, Some(0x100)).unwrap();
        assert_eq!(MasterState::Active, engine.masters[rpu].state());
        assert_eq!(Some(2), engine.node_state_by_id(NODE_TCM_0_A));
        assert!(
            engine
                .platform()
                .events
                .contains(&Event::ProcWake(NODE_RPU_0, Some(0x100)))
        );

        engine.force_powerdown(apu, NODE_RPU_0).unwrap();
        assert_eq!(MasterState::Killed, engine.masters[rpu].state());
        assert_eq!(Some(0), engine.node_state_by_id(NODE_TCM_0_A));

        engine.request_wakeup(apu, NODE_RPU_0, None).unwrap();
        assert_eq!(MasterState::Active, engine.masters[rpu].state());
        assert_eq!(Some(2), engine.node_state_by_id(NODE_TCM_0_A));
    }

    #[test]
    fn uninitialized_master_stays_uninitialized_when_forced() {
        let mut engine = configured_engine();
        let (_, rpu) = masters(&engine);
        engine.master_force_down(rpu).unwrap();
        assert_eq!(MasterState::Uninitialized, engine.masters[rpu].state());
    }

    #[test]
    fn force_powerdown_permissions() {
        let mut engine = configured_engine();
        let (apu, rpu) = masters(&engine);
        assert_eq!(
            Err(PmError::NoAccess),
            engine.force_powerdown(rpu, NODE_FPD)
        );
        assert_eq!(
            Err(PmError::NoAccess),
            engine.force_powerdown(rpu, NODE_APU_0)
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.force_powerdown(apu, NODE_UART_0)
        );
        // Already off.
        engine.force_powerdown(apu, NODE_PLD).unwrap();
    }

    #[test]
    fn forced_master_idles_exclusive_slaves() {
        let mut engine = configured_engine();
        let (apu, _) = masters(&engine);
        engine
            .request_node(apu, NODE_UART_1, Capabilities::ACCESS)
            .unwrap();
        engine.clock_enable(apu, CLK_UART1_REF).unwrap();

        engine.master_force_down(apu).unwrap();
        assert_eq!(MasterState::Killed, engine.masters[apu].state());
        assert!(engine.platform().events.contains(&Event::SlaveIdle(NODE_UART_1)));
        assert_eq!(Some(0), engine.node_state_by_id(NODE_UART_1));
        assert!(engine.master_requirements(apu).all(|req| {
            !engine.reqs[req].flags().contains(RequirementFlags::USED)
        }));
    }

    #[test]
    fn gic_proxy_wakes_master() {
        let mut engine = configured_engine();
        let (apu, rpu) = masters(&engine);
        engine
            .request_node(apu, NODE_UART_1, Capabilities::ACCESS)
            .unwrap();
        assert_eq!(
            Err(PmError::NoAccess),
            engine.set_wakeup_source(rpu, NODE_APU, NODE_UART_1, true)
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.set_wakeup_source(apu, NODE_APU, NODE_DDR, true)
        );
        engine
            .set_wakeup_source(apu, NODE_APU, NODE_UART_1, true)
            .unwrap();

        engine
            .self_suspend(apu, NODE_APU_0, u32::MAX, SuspendState::CpuIdle, 0)
            .unwrap();
        sleep(&mut engine, NODE_APU_0);
        let wake = UART_1_WAKE;
        assert!(
            engine
                .platform()
                .events
                .contains(&Event::GicProxy(wake.group, wake.mask, true))
        );

        engine
            .handle_gic_proxy_event(wake.group, wake.mask)
            .unwrap();
        assert_eq!(MasterState::Active, engine.masters[apu].state());
        assert!(
            engine
                .platform()
                .events
                .contains(&Event::GicProxy(wake.group, wake.mask, false))
        );
    }
}
