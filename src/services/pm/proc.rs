// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Processors and their sleep/wake state machine.

use super::{
    Engine, PmError,
    master::MasterEvent,
    node::{MAX_LATENCY, Node, NodeDesc, NodeRef},
};
use crate::platform::Platform;
use log::{debug, info, warn};
use num_enum::TryFromPrimitive;

/// The state of a processor. The discriminants are the node states reported to masters.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ProcState {
    /// Powered off, either from the start or by force.
    ForcedOff = 0,
    /// Running.
    Active = 1,
    /// Asleep after having suspended itself; a wake interrupt brings it back.
    Sleep = 2,
    /// Has announced its suspend and will execute its wait-for-interrupt instruction.
    Suspending = 3,
}

/// Events driving the processor state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcEvent {
    /// The processor announced it is about to suspend.
    SelfSuspend,
    /// The processor executed its wait-for-interrupt instruction.
    Sleep,
    /// The processor should run again.
    Wake,
    /// The processor must go down now.
    ForcePowerDown,
    /// The processor changed its mind about suspending.
    Abort,
}

impl ProcEvent {
    fn master_event(self) -> MasterEvent {
        match self {
            Self::SelfSuspend => MasterEvent::SelfSuspend,
            Self::Sleep => MasterEvent::Sleep,
            Self::Wake => MasterEvent::Wake,
            Self::ForcePowerDown => MasterEvent::ForcedProc,
            Self::Abort => MasterEvent::Abort,
        }
    }
}

/// The static description of a processor.
#[derive(Debug)]
pub struct ProcDesc {
    /// The node description.
    pub node: NodeDesc,
    /// Time from the wake interrupt until the processor runs again.
    pub wake_latency: u32,
    /// The processor's bit in the wait-for-interrupt interrupt status.
    pub wfi_mask: u32,
    /// The processor's bit in the wake interrupt status.
    pub wake_mask: u32,
}

/// A processor.
#[derive(Debug)]
pub struct Processor {
    pub(crate) node: Node,
    pub(crate) desc: &'static ProcDesc,
    /// The master the processor belongs to.
    pub(crate) master: Option<usize>,
    /// Where to resume on the next wake.
    pub(crate) resume_address: Option<u64>,
    /// The wake-up latency asked for in the last self-suspend.
    pub(crate) latency_req: u32,
}

impl Processor {
    pub(crate) fn new(desc: &'static ProcDesc) -> Self {
        Self {
            node: Node::new(&desc.node),
            desc,
            master: None,
            resume_address: None,
            latency_req: MAX_LATENCY,
        }
    }

    /// Returns the index of the master owning the processor.
    pub fn master(&self) -> Option<usize> {
        self.master
    }

    /// Returns the current state.
    pub fn state(&self) -> ProcState {
        ProcState::try_from(self.node.state()).unwrap_or(ProcState::ForcedOff)
    }
}

impl<P: Platform> Engine<P> {
    /// Runs an event through the processor state machine, then through its master's.
    pub(crate) fn proc_fsm(&mut self, proc: usize, event: ProcEvent) -> Result<(), PmError> {
        self.proc_fsm_inner(proc, event)?;
        match self.procs[proc].master {
            Some(master) => self.master_fsm(master, event.master_event(), proc),
            None => Ok(()),
        }
    }

    fn proc_fsm_inner(&mut self, proc: usize, event: ProcEvent) -> Result<(), PmError> {
        let node = NodeRef::Processor(proc);
        let record = &self.procs[proc];
        let id = record.node.id();
        let state = record.state();
        debug!("{}: {event:?} in {state:?}", record.node.name());

        let new_state = match (state, event) {
            (ProcState::Active, ProcEvent::SelfSuspend) => {
                self.platform.processor_wfi_interrupt(id, true);
                ProcState::Suspending
            }
            (ProcState::Suspending, ProcEvent::Sleep) => {
                self.platform.processor_sleep(id)?;
                self.platform.processor_wfi_interrupt(id, false);
                self.release_node_clocks(node)?;
                self.release_parent_power(node)?;
                ProcState::Sleep
            }
            (ProcState::Sleep | ProcState::ForcedOff, ProcEvent::Wake) => {
                self.request_parent_power(node)?;
                let result = self.request_node_clocks(node).and_then(|()| {
                    let address = self.procs[proc].resume_address.take();
                    self.platform.processor_wake(id, address)
                });
                if let Err(e) = result {
                    self.release_node_clocks(node)?;
                    self.release_parent_power(node)?;
                    return Err(e);
                }
                self.procs[proc].latency_req = MAX_LATENCY;
                self.procs[proc].node.set_latency_margin(MAX_LATENCY);
                ProcState::Active
            }
            (
                ProcState::Active | ProcState::Suspending | ProcState::Sleep,
                ProcEvent::ForcePowerDown,
            ) => {
                self.platform.processor_force_down(id)?;
                self.platform.processor_wfi_interrupt(id, false);
                self.release_node_clocks(node)?;
                self.release_parent_power(node)?;
                self.procs[proc].resume_address = None;
                ProcState::ForcedOff
            }
            (ProcState::Suspending, ProcEvent::Abort) => {
                self.platform.processor_wfi_interrupt(id, false);
                ProcState::Active
            }
            _ => {
                warn!(
                    "{}: {event:?} not allowed in {state:?}",
                    self.procs[proc].node.name()
                );
                return Err(PmError::InvalidParam);
            }
        };
        self.set_node_state(node, new_state as u8);
        Ok(())
    }

    /// Forces a processor off. A processor that is already off is left alone.
    pub(crate) fn proc_force_down(&mut self, proc: usize) -> Result<(), PmError> {
        if self.procs[proc].state() == ProcState::ForcedOff {
            return Ok(());
        }
        self.proc_fsm(proc, ProcEvent::ForcePowerDown)
    }

    /// Returns the time for the processor to run again, including powering up its island.
    pub(crate) fn proc_wake_latency(&self, proc: usize) -> u32 {
        let record = &self.procs[proc];
        if record.state() == ProcState::Active {
            return 0;
        }
        let island = record
            .node
            .parent()
            .map_or(0, |parent| self.power_wake_latency(parent));
        record.desc.wake_latency.saturating_add(island)
    }

    /// Records the wake-up latency a suspending processor tolerates, and lets its island react.
    pub(crate) fn proc_set_latency(&mut self, proc: usize, latency: u32) -> Result<(), PmError> {
        let wake = self.procs[proc].desc.wake_latency;
        let record = &mut self.procs[proc];
        record.latency_req = latency;
        let margin = if latency == MAX_LATENCY {
            MAX_LATENCY
        } else {
            latency.saturating_sub(wake)
        };
        record.node.set_latency_margin(margin);
        match record.node.parent() {
            Some(parent) => self.power_update_latency(parent),
            None => Ok(()),
        }
    }

    /// Handles the wait-for-interrupt interrupt: every suspending processor whose bit is set goes
    /// to sleep.
    pub fn handle_wfi_status(&mut self, status: u32) -> Result<(), PmError> {
        for proc in 0..self.procs.len() {
            let record = &self.procs[proc];
            if record.desc.wfi_mask & status == 0 {
                continue;
            }
            if record.state() != ProcState::Suspending {
                info!("{}: spurious WFI interrupt", record.node.name());
                continue;
            }
            self.proc_fsm(proc, ProcEvent::Sleep)?;
        }
        Ok(())
    }

    /// Handles the wake interrupt: every sleeping processor whose bit is set wakes.
    pub fn handle_wake_status(&mut self, status: u32) -> Result<(), PmError> {
        for proc in 0..self.procs.len() {
            let record = &self.procs[proc];
            if record.desc.wake_mask & status != 0 && record.state() == ProcState::Sleep {
                self.proc_fsm(proc, ProcEvent::Wake)?;
            }
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
        services::pm::NodeId,
    };

    fn proc(engine: &Engine<TestPlatform>, id: NodeId) -> usize {
        let Some(NodeRef::Processor(index)) = engine.node_by_id(id) else {
            panic!("{id} is not a processor");
        };
        index
    }

    #[test]
    fn state_from_node() {
        let engine = engine();
        assert_eq!(ProcState::Active, engine.procs[proc(&engine, NODE_APU_0)].state());
        assert_eq!(ProcState::ForcedOff, engine.procs[proc(&engine, NODE_RPU_0)].state());
        assert_eq!(Ok(ProcState::Suspending), ProcState::try_from(3));
    }

    #[test]
    fn suspend_sleep_wake_cycle() {
        let mut engine = configured_engine();
        let apu_0 = proc(&engine, NODE_APU_0);
        engine.procs[apu_0].resume_address = Some(0x8_0000);

        engine.proc_fsm_inner(apu_0, ProcEvent::SelfSuspend).unwrap();
        assert_eq!(ProcState::Suspending, engine.procs[apu_0].state());
        assert!(
            engine
                .platform()
                .events
                .contains(&Event::WfiInterrupt(NODE_APU_0, true))
        );

        engine.proc_fsm_inner(apu_0, ProcEvent::Sleep).unwrap();
        assert_eq!(ProcState::Sleep, engine.procs[apu_0].state());
        assert!(engine.platform().events.contains(&Event::ProcSleep(NODE_APU_0)));
        let acpu = engine.clocks.index_of(CLK_ACPU).unwrap();
        assert_eq!(0, engine.clocks.get(acpu).use_count());

        engine.proc_fsm_inner(apu_0, ProcEvent::Wake).unwrap();
        assert_eq!(ProcState::Active, engine.procs[apu_0].state());
        assert_eq!(
            Some(&Event::ProcWake(NODE_APU_0, Some(0x8_0000))),
            engine.platform().events.last()
        );
        assert_eq!(None, engine.procs[apu_0].resume_address);
        assert_eq!(1, engine.clocks.get(acpu).use_count());
    }

    #[test]
    fn illegal_events_are_rejected() {
        let mut engine = engine();
        let apu_0 = proc(&engine, NODE_APU_0);
        let apu_1 = proc(&engine, NODE_APU_1);
        engine.platform_mut().events.clear();

        assert_eq!(
            Err(PmError::InvalidParam),
            engine.proc_fsm_inner(apu_0, ProcEvent::Sleep)
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.proc_fsm_inner(apu_0, ProcEvent::Abort)
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.proc_fsm_inner(apu_1, ProcEvent::ForcePowerDown)
        );
        assert_eq!(ProcState::Active, engine.procs[apu_0].state());
        assert!(engine.platform().events.is_empty());
    }

    #[test]
    fn abort_returns_to_active() {
        let mut engine = engine();
        let apu_0 = proc(&engine, NODE_APU_0);
        engine.proc_fsm_inner(apu_0, ProcEvent::SelfSuspend).unwrap();
        engine.proc_fsm_inner(apu_0, ProcEvent::Abort).unwrap();
        assert_eq!(ProcState::Active, engine.procs[apu_0].state());
        assert_eq!(
            Some(&Event::WfiInterrupt(NODE_APU_0, false)),
            engine.platform().events.last()
        );
    }

    #[test]
    fn wake_powers_island() {
        let mut engine = engine();
        let rpu_0 = proc(&engine, NODE_RPU_0);
        engine.proc_fsm_inner(rpu_0, ProcEvent::Wake).unwrap();
        assert_eq!(ProcState::Active, engine.procs[rpu_0].state());
        let events = &engine.platform().events;
        let power_up = events
            .iter()
            .position(|event| *event == Event::PowerUp(NODE_RPU))
            .unwrap();
        let wake = events
            .iter()
            .position(|event| *event == Event::ProcWake(NODE_RPU_0, None))
            .unwrap();
        assert!(power_up < wake);
    }

    #[test]
    fn failed_wake_gives_back_power() {
        let mut engine = engine();
        engine.platform_mut().fail_wake = Some(NODE_RPU_0);
        let rpu_0 = proc(&engine, NODE_RPU_0);
        assert_eq!(
            Err(PmError::Other),
            engine.proc_fsm_inner(rpu_0, ProcEvent::Wake)
        );
        assert_eq!(ProcState::ForcedOff, engine.procs[rpu_0].state());
        assert_eq!(Some(0), engine.node_state_by_id(NODE_RPU));
    }

    #[test]
    fn force_down_is_idempotent() {
        let mut engine = engine();
        let apu_0 = proc(&engine, NODE_APU_0);
        engine.proc_force_down(apu_0).unwrap();
        assert_eq!(ProcState::ForcedOff, engine.procs[apu_0].state());
        let events = engine.platform().events.len();
        engine.proc_force_down(apu_0).unwrap();
        assert_eq!(events, engine.platform().events.len());
    }

    #[test]
    fn wake_latency_includes_island() {
        let engine = engine();
        assert_eq!(0, engine.proc_wake_latency(proc(&engine, NODE_APU_0)));
        let rpu_0 = proc(&engine, NODE_RPU_0);
        assert_eq!(
            RPU_WAKE_LATENCY + RPU_POWER_UP_LATENCY,
            engine.proc_wake_latency(rpu_0)
        );
    }

    #[test]
    fn interrupts_select_processors() {
        let mut engine = engine();
        let apu_0 = proc(&engine, NODE_APU_0);
        engine.proc_fsm_inner(apu_0, ProcEvent::SelfSuspend).unwrap();

        // APU_1 is off, so its bit is ignored.
        let wfi = engine.procs[apu_0].desc.wfi_mask
            | engine.procs[proc(&engine, NODE_APU_1)].desc.wfi_mask;
        engine.handle_wfi_status(wfi).unwrap();
        assert_eq!(ProcState::Sleep, engine.procs[apu_0].state());
        assert_eq!(
            ProcState::ForcedOff,
            engine.procs[proc(&engine, NODE_APU_1)].state()
        );

        let wake = engine.procs[apu_0].desc.wake_mask;
        engine.handle_wake_status(wake).unwrap();
        assert_eq!(ProcState::Active, engine.procs[apu_0].state());
    }
}
