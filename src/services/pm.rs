// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The power management service: decodes IPI requests and runs them against the [`Engine`].

pub mod clock;
pub mod config;
mod engine;
pub mod master;
pub mod node;
pub mod power;
pub mod proc;
pub mod requirement;
pub mod reset;
pub mod slave;
pub mod system;

pub use self::{
    engine::{Engine, Topology},
    node::NodeId,
};

use crate::{
    ipi::{CALLBACK_ARG_CNT, IpiHeader, IpiPayload, IpiResponse, ModuleId, SUCCESS},
    platform::Platform,
    services::{Service, owns},
};
use clock::ClockId;
use core::fmt::{self, Debug, Formatter};
use log::{error, trace};
use num_enum::{TryFromPrimitive, TryFromPrimitiveError};
use reset::ResetAction;
use slave::Capabilities;
use spin::mutex::SpinMutex;
use system::{ShutdownSubtype, ShutdownType};

const PM_VERSION_MAJOR: u32 = 1;
const PM_VERSION_MINOR: u32 = 1;
const PM_VERSION: u32 = (PM_VERSION_MAJOR << 16) | PM_VERSION_MINOR;

/// Largest quality-of-service value a master may ask for.
const MAX_QOS: u32 = 100;

/// Error codes returned to masters. The discriminants are the values sent over the wire.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PmError {
    /// A platform operation failed for a reason the engine can't classify.
    Other = 1,
    /// The API call is unknown or not implemented.
    NotSupported = 4,
    /// An id or value in the request is out of range or names the wrong kind of node.
    InvalidParam = 15,
    /// The node's class doesn't implement the operation.
    NoFeature = 19,
    /// An engine invariant was broken.
    Internal = 2000,
    /// No state satisfies the combined requirements.
    Conflict = 2001,
    /// The caller lacks the permission for the operation.
    NoAccess = 2002,
    /// The node can't be used for the operation.
    InvalidNode = 2003,
    /// The caller has already requested the node.
    DoubleRequest = 2004,
    /// The suspend was aborted.
    AbortSuspend = 2005,
    /// The operation timed out.
    Timeout = 2006,
    /// The node is not shareable and another master uses it.
    NodeUsed = 2007,
}

impl From<PmError> for u32 {
    fn from(e: PmError) -> Self {
        e as u32
    }
}

impl From<PmError> for IpiResponse {
    fn from(e: PmError) -> Self {
        IpiResponse::status(e.into())
    }
}

impl<T: TryFromPrimitive> From<TryFromPrimitiveError<T>> for PmError {
    fn from(_: TryFromPrimitiveError<T>) -> Self {
        Self::InvalidParam
    }
}

/// Identifiers of the power management API calls.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u16)]
pub enum ApiId {
    GetApiVersion = 1,
    SetConfiguration = 2,
    GetNodeStatus = 3,
    GetOpCharacteristic = 4,
    RegisterNotifier = 5,
    RequestSuspend = 6,
    SelfSuspend = 7,
    ForcePowerdown = 8,
    AbortSuspend = 9,
    RequestWakeup = 0xA,
    SetWakeupSource = 0xB,
    SystemShutdown = 0xC,
    RequestNode = 0xD,
    ReleaseNode = 0xE,
    SetRequirement = 0xF,
    SetMaxLatency = 0x10,
    ResetAssert = 0x11,
    ResetGetStatus = 0x12,
    MmioWrite = 0x13,
    MmioRead = 0x14,
    InitFinalize = 0x15,
    ClockEnable = 0x24,
    ClockDisable = 0x25,
    ClockGetState = 0x26,
    ClockSetDivider = 0x27,
    ClockGetDivider = 0x28,
    ClockSetRate = 0x29,
    ClockGetRate = 0x2A,
    ClockSetParent = 0x2B,
    ClockGetParent = 0x2C,
}

/// Identifiers of the callbacks sent to masters.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum CallbackId {
    InitSuspend = 30,
    Acknowledge = 31,
    Notify = 32,
}

/// How the caller wants to learn about the completion of a request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum RequestAck {
    /// No acknowledge.
    No = 1,
    /// The status is written to the response buffer.
    Blocking = 2,
    /// An acknowledge callback is sent when the operation completes.
    NonBlocking = 3,
}

/// The characteristic queried by GET_OP_CHARACTERISTIC.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum OpCharType {
    Power = 1,
    Temperature = 2,
    Latency = 3,
}

/// The state a processor asks for in SELF_SUSPEND.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum SuspendState {
    /// Suspend the calling processor only.
    CpuIdle = 0,
    /// Suspend the whole system to the power-off suspend state, if this is the last master.
    PowerOff = 0xF,
}

/// Why a master aborts a suspend.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum AbortReason {
    WakeupEvent = 100,
    PowerUnitBusy = 101,
    NoPowerDown = 102,
    Unknown = 103,
}

/// Why a master is asked to suspend, sent in the init-suspend callback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum SuspendReason {
    PowerUnitRequest = 201,
    Alert = 202,
    SystemShutdown = 203,
}

/// A decoded power management request.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Function {
    GetApiVersion,
    SetConfiguration {
        address: u32,
    },
    GetNodeStatus {
        node: NodeId,
    },
    GetOpCharacteristic {
        node: NodeId,
        kind: OpCharType,
    },
    RegisterNotifier,
    RequestSuspend {
        target: NodeId,
        ack: RequestAck,
        latency: u32,
        state: u32,
    },
    SelfSuspend {
        node: NodeId,
        latency: u32,
        state: SuspendState,
        address: u64,
    },
    ForcePowerdown {
        node: NodeId,
        ack: RequestAck,
    },
    AbortSuspend {
        reason: AbortReason,
        node: NodeId,
    },
    RequestWakeup {
        target: NodeId,
        address: Option<u64>,
        ack: RequestAck,
    },
    SetWakeupSource {
        target: NodeId,
        source: NodeId,
        enable: bool,
    },
    SystemShutdown {
        kind: ShutdownType,
        subtype: ShutdownSubtype,
    },
    RequestNode {
        node: NodeId,
        caps: Capabilities,
        qos: u32,
        ack: RequestAck,
    },
    ReleaseNode {
        node: NodeId,
    },
    SetRequirement {
        node: NodeId,
        caps: Capabilities,
        qos: u32,
        ack: RequestAck,
    },
    SetMaxLatency {
        node: NodeId,
        latency: u32,
    },
    ResetAssert {
        reset: u32,
        action: ResetAction,
    },
    ResetGetStatus {
        reset: u32,
    },
    MmioWrite {
        address: u32,
        mask: u32,
        value: u32,
    },
    MmioRead {
        address: u32,
    },
    InitFinalize,
    ClockEnable {
        clock: ClockId,
    },
    ClockDisable {
        clock: ClockId,
    },
    ClockGetState {
        clock: ClockId,
    },
    ClockSetDivider {
        clock: ClockId,
        divider: u32,
        value: u32,
    },
    ClockGetDivider {
        clock: ClockId,
        divider: u32,
    },
    ClockSetRate {
        clock: ClockId,
        rate: u32,
    },
    ClockGetRate {
        clock: ClockId,
    },
    ClockSetParent {
        clock: ClockId,
        select: u32,
    },
    ClockGetParent {
        clock: ClockId,
    },
}

impl TryFrom<&IpiPayload> for Function {
    type Error = PmError;

    fn try_from(payload: &IpiPayload) -> Result<Self, Self::Error> {
        let header = IpiHeader(payload[0]);
        if header.module() != ModuleId::PM {
            return Err(PmError::NotSupported);
        }
        let api = ApiId::try_from(header.api()).map_err(|_| PmError::NotSupported)?;
        let args = &payload[1..];

        Ok(match api {
            ApiId::GetApiVersion => Self::GetApiVersion,
            ApiId::SetConfiguration => Self::SetConfiguration { address: args[0] },
            ApiId::GetNodeStatus => Self::GetNodeStatus {
                node: NodeId(args[0]),
            },
            ApiId::GetOpCharacteristic => Self::GetOpCharacteristic {
                node: NodeId(args[0]),
                kind: args[1].try_into()?,
            },
            ApiId::RegisterNotifier => Self::RegisterNotifier,
            ApiId::RequestSuspend => Self::RequestSuspend {
                target: NodeId(args[0]),
                ack: args[1].try_into()?,
                latency: args[2],
                state: args[3],
            },
            ApiId::SelfSuspend => Self::SelfSuspend {
                node: NodeId(args[0]),
                latency: args[1],
                state: args[2].try_into()?,
                address: u64::from(args[3]) | (u64::from(args[4]) << 32),
            },
            ApiId::ForcePowerdown => Self::ForcePowerdown {
                node: NodeId(args[0]),
                ack: args[1].try_into()?,
            },
            ApiId::AbortSuspend => Self::AbortSuspend {
                reason: args[0].try_into()?,
                node: NodeId(args[1]),
            },
            ApiId::RequestWakeup => Self::RequestWakeup {
                target: NodeId(args[0]),
                // Bit 0 of the low word marks the address as valid.
                address: (args[1] & 1 != 0)
                    .then(|| u64::from(args[1] & !1) | (u64::from(args[2]) << 32)),
                ack: args[3].try_into()?,
            },
            ApiId::SetWakeupSource => Self::SetWakeupSource {
                target: NodeId(args[0]),
                source: NodeId(args[1]),
                enable: args[2] != 0,
            },
            ApiId::SystemShutdown => Self::SystemShutdown {
                kind: args[0].try_into()?,
                subtype: args[1].try_into()?,
            },
            ApiId::RequestNode => Self::RequestNode {
                node: NodeId(args[0]),
                caps: Capabilities::from_wire(args[1])?,
                qos: args[2],
                ack: args[3].try_into()?,
            },
            ApiId::ReleaseNode => Self::ReleaseNode {
                node: NodeId(args[0]),
            },
            ApiId::SetRequirement => Self::SetRequirement {
                node: NodeId(args[0]),
                caps: Capabilities::from_wire(args[1])?,
                qos: args[2],
                ack: args[3].try_into()?,
            },
            ApiId::SetMaxLatency => Self::SetMaxLatency {
                node: NodeId(args[0]),
                latency: args[1],
            },
            ApiId::ResetAssert => Self::ResetAssert {
                reset: args[0],
                action: args[1].try_into()?,
            },
            ApiId::ResetGetStatus => Self::ResetGetStatus { reset: args[0] },
            ApiId::MmioWrite => Self::MmioWrite {
                address: args[0],
                mask: args[1],
                value: args[2],
            },
            ApiId::MmioRead => Self::MmioRead { address: args[0] },
            ApiId::InitFinalize => Self::InitFinalize,
            ApiId::ClockEnable => Self::ClockEnable {
                clock: ClockId(args[0]),
            },
            ApiId::ClockDisable => Self::ClockDisable {
                clock: ClockId(args[0]),
            },
            ApiId::ClockGetState => Self::ClockGetState {
                clock: ClockId(args[0]),
            },
            ApiId::ClockSetDivider => Self::ClockSetDivider {
                clock: ClockId(args[0]),
                divider: args[1],
                value: args[2],
            },
            ApiId::ClockGetDivider => Self::ClockGetDivider {
                clock: ClockId(args[0]),
                divider: args[1],
            },
            ApiId::ClockSetRate => Self::ClockSetRate {
                clock: ClockId(args[0]),
                rate: args[1],
            },
            ApiId::ClockGetRate => Self::ClockGetRate {
                clock: ClockId(args[0]),
            },
            ApiId::ClockSetParent => Self::ClockSetParent {
                clock: ClockId(args[0]),
                select: args[1],
            },
            ApiId::ClockGetParent => Self::ClockGetParent {
                clock: ClockId(args[0]),
            },
        })
    }
}

/// Values returned to the caller after the status word.
type Results = ([u32; 3], usize);

const NO_RESULTS: Results = ([0; 3], 0);

fn one(value: u32) -> Results {
    ([value, 0, 0], 1)
}

/// The power management service.
///
/// The engine sits behind a spin lock so that the IPI and interrupt handlers can share it through
/// `&self`. The handlers never nest, so finding the lock held means the engine was re-entered.
pub struct Pm<P: Platform> {
    engine: SpinMutex<Engine<P>>,
}

impl<P: Platform> Pm<P> {
    /// Creates the service around an initialised engine.
    pub fn new(engine: Engine<P>) -> Self {
        Self {
            engine: SpinMutex::new(engine),
        }
    }

    /// Runs `f` with exclusive access to the engine.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut Engine<P>) -> R) -> Result<R, PmError> {
        match self.engine.try_lock() {
            Some(mut engine) => Ok(f(&mut engine)),
            None => {
                error!("Power management engine re-entered");
                Err(PmError::Internal)
            }
        }
    }

    /// Handles the wait-for-interrupt interrupt for the processors whose bits are set in `status`.
    pub fn handle_wfi(&self, status: u32) {
        if let Err(e) = self.with_engine(|engine| engine.handle_wfi_status(status)) {
            error!("Failed to handle WFI status {status:#x}: {e:?}");
        }
    }

    /// Handles the wake interrupt for the sleeping processors whose bits are set in `status`.
    pub fn handle_wake(&self, status: u32) {
        if let Err(e) = self.with_engine(|engine| engine.handle_wake_status(status)) {
            error!("Failed to handle wake status {status:#x}: {e:?}");
        }
    }

    /// Handles a GIC proxy interrupt in the given group.
    pub fn handle_gic_proxy(&self, group: u8, status: u32) {
        if let Err(e) = self.with_engine(|engine| engine.handle_gic_proxy_event(group, status)) {
            error!("Failed to handle GIC proxy group {group} status {status:#x}: {e:?}");
        }
    }

    /// Brings the system back after the power-off suspend state.
    pub fn resume_power_off_suspend(&self) -> Result<(), PmError> {
        self.with_engine(|engine| engine.resume_power_off_suspend())?
    }

    fn handle_request_inner(
        engine: &mut Engine<P>,
        ipi_mask: u32,
        payload: &IpiPayload,
    ) -> Result<Results, PmError> {
        let function = Function::try_from(payload)?;
        trace!("PM call {function:?} from IPI {ipi_mask:#x}");

        // Loading the first configuration object is the only call a master may make before it is
        // known to the engine.
        if let Function::SetConfiguration { address } = function {
            engine.set_configuration_at(ipi_mask, address)?;
            return Ok(NO_RESULTS);
        }
        let master = engine.master_by_ipi(ipi_mask).ok_or(PmError::NoAccess)?;

        match function {
            Function::GetApiVersion => Ok(one(PM_VERSION)),
            Function::SetConfiguration { .. } => Ok(NO_RESULTS),
            Function::GetNodeStatus { node } => {
                let status = engine.get_node_status(master, node)?;
                Ok((
                    [status.state.into(), status.requirements, status.usage],
                    3,
                ))
            }
            Function::GetOpCharacteristic { node, kind } => {
                Ok(one(engine.get_op_characteristic(node, kind)?))
            }
            Function::RegisterNotifier => Err(PmError::NotSupported),
            Function::RequestSuspend {
                target,
                ack,
                latency,
                state,
            } => {
                engine.request_suspend(master, target, ack, latency, state)?;
                Ok(NO_RESULTS)
            }
            Function::SelfSuspend {
                node,
                latency,
                state,
                address,
            } => {
                engine.self_suspend(master, node, latency, state, address)?;
                Ok(NO_RESULTS)
            }
            Function::ForcePowerdown { node, ack } => {
                let result = engine.force_powerdown(master, node);
                Self::acknowledge(engine, master, node, ack, result)?;
                Ok(NO_RESULTS)
            }
            Function::AbortSuspend { reason, node } => {
                engine.abort_suspend(master, reason, node)?;
                Ok(NO_RESULTS)
            }
            Function::RequestWakeup {
                target,
                address,
                ack,
            } => {
                let result = engine.request_wakeup(master, target, address);
                Self::acknowledge(engine, master, target, ack, result)?;
                Ok(NO_RESULTS)
            }
            Function::SetWakeupSource {
                target,
                source,
                enable,
            } => {
                engine.set_wakeup_source(master, target, source, enable)?;
                Ok(NO_RESULTS)
            }
            Function::SystemShutdown { kind, subtype } => {
                engine.system_shutdown(master, kind, subtype)?;
                Ok(NO_RESULTS)
            }
            Function::RequestNode {
                node,
                caps,
                qos,
                ack,
            } => {
                Self::check_qos(qos)?;
                let result = engine.request_node(master, node, caps);
                Self::acknowledge(engine, master, node, ack, result)?;
                Ok(NO_RESULTS)
            }
            Function::ReleaseNode { node } => {
                engine.release_node(master, node)?;
                Ok(NO_RESULTS)
            }
            Function::SetRequirement {
                node,
                caps,
                qos,
                ack,
            } => {
                Self::check_qos(qos)?;
                let result = engine.set_requirement(master, node, caps);
                Self::acknowledge(engine, master, node, ack, result)?;
                Ok(NO_RESULTS)
            }
            Function::SetMaxLatency { node, latency } => {
                engine.set_max_latency(master, node, latency)?;
                Ok(NO_RESULTS)
            }
            Function::ResetAssert { reset, action } => {
                engine.reset_assert(master, reset, action)?;
                Ok(NO_RESULTS)
            }
            Function::ResetGetStatus { reset } => {
                Ok(one(engine.reset_get_status(master, reset)?.into()))
            }
            Function::MmioWrite {
                address,
                mask,
                value,
            } => {
                engine.mmio_write(master, address, mask, value)?;
                Ok(NO_RESULTS)
            }
            Function::MmioRead { address } => Ok(one(engine.mmio_read(master, address)?)),
            Function::InitFinalize => {
                engine.init_finalize(master)?;
                Ok(NO_RESULTS)
            }
            Function::ClockEnable { clock } => {
                engine.clock_enable(master, clock)?;
                Ok(NO_RESULTS)
            }
            Function::ClockDisable { clock } => {
                engine.clock_disable(master, clock)?;
                Ok(NO_RESULTS)
            }
            Function::ClockGetState { clock } => {
                Ok(one(engine.clock_get_state(clock)?.into()))
            }
            Function::ClockSetDivider {
                clock,
                divider,
                value,
            } => {
                engine.clock_set_divider(master, clock, divider, value)?;
                Ok(NO_RESULTS)
            }
            Function::ClockGetDivider { clock, divider } => {
                Ok(one(engine.clock_get_divider(clock, divider)?))
            }
            Function::ClockSetRate { clock, rate } => {
                engine.clock_set_rate(master, clock, rate.into())?;
                Ok(NO_RESULTS)
            }
            Function::ClockGetRate { clock } => {
                let rate = engine.clock_get_rate(clock)?;
                Ok(([rate as u32, (rate >> 32) as u32, 0], 2))
            }
            Function::ClockSetParent { clock, select } => {
                engine.clock_set_parent(master, clock, select)?;
                Ok(NO_RESULTS)
            }
            Function::ClockGetParent { clock } => Ok(one(engine.clock_get_parent(clock)?)),
        }
    }

    fn check_qos(qos: u32) -> Result<(), PmError> {
        if qos > MAX_QOS {
            Err(PmError::InvalidParam)
        } else {
            Ok(())
        }
    }

    /// Sends the acknowledge callback for a non-blocking request, and passes `result` on.
    fn acknowledge(
        engine: &mut Engine<P>,
        master: usize,
        node: NodeId,
        ack: RequestAck,
        result: Result<(), PmError>,
    ) -> Result<(), PmError> {
        if ack == RequestAck::NonBlocking {
            let status = match result {
                Ok(()) => SUCCESS,
                Err(e) => e.into(),
            };
            let state = engine.node_state_by_id(node).unwrap_or_default();
            let ipi_mask = engine.master_ipi_mask(master);
            engine.send_callback(
                ipi_mask,
                callback_payload(CallbackId::Acknowledge, [node.0, status, state.into(), 0]),
            );
        }
        result
    }
}

impl<P: Platform> Service for Pm<P> {
    owns!(ModuleId::PM);

    fn handle_request(&self, ipi_mask: u32, payload: &IpiPayload) -> IpiResponse {
        let result = self
            .with_engine(|engine| Self::handle_request_inner(engine, ipi_mask, payload))
            .and_then(|result| result);
        match result {
            Ok((values, count)) => IpiResponse::success(&values[..count]),
            Err(e) => {
                trace!("PM call {:?} failed: {e:?}", IpiHeader(payload[0]));
                e.into()
            }
        }
    }
}

impl<P: Platform> Debug for Pm<P> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.engine.try_lock() {
            Some(engine) => engine.fmt(f),
            None => f.write_str("Pm { <locked> }"),
        }
    }
}

/// Builds the payload of a callback.
pub(crate) fn callback_payload(id: CallbackId, args: [u32; 4]) -> [u32; CALLBACK_ARG_CNT] {
    [id as u32, args[0], args[1], args[2], args[3]]
}
