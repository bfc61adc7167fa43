// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Dispatch of inter-processor requests and interrupts to the firmware modules.

pub mod pm;

use crate::{
    ipi::{IpiHeader, IpiPayload, IpiResponse, NOT_SUPPORTED},
    platform::Platform,
};
use log::{trace, warn};
use pm::{Engine, Pm};

/// Helper macro to define the module id covered by a service.
macro_rules! owns {
    ($module:expr) => {
        #[inline(always)]
        fn owns(&self, header: $crate::ipi::IpiHeader) -> bool {
            header.module() == $module
        }
    };
}
pub(crate) use owns;

/// A service which handles the requests addressed to one firmware module.
pub trait Service {
    /// Returns whether this service is intended to handle the request with the given header.
    fn owns(&self, header: IpiHeader) -> bool;

    /// Handles a request from the master whose IPI channel is `ipi_mask`.
    fn handle_request(&self, _ipi_mask: u32, _payload: &IpiPayload) -> IpiResponse {
        NOT_SUPPORTED.into()
    }
}

/// An interrupt the firmware forwards to the services.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Interrupt {
    /// Processors executed their wait-for-interrupt instruction.
    Wfi {
        /// One bit per processor, in the platform's WFI interrupt layout.
        status: u32,
    },
    /// Sleeping processors received a wake interrupt.
    Wake {
        /// One bit per processor, in the platform's wake interrupt layout.
        status: u32,
    },
    /// A wake source routed through the GIC proxy fired.
    GicProxy {
        /// Index of the GIC proxy register group.
        group: u8,
        /// Pending bits within the group.
        status: u32,
    },
    /// The system came back from power-off suspend.
    PowerOffResume,
}

/// Contains an instance of all of the currently implemented services.
pub struct Services<P: Platform> {
    /// The power management service.
    pub pm: Pm<P>,
}

impl<P: Platform> Services<P> {
    /// Creates the services around an initialised power management engine.
    pub fn new(engine: Engine<P>) -> Self {
        Self { pm: Pm::new(engine) }
    }

    /// Handles a request received on the IPI channel `ipi_mask`, returning the words to write back
    /// to the sender's response buffer.
    pub fn handle_ipi(&self, ipi_mask: u32, payload: &IpiPayload) -> IpiResponse {
        let header = IpiHeader(payload[0]);
        trace!("IPI {ipi_mask:#x}: {header:?}");

        let service: &dyn Service = if self.pm.owns(header) {
            &self.pm
        } else {
            warn!("No service for request {header} from IPI {ipi_mask:#x}");
            return NOT_SUPPORTED.into();
        };

        service.handle_request(ipi_mask, payload)
    }

    /// Handles an interrupt routed to the firmware.
    pub fn handle_interrupt(&self, interrupt: Interrupt) {
        trace!("Interrupt {interrupt:?}");
        match interrupt {
            Interrupt::Wfi { status } => self.pm.handle_wfi(status),
            Interrupt::Wake { status } => self.pm.handle_wake(status),
            Interrupt::GicProxy { group, status } => self.pm.handle_gic_proxy(group, status),
            Interrupt::PowerOffResume => {
                if let Err(e) = self.pm.resume_power_off_suspend() {
                    warn!("Failed to resume from power-off suspend: {e:?}");
                }
            }
        }
    }
}
