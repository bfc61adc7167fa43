// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Hooks through which the power management engine drives the hardware.

pub mod zynqmp;

use crate::{
    ipi::CALLBACK_ARG_CNT,
    services::pm::{
        NodeId, PmError,
        reset::ResetAction,
        system::{ShutdownSubtype, ShutdownType},
    },
};

/// The hooks implemented by all platforms.
///
/// The engine never touches registers itself. Everything that reaches hardware goes through this
/// trait, so that the same engine runs against the real power management unit or against a
/// recording fake in tests.
///
/// Hooks that return a `Result` may fail; the engine then rolls back whatever bookkeeping it did
/// for the operation and reports the error to the caller.
pub trait Platform {
    /// Returns whether the given processor is running at the time the engine is created.
    fn processor_is_running(&self, node: NodeId) -> bool;

    /// Powers up and releases the given processor from reset or sleep.
    ///
    /// If `resume_address` is `Some` the processor starts executing there, otherwise from its
    /// reset vector.
    fn processor_wake(&mut self, node: NodeId, resume_address: Option<u64>) -> Result<(), PmError>;

    /// Puts a processor which has executed its wait-for-interrupt instruction into its sleep state.
    fn processor_sleep(&mut self, node: NodeId) -> Result<(), PmError>;

    /// Forces a processor off immediately, whatever it is doing.
    fn processor_force_down(&mut self, node: NodeId) -> Result<(), PmError>;

    /// Enables or disables the interrupt raised when the given processor executes its
    /// wait-for-interrupt instruction.
    fn processor_wfi_interrupt(&mut self, node: NodeId, enable: bool);

    /// Returns whether the given power domain or island is on at the time the engine is created.
    fn power_is_on(&self, node: NodeId) -> bool;

    /// Powers up the given power domain or island.
    fn power_up(&mut self, node: NodeId) -> Result<(), PmError>;

    /// Powers down the given power domain or island.
    fn power_down(&mut self, node: NodeId) -> Result<(), PmError>;

    /// Returns whether all PLLs fed by the reference oscillator are held in reset.
    fn reference_oscillator_plls_reset(&self) -> bool {
        false
    }

    /// Parks the reference oscillator.
    fn park_reference_oscillator(&mut self) {}

    /// Returns the state the given slave is in at the time the engine is created, or `None` to use
    /// the state from the topology.
    fn slave_initial_state(&self, _node: NodeId) -> Option<u8> {
        None
    }

    /// Moves a slave's hardware into the given state of its state machine.
    fn slave_enter_state(&mut self, node: NodeId, state: u8) -> Result<(), PmError>;

    /// Idles a slave's bus traffic before its owner is forced down.
    fn slave_idle(&mut self, _node: NodeId) -> Result<(), PmError> {
        Ok(())
    }

    /// Enables or disables wake interrupts in the given GIC proxy group.
    fn gic_proxy_wake(&mut self, group: u8, mask: u32, enable: bool);

    /// Requests the given PLL, locking it if it is not already running.
    fn pll_request(&mut self, pll: u8) -> Result<(), PmError>;

    /// Releases the given PLL, which may then be put into reset.
    fn pll_release(&mut self, pll: u8);

    /// Returns the output rate of the given PLL in Hz.
    fn pll_rate(&self, pll: u8) -> u64;

    /// Returns the reference clock rate in Hz.
    fn reference_clock_rate(&self) -> u64 {
        33_333_333
    }

    /// Reads a 32-bit register.
    fn read_register(&self, address: u32) -> u32;

    /// Writes the bits of `value` selected by `mask` to a 32-bit register, preserving the others.
    fn write_register(&mut self, address: u32, mask: u32, value: u32);

    /// Asserts, releases or pulses the given reset line.
    fn reset_assert(&mut self, reset: u32, action: ResetAction) -> Result<(), PmError>;

    /// Returns whether the given reset line is asserted.
    fn reset_status(&self, reset: u32) -> bool;

    /// Returns whether the master with the given IPI mask may access the register at `address`.
    fn mmio_permitted(&self, _ipi_mask: u32, _address: u32, _write: bool) -> bool {
        false
    }

    /// Shuts down or restarts the processing system or the whole chip.
    fn system_shutdown(
        &mut self,
        kind: ShutdownType,
        subtype: ShutdownSubtype,
    ) -> Result<(), PmError>;

    /// Enters the power-off suspend state, keeping the listed memories in retention.
    fn enter_power_off_suspend(&mut self, retained: &[NodeId]) -> Result<(), PmError>;

    /// Sets the general purpose output register.
    fn set_gpo(&mut self, _value: u32) {}

    /// Returns the configuration object stored at `address`.
    fn config_object(&self, address: u32) -> Result<&'static [u8], PmError>;

    /// Sends a callback message to the masters whose IPI channels are set in `ipi_mask`.
    fn send_callback(&mut self, ipi_mask: u32, payload: &[u32; CALLBACK_ARG_CNT]);

    /// Called whenever the engine changes the state of a node.
    fn node_state_changed(&mut self, _node: NodeId, _state: u8) {}
}
