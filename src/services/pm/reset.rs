// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Reset lines masters may drive directly.

use super::{Engine, PmError};
use crate::platform::Platform;
use arrayvec::ArrayVec;
use log::{debug, error};
use num_enum::TryFromPrimitive;

/// The maximum number of reset lines.
pub const MAX_RESETS: usize = 16;

/// What to do with a reset line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum ResetAction {
    /// Take the block out of reset.
    Release = 0,
    /// Hold the block in reset.
    Assert = 1,
    /// Assert then release.
    Pulse = 2,
}

/// The static description of a reset line.
#[derive(Debug)]
pub struct ResetDesc {
    /// Wire identifier.
    pub id: u32,
    /// Name used in logs.
    pub name: &'static str,
}

/// The reset lines and who may drive them.
#[derive(Debug)]
pub struct ResetTable {
    descs: &'static [ResetDesc],
    /// IPI mask of the masters allowed to drive each line, in the order of `descs`.
    perms: ArrayVec<u32, MAX_RESETS>,
}

impl ResetTable {
    /// Creates the table with no permissions granted.
    pub fn new(descs: &'static [ResetDesc]) -> Result<Self, PmError> {
        if descs.len() > MAX_RESETS {
            error!("Too many reset lines in topology");
            return Err(PmError::Internal);
        }
        Ok(Self {
            descs,
            perms: descs.iter().map(|_| 0).collect(),
        })
    }

    fn index_of(&self, id: u32) -> Option<usize> {
        self.descs.iter().position(|desc| desc.id == id)
    }

    /// Grants the masters in `perms` access to the given line.
    pub(crate) fn set_perms(&mut self, id: u32, perms: u32) -> Result<(), PmError> {
        let index = self.index_of(id).ok_or(PmError::InvalidParam)?;
        self.perms[index] = perms;
        Ok(())
    }

    /// Revokes all permissions.
    pub(crate) fn clear_config(&mut self) {
        self.perms.fill(0);
    }

    /// Checks that the masters in `ipi_mask` may drive the line, and returns its description.
    fn check(&self, id: u32, ipi_mask: u32) -> Result<&'static ResetDesc, PmError> {
        let index = self.index_of(id).ok_or(PmError::InvalidParam)?;
        if self.perms[index] & ipi_mask == 0 {
            return Err(PmError::NoAccess);
        }
        Ok(&self.descs[index])
    }
}

impl<P: Platform> Engine<P> {
    /// Drives a reset line on behalf of a master.
    pub fn reset_assert(
        &mut self,
        master: usize,
        reset: u32,
        action: ResetAction,
    ) -> Result<(), PmError> {
        let desc = self.resets.check(reset, self.masters[master].ipi_mask())?;
        debug!("{}: {action:?} {}", self.masters[master].name(), desc.name);
        self.platform.reset_assert(reset, action)
    }

    /// Returns whether a reset line is asserted.
    pub fn reset_get_status(&self, master: usize, reset: u32) -> Result<bool, PmError> {
        self.resets.check(reset, self.masters[master].ipi_mask())?;
        Ok(self.platform.reset_status(reset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{
        test::{Event, test_helpers::*},
        zynqmp::*,
    };

    #[test]
    fn table_permissions() {
        static DESCS: [ResetDesc; 2] = [
            ResetDesc { id: 7, name: "a" },
            ResetDesc { id: 9, name: "b" },
        ];
        let mut table = ResetTable::new(&DESCS).unwrap();
        assert_eq!(Err(PmError::NoAccess), table.check(7, 1).map(|_| ()));
        table.set_perms(7, 3).unwrap();
        assert_eq!(Ok("a"), table.check(7, 2).map(|desc| desc.name));
        assert_eq!(Err(PmError::InvalidParam), table.set_perms(8, 1));
        table.clear_config();
        assert_eq!(Err(PmError::NoAccess), table.check(7, 1).map(|_| ()));
    }

    #[test]
    fn assert_and_status() {
        let mut engine = configured_engine();
        let apu = engine.master_by_node(NODE_APU).unwrap();
        engine
            .reset_assert(apu, RESET_UART0, ResetAction::Assert)
            .unwrap();
        assert_eq!(
            Some(&Event::Reset(RESET_UART0, ResetAction::Assert)),
            engine.platform().events.last()
        );
        assert_eq!(Ok(true), engine.reset_get_status(apu, RESET_UART0));

        engine
            .reset_assert(apu, RESET_UART0, ResetAction::Pulse)
            .unwrap();
        assert_eq!(Ok(false), engine.reset_get_status(apu, RESET_UART0));
    }

    #[test]
    fn access_is_checked() {
        let mut engine = configured_engine();
        let apu = engine.master_by_node(NODE_APU).unwrap();
        let rpu = engine.master_by_node(NODE_RPU_0).unwrap();
        assert_eq!(
            Err(PmError::NoAccess),
            engine.reset_assert(rpu, RESET_UART0, ResetAction::Assert)
        );
        assert_eq!(Err(PmError::NoAccess), engine.reset_get_status(rpu, RESET_UART0));
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.reset_assert(apu, 4000, ResetAction::Assert)
        );
        engine
            .reset_assert(rpu, RESET_GEM0, ResetAction::Release)
            .unwrap();
        // Not configured for anyone.
        assert_eq!(
            Err(PmError::NoAccess),
            engine.reset_get_status(apu, RESET_SATA)
        );
    }
}
