// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Types and helpers for messages exchanged over the inter-processor interrupt (IPI) channel.

use core::fmt::{self, Debug, Display, Formatter};

/// Number of 32-bit words in a request payload, including the header word.
pub const PAYLOAD_ARG_CNT: usize = 6;

/// Number of 32-bit words in a response.
pub const RESPONSE_ARG_CNT: usize = 4;

/// Number of 32-bit words in a callback message, including the callback id.
pub const CALLBACK_ARG_CNT: usize = 5;

const MODULE_ID_MASK: u32 = 0x00ff_0000;
const MODULE_ID_SHIFT: u8 = 16;
const API_ID_MASK: u32 = 0x0000_ffff;

/// The call completed successfully.
pub const SUCCESS: u32 = 0;

/// The call is not supported by the firmware.
pub const NOT_SUPPORTED: u32 = 4;

/// A request payload as read from the IPI buffer.
pub type IpiPayload = [u32; PAYLOAD_ARG_CNT];

/// Identifies the firmware module a message is addressed to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ModuleId(pub u8);

impl ModuleId {
    /// Power management.
    pub const PM: Self = Self(0);
    /// Error management.
    pub const EM: Self = Self(1);
}

/// The first word of every request: module id and API id.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct IpiHeader(pub u32);

impl IpiHeader {
    /// Builds the header word for the given module and API id.
    pub const fn new(module: ModuleId, api: u16) -> Self {
        Self(((module.0 as u32) << MODULE_ID_SHIFT) | api as u32)
    }

    /// Returns the module the message is addressed to.
    pub fn module(self) -> ModuleId {
        ModuleId(((self.0 & MODULE_ID_MASK) >> MODULE_ID_SHIFT) as u8)
    }

    /// Returns the API id within the module.
    pub fn api(self) -> u16 {
        (self.0 & API_ID_MASK) as u16
    }
}

impl Display for IpiHeader {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl Debug for IpiHeader {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{:#010x} (module {}, api {:#x})",
            self.0,
            self.module().0,
            self.api()
        )
    }
}

/// The words written back to the caller's response buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IpiResponse {
    values: [u32; RESPONSE_ARG_CNT],
}

impl IpiResponse {
    /// Creates a response carrying only a status word.
    pub fn status(status: u32) -> Self {
        let mut values = [0; RESPONSE_ARG_CNT];
        values[0] = status;
        Self { values }
    }

    /// Creates a successful response carrying up to three values.
    pub fn success(results: &[u32]) -> Self {
        let mut response = Self::status(SUCCESS);
        response.set_results(results);
        response
    }

    /// Stores `results` after the status word. Extra values are dropped.
    pub fn set_results(&mut self, results: &[u32]) {
        for (slot, value) in self.values[1..].iter_mut().zip(results) {
            *slot = *value;
        }
    }

    /// Returns the status word.
    pub fn status_word(&self) -> u32 {
        self.values[0]
    }

    /// Returns all response words.
    pub fn values(&self) -> &[u32; RESPONSE_ARG_CNT] {
        &self.values
    }
}

impl From<u32> for IpiResponse {
    fn from(status: u32) -> Self {
        Self::status(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields() {
        let header = IpiHeader(0x0001_0024);
        assert_eq!(ModuleId::EM, header.module());
        assert_eq!(0x24, header.api());
        assert_eq!(header, IpiHeader::new(ModuleId::EM, 0x24));
        assert_eq!("0x00010024", format!("{header}"));
        assert_eq!("0x00010024 (module 1, api 0x24)", format!("{header:?}"));
    }

    #[test]
    fn response_words() {
        let response = IpiResponse::success(&[7, 8, 9, 10]);
        assert_eq!(&[SUCCESS, 7, 8, 9], response.values());

        let response = IpiResponse::from(NOT_SUPPORTED);
        assert_eq!(NOT_SUPPORTED, response.status_word());
        assert_eq!(&[NOT_SUPPORTED, 0, 0, 0], response.values());
    }
}
