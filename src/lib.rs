// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! RF-PMUFW: the power-management resource engine of a platform management microcontroller.
//!
//! The engine arbitrates power domains, clocks, resets and processor sleep/wake on behalf of the
//! masters of the SoC. Requests arrive as inter-processor messages which are dispatched by
//! [`services::Services`]; hardware effects are delegated to a [`platform::Platform`]
//! implementation provided by the integrating firmware.

#![cfg_attr(not(test), no_std)]

pub mod debug;
pub mod ipi;
pub mod logger;
pub mod platform;
pub mod services;

pub use crate::{
    platform::Platform,
    services::{
        Services,
        pm::{Engine, PmError, Topology},
    },
};
