// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Build configuration flags.

/// True if the build is configured with debug assertions on.
pub const DEBUG: bool = cfg!(debug_assertions);

/// Whether engine invariants are re-checked after every state change.
///
/// The checks walk the whole power tree, so they are only enabled in debug builds.
pub const CHECK_INVARIANTS: bool = DEBUG;
