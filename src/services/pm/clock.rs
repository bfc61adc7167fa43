// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The clock tree: PLL outputs, cross-domain bridges and generic muxed, divided and gated clocks.

use super::{
    Engine, PmError,
    node::{NodeFlags, NodeRef},
};
use crate::platform::Platform;
use arrayvec::ArrayVec;
use bitflags::bitflags;
use core::fmt::{self, Display, Formatter};
use log::{debug, error, warn};

/// The maximum number of clocks in the tree.
pub const MAX_CLOCKS: usize = 32;

/// The maximum number of nodes consuming a single clock.
pub const MAX_CLOCK_USERS: usize = 6;

const DIV0_SHIFT: u32 = 8;
const DIV1_SHIFT: u32 = 16;
const DIV_MASK: u32 = 0x3F;

/// Divider selector for the first divider of a clock.
pub const DIVIDER_0: u32 = 0;
/// Divider selector for the second divider of a clock.
pub const DIVIDER_1: u32 = 1;

/// The identifier of a clock on the wire.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ClockId(pub u32);

impl Display for ClockId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "clock {}", self.0)
    }
}

bitflags! {
    /// Static properties of a clock.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct ClockFlags: u8 {
        /// No master may control the clock directly.
        const SYSTEM = 1 << 0;
    }

    /// The dividers a clock has.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Dividers: u8 {
        /// 6-bit divider at bit 8 of the control register.
        const DIV0 = 1 << 0;
        /// 6-bit divider at bit 16 of the control register.
        const DIV1 = 1 << 1;
    }
}

/// One entry of a multiplexer table.
#[derive(Debug)]
pub struct MuxInput {
    /// Value of the select field.
    pub select: u32,
    /// The clock selected, or `None` for the external oscillator.
    pub clock: Option<ClockId>,
}

/// A clock multiplexer: the select field of a control register and its inputs.
#[derive(Debug)]
pub struct ClockMux {
    /// Selectable inputs.
    pub inputs: &'static [MuxInput],
    /// Width of the select field.
    pub bits: u8,
    /// Position of the select field.
    pub shift: u8,
}

impl ClockMux {
    fn mask(&self) -> u32 {
        (1 << self.bits) - 1
    }

    fn input(&self, select: u32) -> Option<&'static MuxInput> {
        self.inputs.iter().find(|input| input.select == select)
    }
}

/// What kind of clock this is.
#[derive(Debug)]
pub enum ClockKind {
    /// A PLL output.
    Pll {
        /// Which PLL.
        pll: u8,
    },
    /// A clock crossing into another power domain, with a single divider.
    Bridge {
        /// The PLL output it divides.
        parent: ClockId,
        /// Address of the control register.
        ctrl: u32,
    },
    /// A clock with an optional mux, up to two dividers and an optional gate.
    Generic {
        /// Fixed parent, used when there is no mux.
        parent: Option<ClockId>,
        /// Parent selection.
        mux: Option<&'static ClockMux>,
        /// Address of the control register.
        ctrl: u32,
        /// Dividers present in the control register.
        dividers: Dividers,
        /// Bit position of the gate, 24 to 26.
        gate: Option<u8>,
        /// Static properties.
        flags: ClockFlags,
    },
}

/// The static description of a clock.
#[derive(Debug)]
pub struct ClockDesc {
    /// Wire identifier.
    pub id: ClockId,
    /// Name used in logs.
    pub name: &'static str,
    /// Kind-specific fields.
    pub kind: ClockKind,
}

impl ClockDesc {
    fn ctrl(&self) -> Option<u32> {
        match self.kind {
            ClockKind::Pll { .. } => None,
            ClockKind::Bridge { ctrl, .. } | ClockKind::Generic { ctrl, .. } => Some(ctrl),
        }
    }

    fn dividers(&self) -> Dividers {
        match self.kind {
            ClockKind::Pll { .. } => Dividers::empty(),
            ClockKind::Bridge { .. } => Dividers::DIV0,
            ClockKind::Generic { dividers, .. } => dividers,
        }
    }

    fn mux(&self) -> Option<&'static ClockMux> {
        match self.kind {
            ClockKind::Generic { mux, .. } => mux,
            _ => None,
        }
    }

    fn gate(&self) -> Option<u8> {
        match self.kind {
            ClockKind::Generic { gate, .. } => gate,
            _ => None,
        }
    }

    fn is_system(&self) -> bool {
        matches!(self.kind, ClockKind::Generic { flags, .. } if flags.contains(ClockFlags::SYSTEM))
    }
}

/// The runtime record of a clock.
#[derive(Debug)]
pub struct Clock {
    desc: &'static ClockDesc,
    use_count: u32,
    /// Index of the current parent, `None` for the external oscillator.
    parent: Option<usize>,
    /// Control register value saved for power-off suspend.
    saved_ctrl: Option<u32>,
    users: ArrayVec<NodeRef, MAX_CLOCK_USERS>,
}

impl Clock {
    /// Returns the wire identifier.
    pub fn id(&self) -> ClockId {
        self.desc.id
    }

    /// Returns the number of outstanding requests.
    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    /// Returns the index of the current parent.
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Returns the nodes consuming the clock.
    pub fn users(&self) -> &[NodeRef] {
        &self.users
    }
}

/// All the clocks of the chip, indexed by position in the topology table.
#[derive(Debug)]
pub struct ClockTree {
    clocks: ArrayVec<Clock, MAX_CLOCKS>,
}

impl ClockTree {
    /// Builds the tree and resolves the fixed parents.
    pub fn new(descs: &'static [ClockDesc]) -> Result<Self, PmError> {
        let mut clocks = ArrayVec::new();
        for desc in descs {
            clocks
                .try_push(Clock {
                    desc,
                    use_count: 0,
                    parent: None,
                    saved_ctrl: None,
                    users: ArrayVec::new(),
                })
                .map_err(|_| {
                    error!("Too many clocks");
                    PmError::Internal
                })?;
        }
        let mut tree = Self { clocks };

        for index in 0..tree.clocks.len() {
            let parent = match tree.clocks[index].desc.kind {
                ClockKind::Bridge { parent, .. } => Some(parent),
                ClockKind::Generic {
                    parent, mux: None, ..
                } => parent,
                _ => None,
            };
            if let Some(parent) = parent {
                tree.clocks[index].parent = Some(tree.index_of(parent).ok_or_else(|| {
                    error!("Unknown parent {parent} of {}", tree.clocks[index].desc.name);
                    PmError::Internal
                })?);
            }
        }
        Ok(tree)
    }

    /// Reads the current mux selection of every muxed clock from hardware.
    pub fn init(&mut self, platform: &impl Platform) {
        for index in 0..self.clocks.len() {
            let desc = self.clocks[index].desc;
            let (Some(mux), Some(ctrl)) = (desc.mux(), desc.ctrl()) else {
                continue;
            };
            let select = (platform.read_register(ctrl) >> mux.shift) & mux.mask();
            self.clocks[index].parent = match mux.input(select) {
                Some(MuxInput {
                    clock: Some(parent),
                    ..
                }) => self.index_of(*parent),
                Some(MuxInput { clock: None, .. }) => None,
                None => {
                    warn!("{} has unknown mux selection {select}", desc.name);
                    None
                }
            };
        }
    }

    /// Returns the number of clocks.
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    /// Returns whether the tree has no clocks.
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Returns the clock at the given index.
    pub fn get(&self, index: usize) -> &Clock {
        &self.clocks[index]
    }

    /// Returns the index of the clock with the given identifier.
    pub fn index_of(&self, id: ClockId) -> Option<usize> {
        self.clocks.iter().position(|clock| clock.desc.id == id)
    }

    fn by_id(&self, id: ClockId) -> Result<usize, PmError> {
        self.index_of(id).ok_or(PmError::InvalidParam)
    }

    pub(crate) fn add_user(&mut self, index: usize, user: NodeRef) -> Result<(), PmError> {
        let clock = &mut self.clocks[index];
        clock.users.try_push(user).map_err(|_| {
            error!("Too many users of {}", clock.desc.name);
            PmError::Internal
        })
    }

    /// Requests a clock, and its ancestors for the first requester.
    ///
    /// Each step returns the parent to request next, so the walk never recurses. If a step fails,
    /// the counts taken by the steps before it are given back.
    pub fn request(&mut self, platform: &mut impl Platform, index: usize) -> Result<(), PmError> {
        let mut cursor = Some(index);
        while let Some(current) = cursor {
            match self.request_step(platform, current) {
                Ok(next) => cursor = next,
                Err(e) => {
                    // Every clock before the failed one went from 0 to 1 users.
                    let mut undo = index;
                    while undo != current {
                        self.clocks[undo].use_count -= 1;
                        match self.clocks[undo].parent {
                            Some(parent) => undo = parent,
                            None => break,
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn request_step(
        &mut self,
        platform: &mut impl Platform,
        index: usize,
    ) -> Result<Option<usize>, PmError> {
        let clock = &mut self.clocks[index];
        let first = clock.use_count == 0;
        clock.use_count += 1;
        match clock.desc.kind {
            ClockKind::Pll { pll } => {
                if first && let Err(e) = platform.pll_request(pll) {
                    clock.use_count -= 1;
                    return Err(e);
                }
                Ok(None)
            }
            ClockKind::Bridge { .. } | ClockKind::Generic { .. } => {
                Ok(if first { clock.parent } else { None })
            }
        }
    }

    /// Releases a clock, and its ancestors once the last user is gone.
    pub fn release(&mut self, platform: &mut impl Platform, index: usize) -> Result<(), PmError> {
        let mut cursor = Some(index);
        while let Some(current) = cursor {
            cursor = self.release_step(platform, current)?;
        }
        Ok(())
    }

    fn release_step(
        &mut self,
        platform: &mut impl Platform,
        index: usize,
    ) -> Result<Option<usize>, PmError> {
        let clock = &mut self.clocks[index];
        if clock.use_count == 0 {
            error!("{} released with no users", clock.desc.name);
            return Err(PmError::Internal);
        }
        clock.use_count -= 1;
        if clock.use_count > 0 {
            return Ok(None);
        }
        match clock.desc.kind {
            ClockKind::Pll { pll } => {
                platform.pll_release(pll);
                Ok(None)
            }
            ClockKind::Bridge { .. } | ClockKind::Generic { .. } => Ok(clock.parent),
        }
    }

    /// Switches the parent of a muxed clock.
    ///
    /// While the clock is in use, the new parent is requested before the switch and the old one
    /// released after it, so the clock always has a running parent.
    pub fn set_parent(
        &mut self,
        platform: &mut impl Platform,
        index: usize,
        select: u32,
    ) -> Result<(), PmError> {
        let desc = self.clocks[index].desc;
        let (Some(mux), Some(ctrl)) = (desc.mux(), desc.ctrl()) else {
            return Err(PmError::NoFeature);
        };
        if select > mux.mask() {
            return Err(PmError::InvalidParam);
        }
        let input = mux.input(select).ok_or(PmError::InvalidParam)?;
        let new_parent = match input.clock {
            Some(id) => Some(self.index_of(id).ok_or(PmError::Internal)?),
            None => None,
        };
        let old_parent = self.clocks[index].parent;
        if new_parent == old_parent {
            return Ok(());
        }

        let in_use = self.clocks[index].use_count > 0;
        if in_use && let Some(new_parent) = new_parent {
            self.request(platform, new_parent)?;
        }
        platform.write_register(
            ctrl,
            mux.mask() << mux.shift,
            select << mux.shift,
        );
        self.clocks[index].parent = new_parent;
        debug!("{}: parent select {select}", desc.name);
        if in_use && let Some(old_parent) = old_parent {
            self.release(platform, old_parent)?;
        }
        Ok(())
    }

    /// Returns the mux select value of a muxed clock.
    pub fn get_parent(&self, platform: &impl Platform, index: usize) -> Result<u32, PmError> {
        let desc = self.clocks[index].desc;
        let (Some(mux), Some(ctrl)) = (desc.mux(), desc.ctrl()) else {
            return Err(PmError::NoFeature);
        };
        Ok((platform.read_register(ctrl) >> mux.shift) & mux.mask())
    }

    /// Opens or closes the gate of a clock.
    pub fn set_gate(
        &mut self,
        platform: &mut impl Platform,
        index: usize,
        enable: bool,
    ) -> Result<(), PmError> {
        let desc = self.clocks[index].desc;
        let (Some(gate), Some(ctrl)) = (desc.gate(), desc.ctrl()) else {
            return Err(PmError::NoFeature);
        };
        let bit = 1 << gate;
        platform.write_register(ctrl, bit, if enable { bit } else { 0 });
        Ok(())
    }

    /// Returns whether the gate of a clock is open.
    pub fn get_gate(&self, platform: &impl Platform, index: usize) -> Result<bool, PmError> {
        let desc = self.clocks[index].desc;
        let (Some(gate), Some(ctrl)) = (desc.gate(), desc.ctrl()) else {
            return Err(PmError::NoFeature);
        };
        Ok(platform.read_register(ctrl) & (1 << gate) != 0)
    }

    fn divider_field(desc: &ClockDesc, divider: u32) -> Result<u32, PmError> {
        let (flag, shift) = match divider {
            DIVIDER_0 => (Dividers::DIV0, DIV0_SHIFT),
            DIVIDER_1 => (Dividers::DIV1, DIV1_SHIFT),
            _ => return Err(PmError::InvalidParam),
        };
        if desc.dividers().contains(flag) {
            Ok(shift)
        } else {
            Err(PmError::NoFeature)
        }
    }

    /// Sets one of the dividers of a clock.
    pub fn set_divider(
        &mut self,
        platform: &mut impl Platform,
        index: usize,
        divider: u32,
        value: u32,
    ) -> Result<(), PmError> {
        let desc = self.clocks[index].desc;
        let shift = Self::divider_field(desc, divider)?;
        if value > DIV_MASK {
            return Err(PmError::InvalidParam);
        }
        let ctrl = desc.ctrl().ok_or(PmError::NoFeature)?;
        platform.write_register(ctrl, DIV_MASK << shift, value << shift);
        Ok(())
    }

    /// Returns one of the dividers of a clock.
    pub fn get_divider(
        &self,
        platform: &impl Platform,
        index: usize,
        divider: u32,
    ) -> Result<u32, PmError> {
        let desc = self.clocks[index].desc;
        let shift = Self::divider_field(desc, divider)?;
        let ctrl = desc.ctrl().ok_or(PmError::NoFeature)?;
        Ok((platform.read_register(ctrl) >> shift) & DIV_MASK)
    }

    /// Returns the product of the dividers of a clock. A zero field divides by one.
    fn division(&self, platform: &impl Platform, index: usize) -> u64 {
        let desc = self.clocks[index].desc;
        let Some(ctrl) = desc.ctrl() else {
            return 1;
        };
        let value = platform.read_register(ctrl);
        [(Dividers::DIV0, DIV0_SHIFT), (Dividers::DIV1, DIV1_SHIFT)]
            .into_iter()
            .filter(|(flag, _)| desc.dividers().contains(*flag))
            .map(|(_, shift)| u64::from(((value >> shift) & DIV_MASK).max(1)))
            .product()
    }

    /// Returns the output rate of a clock in Hz.
    pub fn rate(&self, platform: &impl Platform, index: usize) -> Result<u64, PmError> {
        let mut division = 1;
        let mut cursor = index;
        for _ in 0..self.clocks.len() {
            let clock = &self.clocks[cursor];
            if let ClockKind::Pll { pll } = clock.desc.kind {
                return Ok(platform.pll_rate(pll) / division);
            }
            division *= self.division(platform, cursor);
            match clock.parent {
                Some(parent) => cursor = parent,
                None => return Ok(platform.reference_clock_rate() / division),
            }
        }
        error!("Parent loop at {}", self.clocks[index].desc.name);
        Err(PmError::Internal)
    }

    /// Programs the dividers of a clock to the highest rate not above `rate`.
    pub fn set_rate(
        &mut self,
        platform: &mut impl Platform,
        index: usize,
        rate: u64,
    ) -> Result<(), PmError> {
        let desc = self.clocks[index].desc;
        let dividers = desc.dividers();
        let ctrl = desc.ctrl().ok_or(PmError::NoFeature)?;
        if dividers.is_empty() {
            return Err(PmError::NoFeature);
        }
        if rate == 0 {
            return Err(PmError::InvalidParam);
        }
        let parent_rate = match self.clocks[index].parent {
            Some(parent) => self.rate(platform, parent)?,
            None => platform.reference_clock_rate(),
        };

        let max_div1 = if dividers.contains(Dividers::DIV1) {
            DIV_MASK
        } else {
            1
        };
        let mut best: Option<(u64, u32, u32)> = None;
        for div0 in 1..=DIV_MASK {
            for div1 in 1..=max_div1 {
                let achieved = parent_rate / u64::from(div0 * div1);
                if achieved <= rate && best.is_none_or(|(best_rate, ..)| achieved > best_rate) {
                    best = Some((achieved, div0, div1));
                }
            }
        }
        let (achieved, div0, div1) = best.ok_or(PmError::InvalidParam)?;

        let mut mask = DIV_MASK << DIV0_SHIFT;
        let mut value = div0 << DIV0_SHIFT;
        if dividers.contains(Dividers::DIV1) {
            mask |= DIV_MASK << DIV1_SHIFT;
            value |= div1 << DIV1_SHIFT;
        }
        platform.write_register(ctrl, mask, value);
        debug!("{}: rate {achieved} Hz for {rate} Hz", desc.name);
        Ok(())
    }

    /// Saves the control register of every clock that has one.
    pub fn save_all(&mut self, platform: &impl Platform) {
        for clock in &mut self.clocks {
            clock.saved_ctrl = clock.desc.ctrl().map(|ctrl| platform.read_register(ctrl));
        }
    }

    /// Writes back the control registers saved by [`Self::save_all`].
    pub fn restore_all(&mut self, platform: &mut impl Platform) {
        for clock in &mut self.clocks {
            if let (Some(ctrl), Some(value)) = (clock.desc.ctrl(), clock.saved_ctrl.take()) {
                platform.write_register(ctrl, u32::MAX, value);
            }
        }
    }
}

impl<P: Platform> Engine<P> {
    /// Returns the IPI mask of the masters allowed to control the clock.
    ///
    /// That is every master that may use a node consuming the clock, and nobody for system
    /// clocks.
    pub fn clock_permissions(&self, index: usize) -> u32 {
        let clock = self.clocks.get(index);
        if clock.desc.is_system() {
            return 0;
        }
        clock
            .users()
            .iter()
            .fold(0, |mask, user| mask | self.node_permissions(*user))
    }

    fn controllable_clock(&self, master: usize, id: ClockId) -> Result<usize, PmError> {
        let index = self.clocks.by_id(id)?;
        if self.clock_permissions(index) & self.masters[master].ipi_mask() == 0 {
            return Err(PmError::NoAccess);
        }
        Ok(index)
    }

    /// Opens the gate of a clock.
    pub fn clock_enable(&mut self, master: usize, id: ClockId) -> Result<(), PmError> {
        let index = self.controllable_clock(master, id)?;
        self.clocks.set_gate(&mut self.platform, index, true)
    }

    /// Closes the gate of a clock.
    pub fn clock_disable(&mut self, master: usize, id: ClockId) -> Result<(), PmError> {
        let index = self.controllable_clock(master, id)?;
        self.clocks.set_gate(&mut self.platform, index, false)
    }

    /// Returns whether the gate of a clock is open.
    pub fn clock_get_state(&self, id: ClockId) -> Result<bool, PmError> {
        self.clocks.get_gate(&self.platform, self.clocks.by_id(id)?)
    }

    /// Sets one of the dividers of a clock.
    pub fn clock_set_divider(
        &mut self,
        master: usize,
        id: ClockId,
        divider: u32,
        value: u32,
    ) -> Result<(), PmError> {
        let index = self.controllable_clock(master, id)?;
        self.clocks
            .set_divider(&mut self.platform, index, divider, value)
    }

    /// Returns one of the dividers of a clock.
    pub fn clock_get_divider(&self, id: ClockId, divider: u32) -> Result<u32, PmError> {
        self.clocks
            .get_divider(&self.platform, self.clocks.by_id(id)?, divider)
    }

    /// Programs a clock's dividers for the given rate.
    pub fn clock_set_rate(&mut self, master: usize, id: ClockId, rate: u64) -> Result<(), PmError> {
        let index = self.controllable_clock(master, id)?;
        self.clocks.set_rate(&mut self.platform, index, rate)
    }

    /// Returns the rate of a clock in Hz.
    pub fn clock_get_rate(&self, id: ClockId) -> Result<u64, PmError> {
        self.clocks.rate(&self.platform, self.clocks.by_id(id)?)
    }

    /// Selects the parent of a clock.
    pub fn clock_set_parent(
        &mut self,
        master: usize,
        id: ClockId,
        select: u32,
    ) -> Result<(), PmError> {
        let index = self.controllable_clock(master, id)?;
        self.clocks.set_parent(&mut self.platform, index, select)
    }

    /// Returns the parent select value of a clock.
    pub fn clock_get_parent(&self, id: ClockId) -> Result<u32, PmError> {
        self.clocks.get_parent(&self.platform, self.clocks.by_id(id)?)
    }

    /// Requests every clock of a node, unless the node already holds them.
    pub(crate) fn request_node_clocks(&mut self, node: NodeRef) -> Result<(), PmError> {
        let record = self.node(node);
        if record.flags().contains(NodeFlags::LOCKED_CLOCK) {
            return Ok(());
        }
        let clocks: ArrayVec<usize, { super::node::MAX_NODE_CLOCKS }> =
            record.clocks().iter().copied().collect();
        for (done, &clock) in clocks.iter().enumerate() {
            if let Err(e) = self.clocks.request(&mut self.platform, clock) {
                for &taken in &clocks[..done] {
                    self.clocks.release(&mut self.platform, taken)?;
                }
                return Err(e);
            }
        }
        self.node_mut(node).set_flags(NodeFlags::LOCKED_CLOCK, true);
        Ok(())
    }

    /// Releases every clock of a node, if the node holds them.
    pub(crate) fn release_node_clocks(&mut self, node: NodeRef) -> Result<(), PmError> {
        let record = self.node(node);
        if !record.flags().contains(NodeFlags::LOCKED_CLOCK) {
            return Ok(());
        }
        let clocks: ArrayVec<usize, { super::node::MAX_NODE_CLOCKS }> =
            record.clocks().iter().copied().collect();
        self.node_mut(node).set_flags(NodeFlags::LOCKED_CLOCK, false);
        for clock in clocks {
            self.clocks.release(&mut self.platform, clock)?;
        }
        Ok(())
    }

    /// Returns whether any clock of the node has its gate open.
    pub fn node_clock_is_active(&self, node: NodeRef) -> bool {
        self.node(node)
            .clocks()
            .iter()
            .any(|&clock| self.clocks.get_gate(&self.platform, clock) == Ok(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{
        test::{Event, TestPlatform, test_helpers::*},
        zynqmp::*,
    };

    fn tree() -> (ClockTree, TestPlatform) {
        let platform = TestPlatform::new();
        let mut tree = ClockTree::new(TOPOLOGY.clocks).unwrap();
        tree.init(&platform);
        (tree, platform)
    }

    fn index(tree: &ClockTree, id: ClockId) -> usize {
        tree.index_of(id).unwrap()
    }

    fn counts(tree: &ClockTree) -> Vec<u32> {
        (0..tree.len()).map(|i| tree.get(i).use_count()).collect()
    }

    #[test]
    fn mux_parent_read_at_init() {
        let (tree, _) = tree();
        let uart0 = index(&tree, CLK_UART0_REF);
        assert_eq!(Some(index(&tree, CLK_IOPLL)), tree.get(uart0).parent());
        let acpu = index(&tree, CLK_ACPU);
        assert_eq!(Some(index(&tree, CLK_APLL)), tree.get(acpu).parent());
        let bridge = index(&tree, CLK_DPLL_TO_LPD);
        assert_eq!(Some(index(&tree, CLK_DPLL)), tree.get(bridge).parent());
    }

    #[test]
    fn request_chains_to_pll_once() {
        let (mut tree, mut platform) = tree();
        let uart0 = index(&tree, CLK_UART0_REF);
        let uart1 = index(&tree, CLK_UART1_REF);
        let iopll = index(&tree, CLK_IOPLL);

        tree.request(&mut platform, uart0).unwrap();
        tree.request(&mut platform, uart1).unwrap();
        tree.request(&mut platform, uart0).unwrap();
        assert_eq!(2, tree.get(uart0).use_count());
        assert_eq!(1, tree.get(uart1).use_count());
        assert_eq!(2, tree.get(iopll).use_count());
        assert_eq!(vec![Event::PllRequest(PLL_IOPLL)], platform.events);

        tree.release(&mut platform, uart0).unwrap();
        tree.release(&mut platform, uart0).unwrap();
        assert_eq!(1, tree.get(iopll).use_count());
        tree.release(&mut platform, uart1).unwrap();
        assert_eq!(0, tree.get(iopll).use_count());
        assert_eq!(
            vec![
                Event::PllRequest(PLL_IOPLL),
                Event::PllRelease(PLL_IOPLL)
            ],
            platform.events
        );
    }

    #[test]
    fn request_release_restores_counts() {
        let (mut tree, mut platform) = tree();
        let before = counts(&tree);
        for id in [CLK_SATA_REF, CLK_GPU_REF, CLK_CPU_R5, CLK_UART1_REF, CLK_DDR_REF] {
            let clock = index(&tree, id);
            for _ in 0..3 {
                tree.request(&mut platform, clock).unwrap();
            }
            for _ in 0..3 {
                tree.release(&mut platform, clock).unwrap();
            }
            assert_eq!(before, counts(&tree), "{id}");
        }
    }

    #[test]
    fn failed_pll_request_rolls_back() {
        let (mut tree, mut platform) = tree();
        platform.fail_pll = Some(PLL_DPLL);
        let before = counts(&tree);
        // SATA_REF is muxed to the DPLL by the reset value of its control register.
        let sata = index(&tree, CLK_SATA_REF);
        assert_eq!(Some(index(&tree, CLK_DPLL)), tree.get(sata).parent());
        assert_eq!(Err(PmError::Other), tree.request(&mut platform, sata));
        assert_eq!(before, counts(&tree));
    }

    #[test]
    fn release_unused_is_internal_error() {
        let (mut tree, mut platform) = tree();
        let uart0 = index(&tree, CLK_UART0_REF);
        assert_eq!(Err(PmError::Internal), tree.release(&mut platform, uart0));
    }

    #[test]
    fn set_parent_moves_use_count() {
        let (mut tree, mut platform) = tree();
        let uart0 = index(&tree, CLK_UART0_REF);
        let iopll = index(&tree, CLK_IOPLL);
        let rpll = index(&tree, CLK_RPLL);
        tree.request(&mut platform, uart0).unwrap();

        tree.set_parent(&mut platform, uart0, 2).unwrap();
        assert_eq!(Some(rpll), tree.get(uart0).parent());
        assert_eq!(0, tree.get(iopll).use_count());
        assert_eq!(1, tree.get(rpll).use_count());
        assert_eq!(2, tree.get_parent(&platform, uart0).unwrap());
        let events = &platform.events;
        let request = events
            .iter()
            .position(|e| *e == Event::PllRequest(PLL_RPLL))
            .unwrap();
        let release = events
            .iter()
            .position(|e| *e == Event::PllRelease(PLL_IOPLL))
            .unwrap();
        assert!(request < release);

        // Same parent again is a no-op.
        platform.events.clear();
        tree.set_parent(&mut platform, uart0, 2).unwrap();
        assert!(platform.events.is_empty());
    }

    #[test]
    fn set_parent_errors() {
        let (mut tree, mut platform) = tree();
        let uart0 = index(&tree, CLK_UART0_REF);
        assert_eq!(
            Err(PmError::InvalidParam),
            tree.set_parent(&mut platform, uart0, 1)
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            tree.set_parent(&mut platform, uart0, 8)
        );
        let bridge = index(&tree, CLK_IOPLL_TO_FPD);
        assert_eq!(
            Err(PmError::NoFeature),
            tree.set_parent(&mut platform, bridge, 0)
        );
        let pll = index(&tree, CLK_APLL);
        assert_eq!(Err(PmError::NoFeature), tree.get_parent(&platform, pll));
    }

    #[test]
    fn unused_clock_switches_without_requests() {
        let (mut tree, mut platform) = tree();
        let uart1 = index(&tree, CLK_UART1_REF);
        tree.set_parent(&mut platform, uart1, 3).unwrap();
        assert_eq!(
            Some(index(&tree, CLK_DPLL_TO_LPD)),
            tree.get(uart1).parent()
        );
        assert!(
            !platform
                .events
                .iter()
                .any(|e| matches!(e, Event::PllRequest(_)))
        );
    }

    #[test]
    fn gate() {
        let (mut tree, mut platform) = tree();
        let uart0 = index(&tree, CLK_UART0_REF);
        tree.set_gate(&mut platform, uart0, false).unwrap();
        assert_eq!(Ok(false), tree.get_gate(&platform, uart0));
        tree.set_gate(&mut platform, uart0, true).unwrap();
        assert_eq!(Ok(true), tree.get_gate(&platform, uart0));
        assert_eq!(
            1 << 24,
            platform.read_register(CRL_APB_BASE + 0x74) & (1 << 24)
        );

        let usb = index(&tree, CLK_USB0_BUS_REF);
        tree.set_gate(&mut platform, usb, true).unwrap();
        assert_ne!(0, platform.read_register(CRL_APB_BASE + 0x60) & (1 << 25));

        let ddr = index(&tree, CLK_DDR_REF);
        assert_eq!(
            Err(PmError::NoFeature),
            tree.set_gate(&mut platform, ddr, true)
        );
    }

    #[test]
    fn dividers() {
        let (mut tree, mut platform) = tree();
        let uart0 = index(&tree, CLK_UART0_REF);
        tree.set_divider(&mut platform, uart0, DIVIDER_0, 15).unwrap();
        tree.set_divider(&mut platform, uart0, DIVIDER_1, 2).unwrap();
        assert_eq!(Ok(15), tree.get_divider(&platform, uart0, DIVIDER_0));
        assert_eq!(Ok(2), tree.get_divider(&platform, uart0, DIVIDER_1));
        // The whole field is writable, zero included.
        tree.set_divider(&mut platform, uart0, DIVIDER_0, 0).unwrap();
        assert_eq!(Ok(0), tree.get_divider(&platform, uart0, DIVIDER_0));
        let undivided = tree.rate(&platform, uart0).unwrap();
        tree.set_divider(&mut platform, uart0, DIVIDER_0, 1).unwrap();
        assert_eq!(Ok(undivided), tree.rate(&platform, uart0));
        tree.set_divider(&mut platform, uart0, DIVIDER_0, DIV_MASK).unwrap();
        assert_eq!(Ok(DIV_MASK), tree.get_divider(&platform, uart0, DIVIDER_0));
        assert_eq!(
            Err(PmError::InvalidParam),
            tree.set_divider(&mut platform, uart0, DIVIDER_0, DIV_MASK + 1)
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            tree.set_divider(&mut platform, uart0, 2, 1)
        );

        let acpu = index(&tree, CLK_ACPU);
        assert_eq!(
            Err(PmError::NoFeature),
            tree.get_divider(&platform, acpu, DIVIDER_1)
        );
        let pll = index(&tree, CLK_IOPLL);
        assert_eq!(
            Err(PmError::NoFeature),
            tree.get_divider(&platform, pll, DIVIDER_0)
        );
    }

    #[test]
    fn rate_walks_to_pll() {
        let (mut tree, mut platform) = tree();
        let uart0 = index(&tree, CLK_UART0_REF);
        tree.set_divider(&mut platform, uart0, DIVIDER_0, 15).unwrap();
        tree.set_divider(&mut platform, uart0, DIVIDER_1, 1).unwrap();
        let iopll_rate = TestPlatform::PLL_RATES[usize::from(PLL_IOPLL)];
        assert_eq!(Ok(iopll_rate / 15), tree.rate(&platform, uart0));

        let bridge = index(&tree, CLK_DPLL_TO_LPD);
        platform.write_register(CRF_APB_BASE + 0x4C, 0x3F << 8, 2 << 8);
        let dpll_rate = TestPlatform::PLL_RATES[usize::from(PLL_DPLL)];
        assert_eq!(Ok(dpll_rate / 2), tree.rate(&platform, bridge));
    }

    #[test]
    fn set_rate_does_not_exceed_target() {
        let (mut tree, mut platform) = tree();
        let uart0 = index(&tree, CLK_UART0_REF);
        let iopll_rate = TestPlatform::PLL_RATES[usize::from(PLL_IOPLL)];
        tree.set_rate(&mut platform, uart0, 100_000_000).unwrap();
        let rate = tree.rate(&platform, uart0).unwrap();
        assert!(rate <= 100_000_000);
        assert_eq!(iopll_rate / 15, rate);

        assert_eq!(
            Err(PmError::InvalidParam),
            tree.set_rate(&mut platform, uart0, 0)
        );
        let pll = index(&tree, CLK_RPLL);
        assert_eq!(
            Err(PmError::NoFeature),
            tree.set_rate(&mut platform, pll, 1000)
        );
    }

    #[test]
    fn save_and_restore() {
        let (mut tree, mut platform) = tree();
        let uart0 = index(&tree, CLK_UART0_REF);
        tree.set_divider(&mut platform, uart0, DIVIDER_0, 7).unwrap();
        tree.save_all(&platform);
        tree.set_divider(&mut platform, uart0, DIVIDER_0, 9).unwrap();
        tree.restore_all(&mut platform);
        assert_eq!(Ok(7), tree.get_divider(&platform, uart0, DIVIDER_0));
    }

    #[test]
    fn permissions_follow_users() {
        let engine = configured_engine();
        let uart1 = engine.clocks.index_of(CLK_UART1_REF).unwrap();
        assert_eq!(IPI_APU | IPI_RPU_0, engine.clock_permissions(uart1));
        let ddr = engine.clocks.index_of(CLK_DDR_REF).unwrap();
        assert_eq!(0, engine.clock_permissions(ddr));
    }

    #[test]
    fn clock_api_checks_permissions() {
        let mut engine = configured_engine();
        let apu = engine.master_by_node(NODE_APU).unwrap();
        let rpu = engine.master_by_node(NODE_RPU_0).unwrap();

        assert_eq!(Err(PmError::NoAccess), engine.clock_enable(rpu, CLK_SATA_REF));
        engine.clock_enable(apu, CLK_SATA_REF).unwrap();
        assert_eq!(Ok(true), engine.clock_get_state(CLK_SATA_REF));
        engine.clock_disable(apu, CLK_SATA_REF).unwrap();
        assert_eq!(Ok(false), engine.clock_get_state(CLK_SATA_REF));

        assert_eq!(
            Err(PmError::NoAccess),
            engine.clock_set_divider(apu, CLK_DDR_REF, DIVIDER_0, 2)
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.clock_get_rate(ClockId(0x999))
        );
        engine.clock_set_parent(apu, CLK_SATA_REF, 2).unwrap();
        assert_eq!(Ok(2), engine.clock_get_parent(CLK_SATA_REF));
    }

    #[test]
    fn node_clocks_are_locked() {
        let mut engine = engine();
        let sata = engine.node_by_id(NODE_SATA).unwrap();
        let clock = engine.clocks.index_of(CLK_SATA_REF).unwrap();

        engine.request_node_clocks(sata).unwrap();
        engine.request_node_clocks(sata).unwrap();
        assert_eq!(1, engine.clocks.get(clock).use_count());
        assert!(engine.node(sata).flags().contains(NodeFlags::LOCKED_CLOCK));

        engine.release_node_clocks(sata).unwrap();
        engine.release_node_clocks(sata).unwrap();
        assert_eq!(0, engine.clocks.get(clock).use_count());
    }

    #[test]
    fn node_clock_activity() {
        let mut engine = engine();
        let sata = engine.node_by_id(NODE_SATA).unwrap();
        let apu = engine.master_by_node(NODE_APU).unwrap();
        engine.set_configuration(None, &base_config()).unwrap();
        assert!(!engine.node_clock_is_active(sata));
        engine.clock_enable(apu, CLK_SATA_REF).unwrap();
        assert!(engine.node_clock_is_active(sata));
    }
}
