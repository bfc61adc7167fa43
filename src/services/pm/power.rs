// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Power domains and islands.
//!
//! Power nodes form a shallow tree. Every node that is on holds a use count on its parent, so a
//! parent can only go down once all its children are down. All walks over the tree are loops,
//! either up the parent links or down with an explicit stack of at most [`MAX_POWER_DEPTH`]
//! frames.

use super::{
    Engine, PmError,
    node::{MAX_LATENCY, Node, NodeDesc, NodeFlags, NodeRef},
};
use crate::platform::Platform;
use arrayvec::ArrayVec;
use log::{debug, error, info, warn};

/// The maximum number of children of a power node.
pub const MAX_POWER_CHILDREN: usize = 24;

/// The number of nesting levels of power nodes: domains, and the islands inside them.
pub const MAX_POWER_DEPTH: usize = 2;

/// The state of a power node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum PowerState {
    /// Powered down.
    Off = 0,
    /// Powered up.
    On = 1,
}

/// What kind of power node this is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerKind {
    /// A top-level power domain with its own supply.
    Domain,
    /// A switchable island inside a domain.
    Island,
}

/// The static description of a power node.
#[derive(Debug)]
pub struct PowerDesc {
    /// The common node description.
    pub node: NodeDesc,
    /// Domain or island.
    pub kind: PowerKind,
    /// Time to power up, in microseconds.
    pub up_latency: u32,
    /// Time to power down, in microseconds.
    pub down_latency: u32,
}

/// The runtime record of a power node.
#[derive(Debug)]
pub struct PowerNode {
    pub(crate) node: Node,
    desc: &'static PowerDesc,
    use_count: u32,
    children: ArrayVec<NodeRef, MAX_POWER_CHILDREN>,
    force_perms: u32,
}

impl PowerNode {
    pub(crate) fn new(desc: &'static PowerDesc) -> Self {
        Self {
            node: Node::new(&desc.node),
            desc,
            use_count: 0,
            children: ArrayVec::new(),
            force_perms: 0,
        }
    }

    /// Returns the number of children holding the node on, plus the explicit requests.
    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    /// Returns whether the node is powered up.
    pub fn is_on(&self) -> bool {
        self.node.state() == PowerState::On as u8
    }

    /// Returns the IPI mask of the masters allowed to force the node down.
    pub fn force_perms(&self) -> u32 {
        self.force_perms
    }

    /// Returns the children of the node.
    pub fn children(&self) -> &[NodeRef] {
        &self.children
    }

    /// Returns the static description.
    pub fn desc(&self) -> &'static PowerDesc {
        self.desc
    }

    fn latency_budget(&self) -> u32 {
        self.desc.up_latency.saturating_add(self.desc.down_latency)
    }

    pub(crate) fn add_child(&mut self, child: NodeRef) -> Result<(), PmError> {
        self.children.try_push(child).map_err(|_| {
            error!("Too many children of {}", self.desc.node.name);
            PmError::Internal
        })
    }

    pub(crate) fn set_force_perms(&mut self, perms: u32) {
        self.force_perms = perms;
    }

    pub(crate) fn clear_config(&mut self) {
        self.force_perms = 0;
    }
}

impl<P: Platform> Engine<P> {
    /// Takes a use count on the power parent of `node`, powering it up if needed.
    pub(crate) fn request_parent_power(&mut self, node: NodeRef) -> Result<(), PmError> {
        let record = self.node(node);
        let Some(parent) = record.parent() else {
            return Ok(());
        };
        if record.flags().contains(NodeFlags::LOCKED_POWER) {
            return Ok(());
        }
        self.power_request(parent)?;
        self.node_mut(node).set_flags(NodeFlags::LOCKED_POWER, true);
        Ok(())
    }

    /// Gives back the use count `node` holds on its power parent.
    pub(crate) fn release_parent_power(&mut self, node: NodeRef) -> Result<(), PmError> {
        let record = self.node(node);
        let Some(parent) = record.parent() else {
            return Ok(());
        };
        if !record.flags().contains(NodeFlags::LOCKED_POWER) {
            return Ok(());
        }
        self.node_mut(node).set_flags(NodeFlags::LOCKED_POWER, false);
        self.power_release(parent)
    }

    fn power_request(&mut self, index: usize) -> Result<(), PmError> {
        self.power_up(index)?;
        self.powers[index].use_count += 1;
        Ok(())
    }

    fn power_release(&mut self, index: usize) -> Result<(), PmError> {
        let power = &mut self.powers[index];
        if power.use_count == 0 {
            error!("{} released with no users", power.node.name());
            return Err(PmError::Internal);
        }
        power.use_count -= 1;
        self.power_settle(index)
    }

    /// Powers up a node, after its ancestors that are off.
    ///
    /// The ancestors are powered top-down. If any of them fails to come up, the ones already
    /// powered by this call are taken down again.
    pub(crate) fn power_up(&mut self, index: usize) -> Result<(), PmError> {
        let mut chain = ArrayVec::<usize, MAX_POWER_DEPTH>::new();
        let mut cursor = Some(index);
        while let Some(power) = cursor {
            if self.powers[power].is_on() {
                break;
            }
            chain.try_push(power).map_err(|_| {
                error!("Power tree deeper than {MAX_POWER_DEPTH}");
                PmError::Internal
            })?;
            cursor = self.powers[power].node.parent();
        }

        for done in (0..chain.len()).rev() {
            if let Err(e) = self.power_up_single(chain[done]) {
                for &undo in &chain[done + 1..] {
                    if let Err(e) = self.power_down_single(undo) {
                        error!("Failed to undo power up: {e:?}");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Powers up a node whose parent is already on.
    fn power_up_single(&mut self, index: usize) -> Result<(), PmError> {
        let id = self.powers[index].node.id();
        self.platform.power_up(id)?;
        self.set_node_state(NodeRef::Power(index), PowerState::On as u8);
        info!("{} powered up", self.powers[index].node.name());
        if let Some(parent) = self.powers[index].node.parent() {
            self.powers[parent].use_count += 1;
            self.powers[index]
                .node
                .set_flags(NodeFlags::LOCKED_POWER, true);
        }
        self.request_node_clocks(NodeRef::Power(index))
    }

    /// Powers down a single node, and returns the parent it held a use count on.
    ///
    /// The caller must make sure no child is on.
    fn power_down_single(&mut self, index: usize) -> Result<Option<usize>, PmError> {
        let node = NodeRef::Power(index);
        self.release_node_clocks(node)?;
        let id = self.powers[index].node.id();
        self.platform.power_down(id)?;
        self.set_node_state(node, PowerState::Off as u8);
        info!("{} powered down", self.powers[index].node.name());
        self.park_oscillator_if_idle();

        let record = &mut self.powers[index].node;
        let parent = record.parent();
        if !record.flags().contains(NodeFlags::LOCKED_POWER) {
            return Ok(None);
        }
        record.set_flags(NodeFlags::LOCKED_POWER, false);
        match parent {
            Some(parent) => {
                self.powers[parent].use_count -= 1;
                Ok(Some(parent))
            }
            None => Ok(None),
        }
    }

    /// Parks the reference oscillator once every power node feeding off it is down and its PLLs
    /// are in reset.
    fn park_oscillator_if_idle(&mut self) {
        let all_off = self.topology.oscillator_gate.iter().all(|&id| {
            self.powers
                .iter()
                .find(|power| power.node.id() == id)
                .is_some_and(|power| !power.is_on())
        });
        if all_off && self.platform.reference_oscillator_plls_reset() {
            debug!("Parking reference oscillator");
            self.platform.park_reference_oscillator();
        }
    }

    fn power_min_child_margin(&self, index: usize) -> u32 {
        self.powers[index]
            .children
            .iter()
            .map(|&child| self.node(child).latency_margin())
            .min()
            .unwrap_or(MAX_LATENCY)
    }

    /// Returns whether an idle node is allowed to go down: nothing holds it, and all its children
    /// tolerate the time it takes to go down and come back up.
    fn power_can_go_down(&self, index: usize) -> bool {
        let power = &self.powers[index];
        power.is_on()
            && power.use_count == 0
            && self.power_min_child_margin(index) > power.latency_budget()
    }

    /// Powers down idle nodes, starting at `index` and walking up.
    fn power_settle(&mut self, index: usize) -> Result<(), PmError> {
        let mut cursor = Some(index);
        while let Some(power) = cursor {
            if !self.power_can_go_down(power) {
                break;
            }
            cursor = self.power_down_single(power)?;
        }
        Ok(())
    }

    /// Recomputes the latency margin of a power node after one of its children's changed, and
    /// bubbles the change up.
    ///
    /// A node that is off but whose children can't wait for it to power up is powered up, and an
    /// idle node whose children tolerate it going down is powered down.
    pub(crate) fn power_update_latency(&mut self, index: usize) -> Result<(), PmError> {
        let mut cursor = Some(index);
        while let Some(power) = cursor {
            let min_margin = self.power_min_child_margin(power);
            let budget = self.powers[power].latency_budget();
            if !self.powers[power].is_on() && min_margin < budget {
                debug!(
                    "{} powered up for latency {min_margin}",
                    self.powers[power].node.name()
                );
                self.power_up(power)?;
            } else if self.power_can_go_down(power) {
                self.power_down_single(power)?;
            }

            let margin = if min_margin == MAX_LATENCY {
                MAX_LATENCY
            } else {
                min_margin.saturating_sub(budget)
            };
            self.powers[power].node.set_latency_margin(margin);
            cursor = self.powers[power].node.parent();
        }
        Ok(())
    }

    /// Forces a power node and everything below it down.
    ///
    /// Every leaf below a node is forced down before the node itself goes down.
    pub(crate) fn power_force_down(&mut self, index: usize) -> Result<(), PmError> {
        if !self.powers[index].is_on() {
            return Ok(());
        }
        info!("Forcing {} down", self.powers[index].node.name());

        let mut stack = ArrayVec::<(usize, usize), MAX_POWER_DEPTH>::new();
        stack.push((index, 0));
        while let Some(frame) = stack.last_mut() {
            let (power, cursor) = *frame;
            frame.1 += 1;
            match self.powers[power].children.get(cursor).copied() {
                Some(NodeRef::Power(child)) => {
                    if self.powers[child].is_on() {
                        stack.try_push((child, 0)).map_err(|_| {
                            error!("Power tree deeper than {MAX_POWER_DEPTH}");
                            PmError::Internal
                        })?;
                    }
                }
                Some(leaf) => self.node_force_down(leaf)?,
                None => {
                    stack.pop();
                    self.power_force_down_single(power)?;
                }
            }
        }

        match self.powers[index].node.parent() {
            Some(parent) => self.power_settle(parent),
            None => Ok(()),
        }
    }

    fn power_force_down_single(&mut self, index: usize) -> Result<(), PmError> {
        let power = &mut self.powers[index];
        if !power.is_on() {
            return Ok(());
        }
        if power.use_count != 0 {
            warn!(
                "{} still has {} users after forcing children down",
                power.node.name(),
                power.use_count
            );
            power.use_count = 0;
        }
        self.power_down_single(index)?;
        Ok(())
    }

    /// Returns the power consumed by the node and everything below it that is on.
    pub(crate) fn power_data(&self, index: usize) -> u32 {
        let mut total = 0;
        let mut stack = ArrayVec::<(usize, usize), MAX_POWER_DEPTH>::new();
        stack.push((index, 0));
        while let Some(frame) = stack.last_mut() {
            let (power, cursor) = *frame;
            frame.1 += 1;
            if cursor == 0 {
                let node = &self.powers[power].node;
                total += node.power_in_state(node.state());
            }
            match self.powers[power].children.get(cursor).copied() {
                Some(NodeRef::Power(child)) => {
                    if self.powers[child].is_on() && stack.try_push((child, 0)).is_err() {
                        error!("Power tree deeper than {MAX_POWER_DEPTH}");
                    }
                }
                Some(leaf) => {
                    let node = self.node(leaf);
                    total += node.power_in_state(node.state());
                }
                None => {
                    stack.pop();
                }
            }
        }
        total
    }

    /// Returns the time to power the node up, including its ancestors that are off.
    pub(crate) fn power_wake_latency(&self, index: usize) -> u32 {
        let mut latency = 0u32;
        let mut cursor = Some(index);
        while let Some(power) = cursor {
            let record = &self.powers[power];
            if record.is_on() {
                break;
            }
            latency = latency.saturating_add(record.desc.up_latency);
            cursor = record.node.parent();
        }
        latency
    }

    /// Returns whether any processor or slave below the node is usable.
    pub(crate) fn power_is_usable(&self, index: usize) -> bool {
        let leaves = (0..self.procs.len())
            .map(NodeRef::Processor)
            .chain((0..self.slaves.len()).map(NodeRef::Slave));
        for leaf in leaves {
            if !self.node_is_usable(leaf) {
                continue;
            }
            let mut cursor = self.node(leaf).parent();
            while let Some(power) = cursor {
                if power == index {
                    return true;
                }
                cursor = self.powers[power].node.parent();
            }
        }
        false
    }
}
