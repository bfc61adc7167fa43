// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Parsing and applying configuration objects.
//!
//! A configuration object is a stream of 32-bit words in the byte order of the target: a header
//! giving the number of sections and the object type, followed by the sections. Each section
//! starts with its id and a record count.

use super::{
    Engine, NodeId, PmError,
    node::NodeRef,
    requirement::{ReleaseKind, RequirementFlags},
    slave::Capabilities,
};
use crate::platform::Platform;
use log::{debug, info, warn};
use num_enum::TryFromPrimitive;
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Slave record flag: the slave may be used by several masters at once.
const SLAVE_FLAG_SHAREABLE: u32 = 1 << 0;
/// Pre-allocation record flag: the master counts as having requested the slave itself.
const PREALLOC_FLAG_REQUESTED: u32 = 1 << 0;

/// The sections of a configuration object.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum SectionId {
    /// Masters and their permissions over each other.
    Master = 0x101,
    /// Slaves and the masters that may use them.
    Slave = 0x102,
    /// Capabilities given to masters without asking.
    Prealloc = 0x103,
    /// Who may force power nodes down.
    PowerPerms = 0x104,
    /// Who may drive reset lines.
    ResetPerms = 0x105,
    /// Who may shut the system down.
    Shutdown = 0x106,
    /// Who may load further configuration objects.
    SetConfig = 0x107,
    /// General purpose output bits.
    Gpo = 0x108,
}

impl SectionId {
    fn allowed_in_overlay(self) -> bool {
        matches!(
            self,
            Self::PowerPerms | Self::ResetPerms | Self::Shutdown | Self::SetConfig
        )
    }
}

/// The type of a configuration object.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum ObjectType {
    /// Replaces the whole configuration.
    Base = 1,
    /// Only changes permissions.
    Overlay = 2,
}

#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct MasterRecord {
    node_id: u32,
    ipi_mask: u32,
    suspend_timeout: u32,
    suspend_perms: u32,
    wake_perms: u32,
}

#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct SlaveRecord {
    node_id: u32,
    flags: u32,
    ipi_mask: u32,
}

#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct PreallocHeader {
    ipi_mask: u32,
    count: u32,
}

#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct PreallocRecord {
    node_id: u32,
    flags: u32,
    caps: u32,
}

#[derive(Clone, Copy, Debug, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct PermRecord {
    id: u32,
    perms: u32,
}

/// Reads fixed-size records off the front of a configuration object.
struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn read<T: FromBytes>(&mut self) -> Result<T, PmError> {
        let (value, rest) = T::read_from_prefix(self.bytes).map_err(|_| {
            warn!("Configuration object truncated");
            PmError::InvalidParam
        })?;
        self.bytes = rest;
        Ok(value)
    }

    fn word(&mut self) -> Result<u32, PmError> {
        self.read()
    }
}

impl<P: Platform> Engine<P> {
    /// Loads a configuration object.
    ///
    /// `master` is the master that sent it, or `None` for the object loaded at boot.
    pub fn set_configuration(
        &mut self,
        master: Option<usize>,
        bytes: &[u8],
    ) -> Result<(), PmError> {
        let mut reader = Reader::new(bytes);
        let header_len = reader.word()?;
        if header_len < 2 {
            warn!("Configuration header of {header_len} words");
            return Err(PmError::InvalidParam);
        }
        let section_count = reader.word()?;
        let object_type = ObjectType::try_from(reader.word()?)?;
        for _ in 2..header_len {
            reader.word()?;
        }
        match master {
            Some(master) => info!(
                "{} loads {object_type:?} configuration",
                self.masters[master].name()
            ),
            None => info!("Loading {object_type:?} configuration"),
        }

        if object_type == ObjectType::Base {
            self.reset();
        } else if !self.system.config_loaded {
            warn!("Overlay configuration without a base");
            return Err(PmError::InvalidParam);
        }
        for _ in 0..section_count {
            let section = SectionId::try_from(reader.word()?)?;
            if object_type == ObjectType::Overlay && !section.allowed_in_overlay() {
                warn!("{section:?} section in overlay configuration");
                return Err(PmError::InvalidParam);
            }
            self.config_section(section, &mut reader)?;
        }
        if object_type == ObjectType::Base {
            self.system_add_requirements()?;
        }
        self.system.config_loaded = true;
        Ok(())
    }

    /// Loads the configuration object at `address` on behalf of the master owning `ipi_mask`.
    ///
    /// Anyone may load the first object. After that only masters granted the permission by the
    /// loaded configuration may.
    pub fn set_configuration_at(&mut self, ipi_mask: u32, address: u32) -> Result<(), PmError> {
        if self.system.config_loaded && self.system.set_config_perms & ipi_mask == 0 {
            return Err(PmError::NoAccess);
        }
        let master = self.master_by_ipi(ipi_mask);
        let bytes = self.platform.config_object(address)?;
        self.set_configuration(master, bytes)
    }

    fn config_section(&mut self, section: SectionId, reader: &mut Reader) -> Result<(), PmError> {
        let count = reader.word()?;
        debug!("Section {section:?}: {count} records");
        match section {
            SectionId::Master => {
                for _ in 0..count {
                    let record: MasterRecord = reader.read()?;
                    let master = self
                        .master_by_node(NodeId(record.node_id))
                        .ok_or(PmError::InvalidParam)?;
                    self.masters[master].configure(
                        record.ipi_mask,
                        record.suspend_timeout,
                        record.suspend_perms,
                        record.wake_perms,
                    );
                }
            }
            SectionId::Slave => {
                for _ in 0..count {
                    let record: SlaveRecord = reader.read()?;
                    self.config_slave(record)?;
                }
            }
            SectionId::Prealloc => {
                for _ in 0..count {
                    let header: PreallocHeader = reader.read()?;
                    let master = self
                        .master_by_ipi(header.ipi_mask)
                        .ok_or(PmError::InvalidParam)?;
                    for _ in 0..header.count {
                        let record: PreallocRecord = reader.read()?;
                        self.config_prealloc(master, record)?;
                    }
                }
            }
            SectionId::PowerPerms => {
                for _ in 0..count {
                    let record: PermRecord = reader.read()?;
                    let Some(NodeRef::Power(power)) = self.node_by_id(NodeId(record.id)) else {
                        warn!("Power permissions for {}", NodeId(record.id));
                        return Err(PmError::InvalidParam);
                    };
                    self.powers[power].set_force_perms(record.perms);
                }
            }
            SectionId::ResetPerms => {
                for _ in 0..count {
                    let record: PermRecord = reader.read()?;
                    self.resets.set_perms(record.id, record.perms)?;
                }
            }
            SectionId::Shutdown | SectionId::SetConfig | SectionId::Gpo => {
                let mut value = 0;
                for _ in 0..count {
                    value |= reader.word()?;
                }
                match section {
                    SectionId::Shutdown => self.system.shutdown_perms = value,
                    SectionId::SetConfig => self.system.set_config_perms = value,
                    _ => {
                        self.system.gpo = value;
                        self.platform.set_gpo(value);
                    }
                }
            }
        }
        Ok(())
    }

    fn config_slave(&mut self, record: SlaveRecord) -> Result<(), PmError> {
        let Some(NodeRef::Slave(slave)) = self.node_by_id(NodeId(record.node_id)) else {
            warn!("Slave record for {}", NodeId(record.node_id));
            return Err(PmError::InvalidParam);
        };
        self.slaves[slave].shareable = record.flags & SLAVE_FLAG_SHAREABLE != 0;
        for master in 0..self.masters.len() {
            let owner = &self.masters[master];
            if owner.is_configured() && owner.ipi_mask() & record.ipi_mask != 0 {
                self.req_add(Some(master), slave)?;
            }
        }
        Ok(())
    }

    fn config_prealloc(&mut self, master: usize, record: PreallocRecord) -> Result<(), PmError> {
        let id = NodeId(record.node_id);
        let Some(NodeRef::Slave(slave)) = self.node_by_id(id) else {
            warn!("Pre-allocation of {id}");
            return Err(PmError::InvalidParam);
        };
        let Some(req) = self.find_requirement(master, slave) else {
            warn!("Pre-allocation of {id} to {} which can't use it", self.masters[master].name());
            return Err(PmError::InvalidParam);
        };
        let caps = Capabilities::from_wire(record.caps)?;
        let requested = record.flags & PREALLOC_FLAG_REQUESTED != 0;
        let req_record = &mut self.reqs[req];
        req_record.set_pre(caps);
        req_record.set_flags(RequirementFlags::REQUESTED, requested);
        req_record.set_flags(RequirementFlags::USED, true);
        self.req_update(req, caps)
    }

    /// Called by a master once it has requested everything it needs after booting.
    ///
    /// Gives back whatever the master got without asking, then powers down every node no master
    /// may use.
    pub fn init_finalize(&mut self, master: usize) -> Result<(), PmError> {
        info!("{} finalised its initialisation", self.masters[master].name());
        self.release_requirements(master, ReleaseKind::Unrequested)?;
        for node in self.all_nodes() {
            if !self.node_is_usable(node) {
                self.node_force_down(node)?;
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
        services::pm::{master::MasterState, reset::ResetAction},
    };

    fn requirement(engine: &Engine<TestPlatform>, master: NodeId, slave: NodeId) -> usize {
        let master = engine.master_by_node(master).unwrap();
        let Some(NodeRef::Slave(slave)) = engine.node_by_id(slave) else {
            panic!();
        };
        engine.find_requirement(master, slave).unwrap()
    }

    fn two_masters() -> ConfigBuilder {
        ConfigBuilder::base().section(
            SectionId::Master,
            &[
                &[NODE_APU.0, IPI_APU, 1000, IPI_RPU_0, IPI_RPU_0],
                &[NODE_RPU_0.0, IPI_RPU_0, 1000, IPI_APU, IPI_APU],
            ],
        )
    }

    #[test]
    fn masters_are_configured() {
        let engine = configured_engine();
        let apu = engine.master_by_ipi(IPI_APU).unwrap();
        assert_eq!(IPI_RPU_0, engine.masters[apu].suspend_perms());
        assert_eq!(IPI_RPU_0, engine.masters[apu].wake_perms());
        assert!(engine.master_by_ipi(IPI_RPU_0).is_some());
        assert!(engine.master_by_ipi(IPI_RPU_1).is_none());
        assert!(engine.system.config_loaded());
    }

    #[test]
    fn prealloc_takes_effect_at_load() {
        let mut engine = engine();
        let config = two_masters()
            .section(
                SectionId::Slave,
                &[
                    &[NODE_OCM_0.0, 1, IPI_APU | IPI_RPU_0],
                    &[NODE_UART_1.0, 1, IPI_APU | IPI_RPU_0],
                    &[NODE_TTC_0.0, 0, IPI_APU],
                ],
            )
            .prealloc(&[
                (IPI_APU, &[[NODE_OCM_0.0, 1, 0x3]]),
                (IPI_RPU_0, &[[NODE_UART_1.0, 1, 0x1]]),
            ])
            .build();
        engine.set_configuration(None, &config).unwrap();

        // Five requirements from the slave section, one held by the system.
        assert_eq!(6, engine.reqs.len());
        let ocm = requirement(&engine, NODE_APU, NODE_OCM_0);
        assert_eq!(Capabilities::ACCESS | Capabilities::CONTEXT, engine.reqs[ocm].curr());
        assert!(
            engine.reqs[ocm]
                .flags()
                .contains(RequirementFlags::USED | RequirementFlags::REQUESTED)
        );
        // The RPU isn't running yet, but gets its capabilities all the same.
        assert_eq!(
            MasterState::Uninitialized,
            engine.masters[engine.master_by_node(NODE_RPU_0).unwrap()].state()
        );
        let uart = requirement(&engine, NODE_RPU_0, NODE_UART_1);
        assert_eq!(Capabilities::ACCESS, engine.reqs[uart].curr());
        assert_eq!(Capabilities::ACCESS, engine.reqs[uart].pre());
        assert!(engine.reqs[uart].flags().contains(RequirementFlags::USED));
        assert_eq!(Some(1), engine.node_state_by_id(NODE_UART_1));

        let rpu = engine.master_by_node(NODE_RPU_0).unwrap();
        assert!(engine.find_requirement(rpu, engine.reqs[ocm].slave()).is_some());
        let Some(NodeRef::Slave(ttc)) = engine.node_by_id(NODE_TTC_0) else {
            panic!();
        };
        assert!(!engine.slaves[ttc].is_shareable());
        assert_eq!(None, engine.find_requirement(rpu, ttc));
    }

    #[test]
    fn malformed_objects_are_rejected() {
        let mut engine = engine();
        let config = two_masters().build();
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.set_configuration(None, &config[..config.len() - 2])
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.set_configuration(None, &ConfigBuilder::base().raw_section(0x1FF, &[]).build())
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.set_configuration(
                None,
                &two_masters()
                    .section(SectionId::Slave, &[&[NODE_APU_0.0, 0, IPI_APU]])
                    .build()
            )
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.set_configuration(
                None,
                &two_masters()
                    .prealloc(&[(IPI_APU, &[[NODE_SATA.0, 1, 1]])])
                    .build()
            )
        );
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.set_configuration(
                None,
                &ConfigBuilder::base()
                    .section(SectionId::PowerPerms, &[&[NODE_UART_0.0, IPI_APU]])
                    .build()
            )
        );
    }

    #[test]
    fn overlay_changes_permissions_only() {
        let mut engine = engine();
        let overlay = ConfigBuilder::overlay()
            .section(SectionId::PowerPerms, &[&[NODE_PLD.0, IPI_RPU_0]])
            .build();
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.set_configuration(None, &overlay)
        );

        engine.set_configuration(None, &base_config()).unwrap();
        let requirements = engine.reqs.len();
        engine.set_configuration(None, &overlay).unwrap();
        let Some(NodeRef::Power(pld)) = engine.node_by_id(NODE_PLD) else {
            panic!();
        };
        assert_eq!(IPI_RPU_0, engine.powers[pld].force_perms());
        assert_eq!(requirements, engine.reqs.len());

        let bad = ConfigBuilder::overlay()
            .section(SectionId::Slave, &[&[NODE_UART_0.0, 0, IPI_APU]])
            .build();
        assert_eq!(Err(PmError::InvalidParam), engine.set_configuration(None, &bad));
    }

    #[test]
    fn reload_needs_permission() {
        let mut platform = TestPlatform::new();
        platform.config_objects.insert(0x1000, base_config().leak());
        let mut engine = Engine::new(platform, &TOPOLOGY).unwrap();

        engine.set_configuration_at(IPI_RPU_0, 0x1000).unwrap();
        assert_eq!(
            Err(PmError::NoAccess),
            engine.set_configuration_at(IPI_RPU_0, 0x1000)
        );
        engine.set_configuration_at(IPI_APU, 0x1000).unwrap();
        assert_eq!(
            Err(PmError::InvalidParam),
            engine.set_configuration_at(IPI_APU, 0x2000)
        );
    }

    #[test]
    fn base_reload_forgets_previous() {
        let mut engine = configured_engine();
        let apu = engine.master_by_node(NODE_APU).unwrap();
        engine
            .request_node(apu, NODE_UART_1, Capabilities::ACCESS)
            .unwrap();
        engine.set_configuration(None, &base_config()).unwrap();
        let uart = requirement(&engine, NODE_APU, NODE_UART_1);
        assert!(!engine.reqs[uart].flags().contains(RequirementFlags::USED));
        // The hardware stays where it was.
        assert_eq!(Some(1), engine.node_state_by_id(NODE_UART_1));
    }

    #[test]
    fn permission_sections() {
        let mut engine = configured_engine();
        assert!(engine.platform().events.contains(&Event::Gpo(0)));
        let apu = engine.master_by_node(NODE_APU).unwrap();
        engine
            .reset_assert(apu, RESET_UART0, ResetAction::Pulse)
            .unwrap();
        assert_eq!(IPI_APU, engine.system.shutdown_perms);
        assert_eq!(IPI_APU, engine.system.set_config_perms);
    }

    #[test]
    fn init_finalize_releases_and_powers_down() {
        let mut platform = TestPlatform::new();
        platform.initial_states.insert(NODE_I2C_0, 1);
        let mut engine = Engine::new(platform, &TOPOLOGY).unwrap();
        engine.set_configuration(None, &base_config()).unwrap();
        let apu = engine.master_by_node(NODE_APU).unwrap();
        let l2 = requirement(&engine, NODE_APU, NODE_L2);
        engine.reqs[l2].set_flags(RequirementFlags::REQUESTED, false);

        engine.init_finalize(apu).unwrap();
        assert_eq!(Capabilities::empty(), engine.reqs[l2].curr());
        let uart = requirement(&engine, NODE_APU, NODE_UART_0);
        assert_eq!(Capabilities::ACCESS, engine.reqs[uart].curr());
        // Nobody may use the I2C controller.
        assert_eq!(Some(0), engine.node_state_by_id(NODE_I2C_0));
        assert_eq!(MasterState::Active, engine.masters[apu].state());
    }
}
