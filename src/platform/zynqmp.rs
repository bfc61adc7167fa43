// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The static topology of the ZynqMP processing system: power domains and islands, processors,
//! slaves, the clock tree, masters and reset lines.
//!
//! Node, clock and reset identifiers are the values used on the wire.

#![allow(missing_docs)]

use crate::{
    logger::{HybridSink, LockedWriter, inmemory::MemoryLogger},
    services::pm::{
        NodeId, Topology,
        clock::{ClockDesc, ClockFlags, ClockId, ClockKind, ClockMux, Dividers, MuxInput},
        master::MasterDesc,
        node::NodeDesc,
        power::{PowerDesc, PowerKind},
        proc::ProcDesc,
        reset::ResetDesc,
        slave::{Capabilities, SlaveDesc, SlaveFsm, SlaveTransition, WakeSource},
        system::SystemRequirement,
    },
};
use core::fmt::Write;

pub const NODE_APU: NodeId = NodeId(0x1);
pub const NODE_APU_0: NodeId = NodeId(0x2);
pub const NODE_APU_1: NodeId = NodeId(0x3);
pub const NODE_APU_2: NodeId = NodeId(0x4);
pub const NODE_APU_3: NodeId = NodeId(0x5);
pub const NODE_RPU: NodeId = NodeId(0x6);
pub const NODE_RPU_0: NodeId = NodeId(0x7);
pub const NODE_RPU_1: NodeId = NodeId(0x8);
pub const NODE_PLD: NodeId = NodeId(0x9);
pub const NODE_FPD: NodeId = NodeId(0xA);
pub const NODE_OCM_0: NodeId = NodeId(0xB);
pub const NODE_OCM_1: NodeId = NodeId(0xC);
pub const NODE_OCM_2: NodeId = NodeId(0xD);
pub const NODE_OCM_3: NodeId = NodeId(0xE);
pub const NODE_TCM_0_A: NodeId = NodeId(0xF);
pub const NODE_TCM_0_B: NodeId = NodeId(0x10);
pub const NODE_TCM_1_A: NodeId = NodeId(0x11);
pub const NODE_TCM_1_B: NodeId = NodeId(0x12);
pub const NODE_L2: NodeId = NodeId(0x13);
pub const NODE_USB_0: NodeId = NodeId(0x16);
pub const NODE_TTC_0: NodeId = NodeId(0x18);
pub const NODE_SATA: NodeId = NodeId(0x1C);
pub const NODE_ETH_0: NodeId = NodeId(0x1D);
pub const NODE_UART_0: NodeId = NodeId(0x21);
pub const NODE_UART_1: NodeId = NodeId(0x22);
pub const NODE_I2C_0: NodeId = NodeId(0x25);
pub const NODE_SD_0: NodeId = NodeId(0x27);
pub const NODE_GDMA: NodeId = NodeId(0x2A);
pub const NODE_DDR: NodeId = NodeId(0x37);
pub const NODE_IPI_APU: NodeId = NodeId(0x38);
pub const NODE_IPI_RPU_0: NodeId = NodeId(0x39);
pub const NODE_GPU: NodeId = NodeId(0x3A);
pub const NODE_LPD: NodeId = NodeId(0x3E);
pub const NODE_PL: NodeId = NodeId(0x45);

/// IPI channel of the APU.
pub const IPI_APU: u32 = 1 << 0;
/// IPI channel of RPU core 0.
pub const IPI_RPU_0: u32 = 1 << 8;
/// IPI channel of RPU core 1.
pub const IPI_RPU_1: u32 = 1 << 9;

/// Base address of the low-power domain clock and reset controller.
pub const CRL_APB_BASE: u32 = 0xFF5E_0000;
/// Base address of the full-power domain clock and reset controller.
pub const CRF_APB_BASE: u32 = 0xFD1A_0000;

pub const PLL_IOPLL: u8 = 0;
pub const PLL_RPLL: u8 = 1;
pub const PLL_APLL: u8 = 2;
pub const PLL_DPLL: u8 = 3;
pub const PLL_VPLL: u8 = 4;

pub const CLK_IOPLL: ClockId = ClockId(0);
pub const CLK_RPLL: ClockId = ClockId(1);
pub const CLK_APLL: ClockId = ClockId(2);
pub const CLK_DPLL: ClockId = ClockId(3);
pub const CLK_VPLL: ClockId = ClockId(4);
pub const CLK_IOPLL_TO_FPD: ClockId = ClockId(5);
pub const CLK_RPLL_TO_FPD: ClockId = ClockId(6);
pub const CLK_APLL_TO_LPD: ClockId = ClockId(7);
pub const CLK_DPLL_TO_LPD: ClockId = ClockId(8);
pub const CLK_VPLL_TO_LPD: ClockId = ClockId(9);
pub const CLK_ACPU: ClockId = ClockId(10);
pub const CLK_GDMA_REF: ClockId = ClockId(19);
pub const CLK_DDR_REF: ClockId = ClockId(21);
pub const CLK_SATA_REF: ClockId = ClockId(22);
pub const CLK_GPU_REF: ClockId = ClockId(24);
pub const CLK_USB0_BUS_REF: ClockId = ClockId(32);
pub const CLK_CPU_R5: ClockId = ClockId(37);
pub const CLK_GEM0_REF: ClockId = ClockId(45);
pub const CLK_SDIO0_REF: ClockId = ClockId(54);
pub const CLK_UART0_REF: ClockId = ClockId(56);
pub const CLK_UART1_REF: ClockId = ClockId(57);
pub const CLK_I2C0_REF: ClockId = ClockId(61);
pub const CLK_PL0_REF: ClockId = ClockId(71);

pub const RESET_GDMA: u32 = 1011;
pub const RESET_GPU: u32 = 1014;
pub const RESET_SATA: u32 = 1016;
pub const RESET_APU_L2: u32 = 1021;
pub const RESET_DDR: u32 = 1026;
pub const RESET_GEM0: u32 = 1029;
pub const RESET_QSPI: u32 = 1033;
pub const RESET_UART0: u32 = 1034;
pub const RESET_UART1: u32 = 1035;
pub const RESET_SDIO0: u32 = 1038;

/// Time to power up the full-power domain, in microseconds.
pub const FPD_POWER_UP_LATENCY: u32 = 1800;
/// Time to power up the low-power domain, in microseconds.
pub const LPD_POWER_UP_LATENCY: u32 = 1500;
/// Time to power up the programmable logic domain, in microseconds.
pub const PLD_POWER_UP_LATENCY: u32 = 1000;
/// Time to power up the APU island, in microseconds.
pub const APU_POWER_UP_LATENCY: u32 = 400;
/// Time to power up the RPU island, in microseconds.
pub const RPU_POWER_UP_LATENCY: u32 = 300;

/// Time for an APU core to start executing once its island is on.
pub const APU_WAKE_LATENCY: u32 = 150;
/// Time for an RPU core to start executing once its island is on.
pub const RPU_WAKE_LATENCY: u32 = 100;

/// Latency of the generic OFF to ON transition.
pub const GENERIC_WAKE_LATENCY: u32 = 50;
/// Latency of the SRAM OFF to ON transition.
pub const SRAM_WAKE_LATENCY: u32 = 200;
/// Latency of the SRAM retention to ON transition.
pub const SRAM_RESUME_LATENCY: u32 = 20;
/// Latency of the DDR self-refresh exit.
pub const DDR_RESUME_LATENCY: u32 = 250;

const ALL_ON: Capabilities = Capabilities::all();

const fn transition(from: u8, to: u8, latency: u32) -> SlaveTransition {
    SlaveTransition { from, to, latency }
}

/// OFF, ON.
pub static GENERIC_FSM: SlaveFsm = SlaveFsm {
    states: &[Capabilities::empty(), ALL_ON],
    transitions: &[
        transition(0, 1, GENERIC_WAKE_LATENCY),
        transition(1, 0, 0),
    ],
};

/// OFF, RETENTION, ON.
pub static SRAM_FSM: SlaveFsm = SlaveFsm {
    states: &[
        Capabilities::empty(),
        Capabilities::CONTEXT.union(Capabilities::POWER),
        ALL_ON,
    ],
    transitions: &[
        transition(0, 2, SRAM_WAKE_LATENCY),
        transition(0, 1, SRAM_WAKE_LATENCY),
        transition(1, 2, SRAM_RESUME_LATENCY),
        transition(2, 1, 0),
        transition(1, 0, 0),
        transition(2, 0, 0),
    ],
};

/// OFF, SELF-REFRESH, ON.
///
/// Self-refresh is only entered from ON.
pub static DDR_FSM: SlaveFsm = SlaveFsm {
    states: &[
        Capabilities::empty(),
        Capabilities::CONTEXT.union(Capabilities::POWER),
        Capabilities::ACCESS
            .union(Capabilities::CONTEXT)
            .union(Capabilities::POWER)
            .union(Capabilities::CLOCKED),
    ],
    transitions: &[
        transition(0, 2, DDR_RESUME_LATENCY),
        transition(1, 2, DDR_RESUME_LATENCY),
        transition(2, 1, 0),
        transition(2, 0, 0),
    ],
};

/// OFF, WAKE, ON.
pub static USB_FSM: SlaveFsm = SlaveFsm {
    states: &[
        Capabilities::empty(),
        Capabilities::WAKEUP.union(Capabilities::POWER),
        ALL_ON,
    ],
    transitions: &[
        transition(0, 2, GENERIC_WAKE_LATENCY),
        transition(1, 2, GENERIC_WAKE_LATENCY),
        transition(0, 1, GENERIC_WAKE_LATENCY),
        transition(2, 1, 0),
        transition(2, 0, 0),
        transition(1, 0, 0),
    ],
};

/// A single state in which the slave is always usable.
pub static ALWAYS_ON_FSM: SlaveFsm = SlaveFsm {
    states: &[ALL_ON],
    transitions: &[],
};

/// GIC proxy bit of the UART 1 interrupt.
pub const UART_1_WAKE: WakeSource = WakeSource {
    group: 0,
    mask: 1 << 22,
};
/// GIC proxy bit of the USB 0 interrupt.
pub const USB_0_WAKE: WakeSource = WakeSource {
    group: 1,
    mask: 1 << 1,
};
/// GIC proxy bit of the ethernet 0 interrupt.
pub const ETH_0_WAKE: WakeSource = WakeSource {
    group: 0,
    mask: 1 << 25,
};

const fn domain(
    id: NodeId,
    name: &'static str,
    power: &'static [u32],
    up: u32,
    down: u32,
) -> PowerDesc {
    PowerDesc {
        node: NodeDesc::new(id, name).power(power),
        kind: PowerKind::Domain,
        up_latency: up,
        down_latency: down,
    }
}

const fn island(
    id: NodeId,
    name: &'static str,
    parent: NodeId,
    power: &'static [u32],
    up: u32,
    down: u32,
) -> PowerDesc {
    PowerDesc {
        node: NodeDesc::new(id, name).parent(parent).power(power),
        kind: PowerKind::Island,
        up_latency: up,
        down_latency: down,
    }
}

static POWER_NODES: [PowerDesc; 5] = [
    domain(NODE_FPD, "fpd", &[0, 300], FPD_POWER_UP_LATENCY, 400),
    domain(NODE_LPD, "lpd", &[0, 150], LPD_POWER_UP_LATENCY, 400),
    domain(NODE_PLD, "pld", &[0, 500], PLD_POWER_UP_LATENCY, 200),
    island(NODE_APU, "apu", NODE_FPD, &[0, 100], APU_POWER_UP_LATENCY, 150),
    island(NODE_RPU, "rpu", NODE_LPD, &[0, 40], RPU_POWER_UP_LATENCY, 100),
];

// Power per processor state: forced off, active, sleep, suspending.
const APU_CORE_POWER: &[u32] = &[0, 120, 10, 120];
const RPU_CORE_POWER: &[u32] = &[0, 50, 5, 50];

const fn apu_core(id: NodeId, name: &'static str, core: u32) -> ProcDesc {
    ProcDesc {
        node: NodeDesc::new(id, name)
            .parent(NODE_APU)
            .clocks(&[CLK_ACPU])
            .power(APU_CORE_POWER),
        wake_latency: APU_WAKE_LATENCY,
        wfi_mask: 1 << core,
        wake_mask: 1 << core,
    }
}

const fn rpu_core(id: NodeId, name: &'static str, core: u32) -> ProcDesc {
    ProcDesc {
        node: NodeDesc::new(id, name)
            .parent(NODE_RPU)
            .clocks(&[CLK_CPU_R5])
            .power(RPU_CORE_POWER),
        wake_latency: RPU_WAKE_LATENCY,
        wfi_mask: 1 << (8 + core),
        wake_mask: 1 << (8 + core),
    }
}

static PROCESSORS: [ProcDesc; 6] = [
    apu_core(NODE_APU_0, "apu_0", 0),
    apu_core(NODE_APU_1, "apu_1", 1),
    apu_core(NODE_APU_2, "apu_2", 2),
    apu_core(NODE_APU_3, "apu_3", 3),
    rpu_core(NODE_RPU_0, "rpu_0", 0),
    rpu_core(NODE_RPU_1, "rpu_1", 1),
];

const GENERIC_POWER: &[u32] = &[0, 10];
const SRAM_POWER: &[u32] = &[0, 5, 10];
const DDR_POWER: &[u32] = &[0, 200, 1000];
const USB_POWER: &[u32] = &[0, 5, 30];

const fn slave(
    node: NodeDesc,
    fsm: &'static SlaveFsm,
    initial_state: u8,
    wake: Option<WakeSource>,
) -> SlaveDesc {
    SlaveDesc {
        node,
        fsm,
        initial_state,
        wake,
    }
}

const fn sram(id: NodeId, name: &'static str, parent: NodeId, initial_state: u8) -> SlaveDesc {
    slave(
        NodeDesc::new(id, name).parent(parent).power(SRAM_POWER),
        &SRAM_FSM,
        initial_state,
        None,
    )
}

const fn generic(
    id: NodeId,
    name: &'static str,
    parent: NodeId,
    clocks: &'static [ClockId],
    initial_state: u8,
) -> SlaveDesc {
    slave(
        NodeDesc::new(id, name)
            .parent(parent)
            .clocks(clocks)
            .power(GENERIC_POWER),
        &GENERIC_FSM,
        initial_state,
        None,
    )
}

static SLAVES: [SlaveDesc; 23] = [
    sram(NODE_OCM_0, "ocm_0", NODE_LPD, 2),
    sram(NODE_OCM_1, "ocm_1", NODE_LPD, 2),
    sram(NODE_OCM_2, "ocm_2", NODE_LPD, 2),
    sram(NODE_OCM_3, "ocm_3", NODE_LPD, 2),
    sram(NODE_TCM_0_A, "tcm_0_a", NODE_RPU, 0),
    sram(NODE_TCM_0_B, "tcm_0_b", NODE_RPU, 0),
    sram(NODE_TCM_1_A, "tcm_1_a", NODE_RPU, 0),
    sram(NODE_TCM_1_B, "tcm_1_b", NODE_RPU, 0),
    generic(NODE_L2, "l2", NODE_APU, &[], 1),
    slave(
        NodeDesc::new(NODE_USB_0, "usb_0")
            .parent(NODE_LPD)
            .clocks(&[CLK_USB0_BUS_REF])
            .power(USB_POWER),
        &USB_FSM,
        0,
        Some(USB_0_WAKE),
    ),
    generic(NODE_TTC_0, "ttc_0", NODE_LPD, &[], 0),
    slave(
        NodeDesc::new(NODE_ETH_0, "eth_0")
            .parent(NODE_LPD)
            .clocks(&[CLK_GEM0_REF])
            .power(GENERIC_POWER),
        &GENERIC_FSM,
        0,
        Some(ETH_0_WAKE),
    ),
    generic(NODE_UART_0, "uart_0", NODE_LPD, &[CLK_UART0_REF], 1),
    slave(
        NodeDesc::new(NODE_UART_1, "uart_1")
            .parent(NODE_LPD)
            .clocks(&[CLK_UART1_REF])
            .power(GENERIC_POWER),
        &GENERIC_FSM,
        0,
        Some(UART_1_WAKE),
    ),
    generic(NODE_I2C_0, "i2c_0", NODE_LPD, &[CLK_I2C0_REF], 0),
    generic(NODE_SD_0, "sd_0", NODE_LPD, &[CLK_SDIO0_REF], 0),
    generic(NODE_SATA, "sata", NODE_FPD, &[CLK_SATA_REF], 0),
    generic(NODE_GDMA, "gdma", NODE_FPD, &[CLK_GDMA_REF], 0),
    generic(NODE_GPU, "gpu", NODE_FPD, &[CLK_GPU_REF], 0),
    slave(
        NodeDesc::new(NODE_DDR, "ddr")
            .parent(NODE_FPD)
            .clocks(&[CLK_DDR_REF])
            .power(DDR_POWER),
        &DDR_FSM,
        2,
        None,
    ),
    generic(NODE_PL, "pl", NODE_PLD, &[CLK_PL0_REF], 0),
    slave(
        NodeDesc::new(NODE_IPI_APU, "ipi_apu"),
        &ALWAYS_ON_FSM,
        0,
        None,
    ),
    slave(
        NodeDesc::new(NODE_IPI_RPU_0, "ipi_rpu_0"),
        &ALWAYS_ON_FSM,
        0,
        None,
    ),
];

const fn input(select: u32, clock: ClockId) -> MuxInput {
    MuxInput {
        select,
        clock: Some(clock),
    }
}

static ACPU_MUX: ClockMux = ClockMux {
    inputs: &[
        input(0, CLK_APLL),
        input(2, CLK_DPLL),
        input(3, CLK_VPLL),
    ],
    bits: 3,
    shift: 0,
};

static AVD_MUX: ClockMux = ClockMux {
    inputs: &[
        input(0, CLK_APLL),
        input(2, CLK_VPLL),
        input(3, CLK_DPLL),
    ],
    bits: 3,
    shift: 0,
};

static DV_MUX: ClockMux = ClockMux {
    inputs: &[
        input(0, CLK_DPLL),
        input(1, CLK_VPLL),
    ],
    bits: 3,
    shift: 0,
};

static IOAD_MUX: ClockMux = ClockMux {
    inputs: &[
        input(0, CLK_IOPLL_TO_FPD),
        input(2, CLK_APLL),
        input(3, CLK_DPLL),
    ],
    bits: 3,
    shift: 0,
};

static IOVD_MUX: ClockMux = ClockMux {
    inputs: &[
        input(0, CLK_IOPLL_TO_FPD),
        input(2, CLK_VPLL),
        input(3, CLK_DPLL),
    ],
    bits: 3,
    shift: 0,
};

static IORD_MUX: ClockMux = ClockMux {
    inputs: &[
        input(0, CLK_IOPLL),
        input(2, CLK_RPLL),
        input(3, CLK_DPLL_TO_LPD),
    ],
    bits: 3,
    shift: 0,
};

static RIOD_MUX: ClockMux = ClockMux {
    inputs: &[
        input(0, CLK_RPLL),
        input(2, CLK_IOPLL),
        input(3, CLK_DPLL_TO_LPD),
    ],
    bits: 3,
    shift: 0,
};

const fn pll(id: ClockId, name: &'static str, pll: u8) -> ClockDesc {
    ClockDesc {
        id,
        name,
        kind: ClockKind::Pll { pll },
    }
}

const fn bridge(id: ClockId, name: &'static str, parent: ClockId, ctrl: u32) -> ClockDesc {
    ClockDesc {
        id,
        name,
        kind: ClockKind::Bridge { parent, ctrl },
    }
}

const fn muxed(
    id: ClockId,
    name: &'static str,
    mux: &'static ClockMux,
    ctrl: u32,
    dividers: Dividers,
    gate: Option<u8>,
) -> ClockDesc {
    ClockDesc {
        id,
        name,
        kind: ClockKind::Generic {
            parent: None,
            mux: Some(mux),
            ctrl,
            dividers,
            gate,
            flags: ClockFlags::empty(),
        },
    }
}

/// An LPD peripheral reference clock.
const fn lpd_ref(id: ClockId, name: &'static str, offset: u32, gate: u8) -> ClockDesc {
    muxed(
        id,
        name,
        &IORD_MUX,
        CRL_APB_BASE + offset,
        Dividers::DIV0.union(Dividers::DIV1),
        Some(gate),
    )
}

static CLOCKS: [ClockDesc; 23] = [
    pll(CLK_IOPLL, "iopll", PLL_IOPLL),
    pll(CLK_RPLL, "rpll", PLL_RPLL),
    pll(CLK_APLL, "apll", PLL_APLL),
    pll(CLK_DPLL, "dpll", PLL_DPLL),
    pll(CLK_VPLL, "vpll", PLL_VPLL),
    bridge(CLK_IOPLL_TO_FPD, "iopll_to_fpd", CLK_IOPLL, CRL_APB_BASE + 0x44),
    bridge(CLK_RPLL_TO_FPD, "rpll_to_fpd", CLK_RPLL, CRL_APB_BASE + 0x48),
    bridge(CLK_APLL_TO_LPD, "apll_to_lpd", CLK_APLL, CRF_APB_BASE + 0x48),
    bridge(CLK_DPLL_TO_LPD, "dpll_to_lpd", CLK_DPLL, CRF_APB_BASE + 0x4C),
    bridge(CLK_VPLL_TO_LPD, "vpll_to_lpd", CLK_VPLL, CRF_APB_BASE + 0x50),
    muxed(
        CLK_ACPU,
        "acpu",
        &ACPU_MUX,
        CRF_APB_BASE + 0x60,
        Dividers::DIV0,
        Some(24),
    ),
    muxed(
        CLK_GDMA_REF,
        "gdma_ref",
        &AVD_MUX,
        CRF_APB_BASE + 0xB8,
        Dividers::DIV0,
        Some(24),
    ),
    ClockDesc {
        id: CLK_DDR_REF,
        name: "ddr_ref",
        kind: ClockKind::Generic {
            parent: None,
            mux: Some(&DV_MUX),
            ctrl: CRF_APB_BASE + 0x80,
            dividers: Dividers::DIV0,
            gate: None,
            flags: ClockFlags::SYSTEM,
        },
    },
    muxed(
        CLK_SATA_REF,
        "sata_ref",
        &IOAD_MUX,
        CRF_APB_BASE + 0xA0,
        Dividers::DIV0,
        Some(24),
    ),
    muxed(
        CLK_GPU_REF,
        "gpu_ref",
        &IOVD_MUX,
        CRF_APB_BASE + 0x84,
        Dividers::DIV0,
        Some(24),
    ),
    lpd_ref(CLK_USB0_BUS_REF, "usb0_bus_ref", 0x60, 25),
    muxed(
        CLK_CPU_R5,
        "cpu_r5",
        &RIOD_MUX,
        CRL_APB_BASE + 0x90,
        Dividers::DIV0,
        Some(24),
    ),
    lpd_ref(CLK_GEM0_REF, "gem0_ref", 0x50, 25),
    lpd_ref(CLK_SDIO0_REF, "sdio0_ref", 0x6C, 24),
    lpd_ref(CLK_UART0_REF, "uart0_ref", 0x74, 24),
    lpd_ref(CLK_UART1_REF, "uart1_ref", 0x78, 24),
    lpd_ref(CLK_I2C0_REF, "i2c0_ref", 0x120, 24),
    lpd_ref(CLK_PL0_REF, "pl0_ref", 0xC0, 24),
];

static MASTERS: [MasterDesc; 3] = [
    MasterDesc {
        id: NODE_APU,
        name: "APU",
        ipi_mask: IPI_APU,
        procs: &[NODE_APU_0, NODE_APU_1, NODE_APU_2, NODE_APU_3],
        mem_list: &[NODE_OCM_0, NODE_OCM_1, NODE_OCM_2, NODE_OCM_3, NODE_DDR],
        gic_proxy: true,
    },
    MasterDesc {
        id: NODE_RPU_0,
        name: "RPU0",
        ipi_mask: IPI_RPU_0,
        procs: &[NODE_RPU_0],
        mem_list: &[NODE_TCM_0_A, NODE_TCM_0_B],
        gic_proxy: false,
    },
    MasterDesc {
        id: NODE_RPU_1,
        name: "RPU1",
        ipi_mask: IPI_RPU_1,
        procs: &[NODE_RPU_1],
        mem_list: &[NODE_TCM_1_A, NODE_TCM_1_B],
        gic_proxy: false,
    },
];

static RESETS: [ResetDesc; 10] = [
    ResetDesc {
        id: RESET_GDMA,
        name: "gdma",
    },
    ResetDesc {
        id: RESET_GPU,
        name: "gpu",
    },
    ResetDesc {
        id: RESET_SATA,
        name: "sata",
    },
    ResetDesc {
        id: RESET_APU_L2,
        name: "apu_l2",
    },
    ResetDesc {
        id: RESET_DDR,
        name: "ddr",
    },
    ResetDesc {
        id: RESET_GEM0,
        name: "gem0",
    },
    ResetDesc {
        id: RESET_QSPI,
        name: "qspi",
    },
    ResetDesc {
        id: RESET_UART0,
        name: "uart0",
    },
    ResetDesc {
        id: RESET_UART1,
        name: "uart1",
    },
    ResetDesc {
        id: RESET_SDIO0,
        name: "sdio0",
    },
];

/// The ZynqMP topology.
pub static TOPOLOGY: Topology = Topology {
    processors: &PROCESSORS,
    power_nodes: &POWER_NODES,
    slaves: &SLAVES,
    clocks: &CLOCKS,
    masters: &MASTERS,
    resets: &RESETS,
    // DDR keeps its contents whatever the masters ask for.
    system_requirements: &[SystemRequirement {
        slave: NODE_DDR,
        caps: Capabilities::CONTEXT,
    }],
    oscillator_gate: &[NODE_FPD, NODE_PLD, NODE_RPU],
};

/// Size in bytes of the RAM log ring.
pub const LOG_BUFFER_SIZE: usize = 4096;

/// The firmware log sink.
///
/// Everything is kept in a RAM ring that a debugger can read back. Output is also copied to the
/// console UART until it is switched off with [`HybridSink::enable_secondary`], which must happen
/// before the domain holding the UART powers down.
pub type FirmwareLogSink<W> =
    HybridSink<LockedWriter<MemoryLogger<LOG_BUFFER_SIZE>>, LockedWriter<W>>;

/// Creates the firmware log sink with `uart` as the console.
///
/// Being `const`, this can initialise the `static` handed to [`crate::logger::init`].
pub const fn log_sink<W: Write>(uart: W) -> FirmwareLogSink<W> {
    HybridSink::new(LockedWriter::new(MemoryLogger::new()), LockedWriter::new(uart))
}

/// Runs `f` on the text currently held in the RAM log ring of `sink`.
pub fn with_ram_log<W: Write, R>(sink: &FirmwareLogSink<W>, f: impl FnOnce(&str) -> R) -> R {
    sink.primary().with_writer(|ring| f(ring.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogSink;

    #[test]
    fn log_sink_keeps_ram_copy_after_console_off() {
        let sink = log_sink(String::new());
        sink.write_fmt(format_args!("FPD on\n"));
        sink.enable_secondary(false);
        sink.write_fmt(format_args!("FPD off\n"));

        assert_eq!(
            "FPD on\nFPD off\n",
            with_ram_log(&sink, |text| text.to_owned())
        );
    }

    #[test]
    fn ram_log_wraps() {
        let sink = log_sink(String::new());
        sink.enable_secondary(false);
        for i in 0..LOG_BUFFER_SIZE {
            sink.write_fmt(format_args!("{}", i % 10));
        }
        sink.write_fmt(format_args!("end"));

        with_ram_log(&sink, |text| {
            assert_eq!(LOG_BUFFER_SIZE, text.len());
            assert!(text.ends_with("5end"));
        });
    }
}
