//! WDC 65C02 CPU emulator.
//!
//! Per-instruction interpreter for the CMOS 65C02 as found in small
//! microcontroller SoCs: the full documented base set plus the Rockwell/WDC
//! extensions (BBR/BBS, RMB/SMB, TSB/TRB, STZ, BRA, PHX/PHY/PLX/PLY, WAI).
//! `BRK`, `STP` and the reserved opcode slots are reported as errors rather
//! than executed.
//!
//! The CPU is generic over a [`Bus`]. Data accesses go through
//! `Bus::read`/`Bus::write`, which is where a machine hangs its memory-mapped
//! I/O; instruction fetches, zero-page pointer fetches and stack traffic use
//! `Bus::peek`/`Bus::poke` and must be free of side effects.

mod bus;
mod cpu;
mod flags;

pub use bus::{Bus, FlatBus};
pub use cpu::{Cpu, CpuError, Step};
pub use flags::Flags;
