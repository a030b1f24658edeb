//! 65C02 fetch/decode/execute core.

use std::fmt;

use crate::bus::Bus;
use crate::flags::{Flags, MASK_D, MASK_I};

/// Addressing modes. `ZpRel` is the composite zero-page + relative mode used
/// by BBR/BBS: the zero-page operand is decoded here, the branch offset is
/// fetched by the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Imp,
    Imm,
    Acc,
    X,
    Y,
    Zp,
    ZpX,
    ZpY,
    ZpInd,
    ZpXInd,
    ZpIndY,
    Abs,
    AbsX,
    AbsY,
    Rel,
    ZpRel,
}

use Mode::{Abs, AbsX, AbsY, Acc, Imm, Imp, Rel, X, Y, Zp, ZpInd, ZpIndY, ZpRel, ZpX, ZpXInd, ZpY};

/// Addressing mode per opcode. Matches the subset the firmware's SoC core
/// decodes; slots the part treats as reserved are `Imp` and rejected by the
/// executor.
#[rustfmt::skip]
const MODES: [Mode; 256] = [
    // 0x00: BRK   ORA    ---  ---  TSB  ORA  ASL  RMB0   PHP  ORA  ASL  ---  TSB  ORA  ASL  BBR0
    Imp, ZpXInd, Imp, Imp, Zp,  Zp,  Zp,  Zp,  Imp, Imm, Acc, Imp, Abs, Abs, Abs, ZpRel,
    // 0x10: BPL   ORA    ORA  ---  TRB  ORA  ASL  RMB1   CLC  ORA  INC  ---  TRB  ORA  ASL  BBR1
    Rel, ZpIndY, ZpInd, Imp, Zp,  ZpX, ZpX, Zp,  Imp, AbsY, Acc, Imp, Abs, AbsX, AbsX, ZpRel,
    // 0x20: JSR   AND    ---  ---  BIT  AND  ROL  RMB2   PLP  AND  ROL  ---  BIT  AND  ROL  BBR2
    Imm, ZpXInd, Imp, Imp, Zp,  Zp,  Zp,  Zp,  Imp, Imm, Acc, Imp, Abs, Abs, Abs, ZpRel,
    // 0x30: BMI   AND    AND  ---  BIT  AND  ROL  RMB3   SEC  AND  DEC  ---  BIT  AND  ROL  BBR3
    Rel, ZpIndY, ZpInd, Imp, Zp,  ZpX, ZpX, Zp,  Imp, AbsY, Acc, Imp, AbsX, AbsX, AbsX, ZpRel,
    // 0x40: RTI   EOR    ---  ---  ---  EOR  LSR  RMB4   PHA  EOR  LSR  ---  JMP  EOR  LSR  BBR4
    Imp, ZpXInd, Imp, Imp, Imp, Zp,  Zp,  Zp,  Acc, Imm, Acc, Imp, Imm, Abs, Abs, ZpRel,
    // 0x50: BVC   EOR    EOR  ---  ---  EOR  LSR  RMB5   CLI  EOR  PHY  ---  ---  EOR  LSR  BBR5
    Rel, ZpIndY, ZpInd, Imp, Imp, ZpX, ZpX, Zp,  Imp, AbsY, Y,   Imp, Imp, AbsX, AbsX, ZpRel,
    // 0x60: RTS   ADC    ---  ---  STZ  ADC  ROR  RMB6   PLA  ADC  ROR  ---  JMP  ADC  ROR  BBR6
    Imp, ZpXInd, Imp, Imp, Zp,  Zp,  Zp,  Zp,  Acc, Imm, Acc, Imp, Abs, Abs, Abs, ZpRel,
    // 0x70: BVS   ADC    ADC  ---  STZ  ADC  ROR  RMB7   SEI  ADC  PLY  ---  JMP  ADC  ROR  BBR7
    Rel, ZpIndY, ZpInd, Imp, ZpX, ZpX, ZpX, Zp,  Imp, AbsY, Y,   Imp, AbsX, AbsX, AbsX, ZpRel,
    // 0x80: BRA   STA    ---  ---  STY  STA  STX  SMB0   DEY  BIT  TXA  ---  STY  STA  STX  BBS0
    Rel, ZpXInd, Imp, Imp, Zp,  Zp,  Zp,  Zp,  Y,   Imm, Imp, Imp, Abs, Abs, Abs, ZpRel,
    // 0x90: BCC   STA    STA  ---  STY  STA  STX  SMB1   TYA  STA  TXS  ---  STZ  STA  STZ  BBS1
    Rel, ZpIndY, ZpInd, Imp, ZpX, ZpX, ZpY, Zp,  Imp, AbsY, Imp, Imp, Abs, AbsX, AbsX, ZpRel,
    // 0xA0: LDY   LDA    LDX  ---  LDY  LDA  LDX  SMB2   TAY  LDA  TAX  ---  LDY  LDA  LDX  BBS2
    Imm, ZpXInd, Imm, Imp, Zp,  Zp,  Zp,  Zp,  Imp, Imm, Imp, Imp, Abs, Abs, Abs, ZpRel,
    // 0xB0: BCS   LDA    LDA  ---  LDY  LDA  LDX  SMB3   CLV  LDA  TSX  ---  LDY  LDA  LDX  BBS3
    Rel, ZpIndY, ZpInd, Imp, ZpX, ZpX, ZpY, Zp,  Imp, AbsY, Imp, Imp, AbsX, AbsX, AbsY, ZpRel,
    // 0xC0: CPY   CMP    ---  ---  CPY  CMP  DEC  SMB4   INY  CMP  DEX  WAI  CPY  CMP  DEC  BBS4
    Imm, ZpXInd, Imp, Imp, Zp,  Zp,  Zp,  Zp,  Y,   Imm, X,   Imp, Abs, Abs, Abs, ZpRel,
    // 0xD0: BNE   CMP    CMP  ---  ---  CMP  DEC  SMB5   CLD  CMP  PHX  STP  ---  CMP  DEC  BBS5
    Rel, ZpIndY, ZpInd, Imp, Imp, ZpX, ZpX, Zp,  Imp, AbsY, X,   Imp, Imp, AbsX, AbsX, ZpRel,
    // 0xE0: CPX   SBC    ---  ---  CPX  SBC  INC  SMB6   INX  SBC  NOP  ---  CPX  SBC  INC  BBS6
    Imm, ZpXInd, Imp, Imp, Zp,  Zp,  Zp,  Zp,  X,   Imm, Imp, Imp, Abs, Abs, Abs, ZpRel,
    // 0xF0: BEQ   SBC    SBC  ---  ---  SBC  INC  SMB7   SED  SBC  PLX  ---  ---  SBC  INC  BBS7
    Rel, ZpIndY, ZpInd, Imp, Imp, ZpX, ZpX, Zp,  Imp, AbsY, X,   Imp, Imp, AbsX, AbsX, ZpRel,
];

/// Decoded operand location.
#[derive(Debug, Clone, Copy)]
enum Operand {
    None,
    Imm(u8),
    Acc,
    X,
    Y,
    Mem(u16),
}

/// How an instruction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Normal completion.
    Normal,
    /// `WAI` executed: the CPU is waiting for an interrupt and control
    /// should return to the scheduler.
    Wai,
}

/// Fatal CPU condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuError {
    /// An opcode outside the supported set was fetched. This covers the
    /// reserved slots as well as `BRK` and `STP`, neither of which the
    /// firmware ever executes.
    IllegalOpcode { opcode: u8, pc: u16 },
}

impl fmt::Display for CpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalOpcode { opcode, pc } => {
                write!(f, "undefined opcode {opcode:#04x} at {pc:#06x}")
            }
        }
    }
}

impl std::error::Error for CpuError {}

/// The 65C02 CPU state.
#[derive(Debug, Clone)]
pub struct Cpu {
    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    /// Decomposed N/V/Z/C.
    pub flags: Flags,
    /// The I/D/B and unused bits of P, packed. The NVZC bits in here are
    /// stale and masked out whenever the register is assembled.
    residue: u8,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    /// Create a CPU in the all-zero power-on state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pc: 0,
            a: 0,
            x: 0,
            y: 0,
            sp: 0,
            flags: Flags::unpack(0),
            residue: 0,
        }
    }

    /// The packed P register.
    #[must_use]
    pub fn p(&self) -> u8 {
        self.flags.pack(self.residue)
    }

    /// Replace the packed P register.
    pub fn set_p(&mut self, value: u8) {
        self.residue = value;
        self.flags = Flags::unpack(value);
    }

    /// Execute one instruction.
    ///
    /// # Errors
    ///
    /// Returns [`CpuError::IllegalOpcode`] when the fetched opcode is not
    /// part of the supported set.
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> Result<Step, CpuError> {
        let op_pc = self.pc;
        let op = self.fetch(bus);
        let operand = self.decode(bus, MODES[op as usize]);

        match op {
            // Branches
            0x10 => self.branch(self.flags.n >= 0, operand),
            0x30 => self.branch(self.flags.n < 0, operand),
            0x50 => self.branch(self.flags.v >= 0, operand),
            0x70 => self.branch(self.flags.v < 0, operand),
            0x80 => self.branch(true, operand),
            0x90 => self.branch(!self.flags.carry(), operand),
            0xB0 => self.branch(self.flags.carry(), operand),
            0xD0 => self.branch(self.flags.z != 0, operand),
            0xF0 => self.branch(self.flags.z == 0, operand),

            // BBRn / BBSn: branch on a zero-page bit
            0x0F | 0x1F | 0x2F | 0x3F | 0x4F | 0x5F | 0x6F | 0x7F | 0x8F | 0x9F | 0xAF | 0xBF
            | 0xCF | 0xDF | 0xEF | 0xFF => {
                let bit = (self.load(bus, operand) >> ((op >> 4) & 7)) & 1;
                let offset = self.fetch(bus);
                self.branch_offset(bit == op >> 7, offset);
            }

            // RMBn / SMBn
            0x07 | 0x17 | 0x27 | 0x37 | 0x47 | 0x57 | 0x67 | 0x77 => {
                let t = self.load(bus, operand) & !(1 << ((op >> 4) & 7));
                self.store(bus, operand, t);
            }
            0x87 | 0x97 | 0xA7 | 0xB7 | 0xC7 | 0xD7 | 0xE7 | 0xF7 => {
                let t = self.load(bus, operand) | 1 << ((op >> 4) & 7);
                self.store(bus, operand, t);
            }

            // Flag operations
            0x18 => self.flags.c = 0,
            0x38 => self.flags.c = 0x100,
            0x58 => self.residue &= !MASK_I,
            0x78 => self.residue |= MASK_I,
            0xB8 => self.flags.v = 0,
            0xD8 => self.residue &= !MASK_D,
            0xF8 => self.residue |= MASK_D,

            // ASL
            0x06 | 0x0A | 0x0E | 0x16 | 0x1E => {
                let t = u16::from(self.load(bus, operand)) << 1;
                self.flags.set_zn(t as u8);
                self.flags.c = t;
                self.store(bus, operand, t as u8);
            }

            // ROL
            0x26 | 0x2A | 0x2E | 0x36 | 0x3E => {
                let t = u16::from(self.load(bus, operand)) << 1 | self.flags.carry_in();
                self.flags.set_zn(t as u8);
                self.flags.c = t;
                self.store(bus, operand, t as u8);
            }

            // LSR
            0x46 | 0x4A | 0x4E | 0x56 | 0x5E => {
                let v = self.load(bus, operand);
                self.flags.c = u16::from(v & 1) << 8;
                let t = v >> 1;
                self.flags.set_zn(t);
                self.store(bus, operand, t);
            }

            // ROR
            0x66 | 0x6A | 0x6E | 0x76 | 0x7E => {
                let t = u16::from(self.load(bus, operand)) | (self.flags.c & 0x100);
                self.flags.c = (t & 1) << 8;
                let t = (t >> 1) as u8;
                self.flags.set_zn(t);
                self.store(bus, operand, t);
            }

            // BIT (immediate included: the core updates N and V there too)
            0x24 | 0x2C | 0x34 | 0x3C | 0x89 => {
                let v = self.load(bus, operand);
                self.flags.z = v & self.a;
                self.flags.n = v as i8;
                self.flags.v = (v << 1) as i8;
            }

            // TSB / TRB
            0x04 | 0x0C => {
                let v = self.load(bus, operand);
                self.flags.z = v & self.a;
                self.store(bus, operand, v | self.a);
            }
            0x14 | 0x1C => {
                let v = self.load(bus, operand);
                self.flags.z = v & self.a;
                self.store(bus, operand, v & !self.a);
            }

            // INC / DEC (memory, accumulator, X, Y)
            0x1A | 0xC8 | 0xE6 | 0xE8 | 0xEE | 0xF6 | 0xFE => {
                let t = self.load(bus, operand).wrapping_add(1);
                self.flags.set_zn(t);
                self.store(bus, operand, t);
            }
            0x3A | 0x88 | 0xC6 | 0xCA | 0xCE | 0xD6 | 0xDE => {
                let t = self.load(bus, operand).wrapping_sub(1);
                self.flags.set_zn(t);
                self.store(bus, operand, t);
            }

            // ORA / AND / EOR
            0x01 | 0x05 | 0x09 | 0x0D | 0x11 | 0x12 | 0x15 | 0x19 | 0x1D => {
                self.a |= self.load(bus, operand);
                self.flags.set_zn(self.a);
            }
            0x21 | 0x25 | 0x29 | 0x2D | 0x31 | 0x32 | 0x35 | 0x39 | 0x3D => {
                self.a &= self.load(bus, operand);
                self.flags.set_zn(self.a);
            }
            0x41 | 0x45 | 0x49 | 0x4D | 0x51 | 0x52 | 0x55 | 0x59 | 0x5D => {
                self.a ^= self.load(bus, operand);
                self.flags.set_zn(self.a);
            }

            // ADC / SBC
            0x61 | 0x65 | 0x69 | 0x6D | 0x71 | 0x72 | 0x75 | 0x79 | 0x7D => {
                let v = self.load(bus, operand);
                self.add_with_carry(v, false);
            }
            0xE1 | 0xE5 | 0xE9 | 0xED | 0xF1 | 0xF2 | 0xF5 | 0xF9 | 0xFD => {
                let v = self.load(bus, operand);
                self.add_with_carry(v, true);
            }

            // Stores
            0x64 | 0x74 | 0x9C | 0x9E => self.store(bus, operand, 0),
            0x84 | 0x8C | 0x94 => self.store(bus, operand, self.y),
            0x86 | 0x8E | 0x96 => self.store(bus, operand, self.x),
            0x81 | 0x85 | 0x8D | 0x91 | 0x92 | 0x95 | 0x99 | 0x9D => {
                self.store(bus, operand, self.a);
            }

            // Loads
            0xA1 | 0xA5 | 0xA9 | 0xAD | 0xB1 | 0xB2 | 0xB5 | 0xB9 | 0xBD => {
                self.a = self.load(bus, operand);
                self.flags.set_zn(self.a);
            }
            0xA2 | 0xA6 | 0xAE | 0xB6 | 0xBE => {
                self.x = self.load(bus, operand);
                self.flags.set_zn(self.x);
            }
            0xA0 | 0xA4 | 0xAC | 0xB4 | 0xBC => {
                self.y = self.load(bus, operand);
                self.flags.set_zn(self.y);
            }

            // Compares
            0xC1 | 0xC5 | 0xC9 | 0xCD | 0xD1 | 0xD2 | 0xD5 | 0xD9 | 0xDD => {
                let v = self.load(bus, operand);
                self.compare(self.a, v);
            }
            0xE0 | 0xE4 | 0xEC => {
                let v = self.load(bus, operand);
                self.compare(self.x, v);
            }
            0xC0 | 0xC4 | 0xCC => {
                let v = self.load(bus, operand);
                self.compare(self.y, v);
            }

            // Transfers
            0x8A => {
                self.a = self.x;
                self.flags.set_zn(self.a);
            }
            0x98 => {
                self.a = self.y;
                self.flags.set_zn(self.a);
            }
            0xA8 => {
                self.y = self.a;
                self.flags.set_zn(self.y);
            }
            0xAA => {
                self.x = self.a;
                self.flags.set_zn(self.x);
            }
            0xBA => {
                self.x = self.sp;
                self.flags.set_zn(self.x);
            }
            0x9A => self.sp = self.x,

            // Stack
            0x08 => {
                let p = self.p();
                self.push(bus, p);
            }
            0x28 => {
                let p = self.pull(bus);
                self.set_p(p);
            }
            0x48 | 0x5A | 0xDA => {
                let v = self.load(bus, operand);
                self.push(bus, v);
            }
            // PLA/PLX/PLY leave the flags alone, as the SoC core does.
            0x68 | 0x7A | 0xFA => {
                let v = self.pull(bus);
                self.store(bus, operand, v);
            }

            // Jumps and returns
            0x4C => {
                let lo = self.load(bus, operand);
                let hi = self.fetch(bus);
                self.pc = u16::from_le_bytes([lo, hi]);
            }
            0x6C | 0x7C => {
                let Operand::Mem(addr) = operand else {
                    unreachable!("indirect JMP decodes to a memory operand");
                };
                let lo = bus.read(addr);
                let hi = bus.peek(addr.wrapping_add(1));
                self.pc = u16::from_le_bytes([lo, hi]);
            }
            0x20 => {
                let lo = self.load(bus, operand);
                self.push(bus, (self.pc >> 8) as u8);
                self.push(bus, self.pc as u8);
                let hi = self.fetch(bus);
                self.pc = u16::from_le_bytes([lo, hi]);
            }
            0x60 => {
                let lo = self.pull(bus);
                let hi = self.pull(bus);
                self.pc = u16::from_le_bytes([lo, hi]).wrapping_add(1);
            }
            0x40 => {
                let p = self.pull(bus);
                self.set_p(p);
                let lo = self.pull(bus);
                let hi = self.pull(bus);
                self.pc = u16::from_le_bytes([lo, hi]);
            }

            0xEA => {}

            0xCB => return Ok(Step::Wai),

            // Reserved slots, BRK and STP
            _ => return Err(CpuError::IllegalOpcode { opcode: op, pc: op_pc }),
        }

        Ok(Step::Normal)
    }

    // -----------------------------------------------------------------------
    // Decode helpers
    // -----------------------------------------------------------------------

    fn fetch<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let value = bus.peek(self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn fetch_word<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.fetch(bus);
        let hi = self.fetch(bus);
        u16::from_le_bytes([lo, hi])
    }

    /// Read a pointer from the zero page, wrapping within it.
    fn zp_ptr<B: Bus>(&mut self, bus: &mut B, zp: u8) -> u16 {
        let lo = bus.peek(u16::from(zp));
        let hi = bus.peek(u16::from(zp.wrapping_add(1)));
        u16::from_le_bytes([lo, hi])
    }

    fn decode<B: Bus>(&mut self, bus: &mut B, mode: Mode) -> Operand {
        match mode {
            Imp => Operand::None,
            Imm | Rel => Operand::Imm(self.fetch(bus)),
            Acc => Operand::Acc,
            X => Operand::X,
            Y => Operand::Y,
            Zp | ZpRel => Operand::Mem(u16::from(self.fetch(bus))),
            ZpX => {
                let zp = self.fetch(bus).wrapping_add(self.x);
                Operand::Mem(u16::from(zp))
            }
            ZpY => {
                let zp = self.fetch(bus).wrapping_add(self.y);
                Operand::Mem(u16::from(zp))
            }
            ZpInd => {
                let zp = self.fetch(bus);
                Operand::Mem(self.zp_ptr(bus, zp))
            }
            ZpXInd => {
                let zp = self.fetch(bus).wrapping_add(self.x);
                Operand::Mem(self.zp_ptr(bus, zp))
            }
            ZpIndY => {
                let zp = self.fetch(bus);
                let base = self.zp_ptr(bus, zp);
                Operand::Mem(base.wrapping_add(u16::from(self.y)))
            }
            Abs => Operand::Mem(self.fetch_word(bus)),
            AbsX => {
                let base = self.fetch_word(bus);
                Operand::Mem(base.wrapping_add(u16::from(self.x)))
            }
            AbsY => {
                let base = self.fetch_word(bus);
                Operand::Mem(base.wrapping_add(u16::from(self.y)))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Execute helpers
    // -----------------------------------------------------------------------

    fn load<B: Bus>(&mut self, bus: &mut B, operand: Operand) -> u8 {
        match operand {
            Operand::Imm(value) => value,
            Operand::Acc => self.a,
            Operand::X => self.x,
            Operand::Y => self.y,
            Operand::Mem(addr) => bus.read(addr),
            Operand::None => unreachable!("operand-less opcode tried to load"),
        }
    }

    fn store<B: Bus>(&mut self, bus: &mut B, operand: Operand, value: u8) {
        match operand {
            Operand::Acc => self.a = value,
            Operand::X => self.x = value,
            Operand::Y => self.y = value,
            Operand::Mem(addr) => bus.write(addr, value),
            Operand::Imm(_) | Operand::None => {
                unreachable!("operand-less opcode tried to store")
            }
        }
    }

    fn push<B: Bus>(&mut self, bus: &mut B, value: u8) {
        bus.poke(0x100 | u16::from(self.sp), value);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pull<B: Bus>(&mut self, bus: &mut B) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        bus.peek(0x100 | u16::from(self.sp))
    }

    fn branch(&mut self, cond: bool, operand: Operand) {
        let Operand::Imm(offset) = operand else {
            unreachable!("branch decodes to an immediate offset");
        };
        self.branch_offset(cond, offset);
    }

    fn branch_offset(&mut self, cond: bool, offset: u8) {
        if cond {
            self.pc = self.pc.wrapping_add(offset as i8 as u16);
        }
    }

    fn compare(&mut self, reg: u8, value: u8) {
        let t = reg.wrapping_sub(value);
        self.flags.set_zn(t);
        self.flags.c = (0x100 + i32::from(reg) - i32::from(value)) as u16;
    }

    /// ADC, or SBC when `subtract` (operand complemented going in).
    ///
    /// Decimal mode follows the CMOS core: N, V and Z reflect the adjusted
    /// BCD result, and the nibble fix-ups happen in the same order the
    /// silicon applies them.
    fn add_with_carry(&mut self, value: u8, subtract: bool) {
        let t = if subtract { !value } else { value };
        let a = self.a;
        let d = a ^ t;
        let result = if self.residue & MASK_D != 0 {
            let mut lo =
                i32::from(a & 0x0F) + i32::from(t & 0x0F) + i32::from(self.flags.carry_in());
            if subtract {
                if lo < 16 {
                    lo -= 6;
                }
            } else if lo >= 10 {
                lo += 6;
            }
            let mut b = i32::from(a & 0xF0)
                + i32::from(t & 0xF0)
                + if lo >= 16 { 16 } else { 0 }
                + (lo & 15);
            self.flags.v = ((b as u8 ^ a) & !d) as i8;
            if subtract {
                self.flags.c = b as u16;
                if b < 0x100 {
                    b -= 0x60;
                }
            } else {
                if b >= 0xA0 {
                    b += 0x60;
                }
                self.flags.c = b as u16;
            }
            b as u8
        } else {
            let sum = u16::from(t) + u16::from(a) + self.flags.carry_in();
            self.flags.v = ((sum as u8 ^ a) & !d) as i8;
            self.flags.c = sum;
            sum as u8
        };
        self.a = result;
        self.flags.set_zn(result);
    }
}
