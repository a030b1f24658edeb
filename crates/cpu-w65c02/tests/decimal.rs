//! Decimal-mode ADC/SBC behavior.
//!
//! The CMOS core differs from the NMOS 6502 here: N, V and Z are computed
//! from the adjusted BCD result, not the intermediate binary sum.

use cpu_w65c02::{Cpu, FlatBus};

/// Run a single decimal ADC: returns (result, packed P).
fn adc(a: u8, operand: u8, carry: bool) -> (u8, u8) {
    let mut bus = FlatBus::new();
    // SED; CLC/SEC; LDA #a; ADC #operand
    bus.load(
        0x0200,
        &[0xF8, if carry { 0x38 } else { 0x18 }, 0xA9, a, 0x69, operand],
    );
    let mut cpu = Cpu::new();
    cpu.pc = 0x0200;
    cpu.sp = 0xFF;
    for _ in 0..4 {
        cpu.step(&mut bus).expect("step failed");
    }
    (cpu.a, cpu.p())
}

/// Run a single decimal SBC: returns (result, packed P).
fn sbc(a: u8, operand: u8, carry: bool) -> (u8, u8) {
    let mut bus = FlatBus::new();
    bus.load(
        0x0200,
        &[0xF8, if carry { 0x38 } else { 0x18 }, 0xA9, a, 0xE9, operand],
    );
    let mut cpu = Cpu::new();
    cpu.pc = 0x0200;
    cpu.sp = 0xFF;
    for _ in 0..4 {
        cpu.step(&mut bus).expect("step failed");
    }
    (cpu.a, cpu.p())
}

const C: u8 = 0x01;
const Z: u8 = 0x02;
const N: u8 = 0x80;

#[test]
fn adc_simple_bcd() {
    let (a, p) = adc(0x09, 0x01, false);
    assert_eq!(a, 0x10);
    assert_eq!(p & C, 0);
    assert_eq!(p & Z, 0);
}

#[test]
fn adc_carries_out_of_99() {
    let (a, p) = adc(0x99, 0x01, false);
    assert_eq!(a, 0x00);
    assert_ne!(p & C, 0);
    // CMOS: Z reflects the adjusted result.
    assert_ne!(p & Z, 0);
    assert_eq!(p & N, 0);
}

#[test]
fn adc_uses_carry_in() {
    let (a, _) = adc(0x58, 0x46, true);
    assert_eq!(a, 0x05);
}

#[test]
fn adc_negative_reflects_adjusted_result() {
    let (a, p) = adc(0x75, 0x15, false);
    assert_eq!(a, 0x90);
    assert_ne!(p & N, 0);
}

#[test]
fn sbc_simple_bcd() {
    let (a, p) = sbc(0x10, 0x01, true);
    assert_eq!(a, 0x09);
    assert_ne!(p & C, 0);
}

#[test]
fn sbc_borrows_below_zero() {
    let (a, p) = sbc(0x00, 0x01, true);
    assert_eq!(a, 0x99);
    assert_eq!(p & C, 0);
    assert_ne!(p & N, 0);
}

#[test]
fn sbc_chained_borrow() {
    let (a, p) = sbc(0x20, 0x01, false);
    // 20 - 01 - 1 = 18
    assert_eq!(a, 0x18);
    assert_ne!(p & C, 0);
}

#[test]
fn sbc_zero_result_sets_z() {
    let (a, p) = sbc(0x42, 0x42, true);
    assert_eq!(a, 0x00);
    assert_ne!(p & Z, 0);
    assert_ne!(p & C, 0);
}

#[test]
fn binary_mode_unaffected() {
    // CLD path: plain binary add with overflow
    let mut bus = FlatBus::new();
    bus.load(0x0200, &[0xD8, 0x18, 0xA9, 0x50, 0x69, 0x50]);
    let mut cpu = Cpu::new();
    cpu.pc = 0x0200;
    cpu.sp = 0xFF;
    for _ in 0..4 {
        cpu.step(&mut bus).expect("step failed");
    }
    assert_eq!(cpu.a, 0xA0);
    assert_ne!(cpu.p() & 0x40, 0); // V
    assert_ne!(cpu.p() & N, 0);
    assert_eq!(cpu.p() & C, 0);
}
