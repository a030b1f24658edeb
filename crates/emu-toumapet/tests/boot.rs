//! End-to-end scenarios on synthesized cartridge images.
//!
//! Each test assembles a tiny 4 MiB OK-550 image: magic at 0x23, a
//! cold-start frame, a periodic-tick frame, and optionally a resource
//! table with encoded images. The frames hold hand-assembled 65C02 code.

use emu_toumapet::{
    EmuError, NullHost, Rom, SessionState, Toumapet, KEY_POWER_OFF, KEY_WAI,
};

const COLD_ADDR: usize = 0x1000;
const TICK_ADDR: usize = 0x2000;
const TABLE_ADDR: usize = 0x3000;

fn write16(data: &mut [u8], offs: usize, value: u16) {
    data[offs..offs + 2].copy_from_slice(&value.to_le_bytes());
}

fn write24(data: &mut [u8], offs: usize, value: u32) {
    data[offs] = value as u8;
    data[offs + 1] = (value >> 8) as u8;
    data[offs + 2] = (value >> 16) as u8;
}

/// Frame size field: 16-bit word count, rounded up.
fn words(code: &[u8]) -> u16 {
    ((code.len() + 1) / 2) as u16
}

/// Assemble a 4 MiB image with the given frames and image resources.
fn build_image(cold: &[u8], tick: &[u8], images: &[Vec<u8>]) -> Vec<u8> {
    let mut data = vec![0u8; 4 << 20];
    data[0x23..0x27].copy_from_slice(b"tony");
    write24(&mut data, 0, TABLE_ADDR as u32);
    write16(&mut data, 3, COLD_ADDR as u16);
    write16(&mut data, 5, words(cold));
    write16(&mut data, 0x1B, TICK_ADDR as u16);
    write16(&mut data, 0x1D, words(tick));
    data[COLD_ADDR..COLD_ADDR + cold.len()].copy_from_slice(cold);
    data[TICK_ADDR..TICK_ADDR + tick.len()].copy_from_slice(tick);

    let mut offs = TABLE_ADDR + images.len() * 3;
    for (i, image) in images.iter().enumerate() {
        write24(&mut data, TABLE_ADDR + i * 3, offs as u32);
        data[offs..offs + image.len()].copy_from_slice(image);
        offs += image.len();
    }
    data
}

fn make_pet(cold: &[u8], tick: &[u8]) -> Toumapet {
    let data = build_image(cold, tick, &[]);
    Toumapet::new(Rom::new(data).expect("rom"))
}

/// Encode a flat-color image in the RLE scanline format.
fn solid_image(w: u8, h: u8, color: u8) -> Vec<u8> {
    let mut out = vec![w, 0x00, h, 0x80];
    for _ in 0..h {
        out.extend_from_slice(&7u16.to_le_bytes());
        out.extend_from_slice(&[0x00, color, w, 0, 0]);
    }
    out
}

const RTS: u8 = 0x60;

#[test]
fn cold_boot_seeds_state_and_unwinds() {
    let mut pet = make_pet(&[RTS], &[RTS]);
    pet.boot(&mut NullHost).expect("boot");
    assert_eq!(pet.memory()[0x99], 0); // key byte
    assert_eq!(pet.memory()[0xA3] & 1, 1); // start-animation flag
    assert_eq!(pet.frame_depth(), 0);
    assert_eq!(pet.session_state(), SessionState::Running);
}

#[test]
fn cold_boot_of_obfuscated_rom_exposes_key() {
    let key = 0x5Au8;
    let mut data = build_image(&[RTS], &[RTS], &[]);
    for byte in &mut data {
        *byte ^= key;
    }
    let mut pet = Toumapet::new(Rom::new(data).expect("rom"));
    pet.boot(&mut NullHost).expect("boot");
    assert_eq!(pet.memory()[0x99], key);
}

#[test]
fn power_off_write_yields_the_interpreter() {
    // STZ $00: power the unit down mid-frame.
    let mut pet = make_pet(&[RTS], &[0x64, 0x00, RTS]);
    pet.run_frame(&mut NullHost).expect("frame");
    assert!(pet.keys().contains(KEY_POWER_OFF));
    assert_eq!(pet.session_state(), SessionState::PowerOff);
    // The RTS after the store never ran: the frame is still live.
    assert_eq!(pet.frame_depth(), 1);
}

#[test]
fn wai_skips_the_next_tick_entry() {
    // INC $40; WAI; RTS
    let tick = [0xE6, 0x40, 0xCB, RTS];
    let mut pet = make_pet(&[RTS], &tick);
    pet.memory_mut()[0x181] = 5;

    pet.run_frame(&mut NullHost).expect("frame 1");
    assert!(pet.keys().contains(KEY_WAI));
    assert_eq!(pet.memory()[0x40], 1);
    assert_eq!(pet.frame_depth(), 1);
    // The live overlay mirrors the tick frame's ROM bytes.
    assert_eq!(&pet.memory()[0x300..0x300 + tick.len()], &tick);

    // Waking frame: no re-entry, so the counter must not advance, but the
    // idle timer still ticks down.
    pet.run_frame(&mut NullHost).expect("frame 2");
    assert!(!pet.keys().contains(KEY_WAI));
    assert_eq!(pet.memory()[0x40], 1);
    assert_eq!(pet.frame_depth(), 0);
    assert_eq!(pet.memory()[0x181], 3);

    // Back to normal scheduling.
    pet.run_frame(&mut NullHost).expect("frame 3");
    assert_eq!(pet.memory()[0x40], 2);
}

#[test]
fn idle_timer_decrements_once_per_frame_and_stops_at_zero() {
    let mut pet = make_pet(&[RTS], &[RTS]);
    pet.boot(&mut NullHost).expect("boot");
    pet.memory_mut()[0x181] = 2;
    pet.run_frame(&mut NullHost).expect("frame");
    assert_eq!(pet.memory()[0x181], 1);
    pet.run_frame(&mut NullHost).expect("frame");
    pet.run_frame(&mut NullHost).expect("frame");
    assert_eq!(pet.memory()[0x181], 0);
}

/// LDA #value; STA $02
fn emit_flash_write(code: &mut Vec<u8>, value: u8) {
    code.extend_from_slice(&[0xA9, value, 0x85, 0x02]);
}

/// Bit-bang one byte MSB-first, two clock phases per bit.
fn emit_flash_byte(code: &mut Vec<u8>, byte: u8) {
    for bit in (0..8).rev() {
        let d = (byte >> bit & 1) << 2;
        emit_flash_write(code, d | 2);
        emit_flash_write(code, d | 3);
    }
}

#[test]
fn flash_page_program_reaches_the_save_region() {
    // Cold frame: select, write-enable, deselect.
    let mut cold = vec![0x64, 0x12]; // STZ $12
    emit_flash_write(&mut cold, 0x00);
    emit_flash_byte(&mut cold, 0x06);
    cold.extend_from_slice(&[0xA9, 0x01, 0x85, 0x12]); // deselect
    cold.push(RTS);

    // Tick frame: page program two bytes at the start of the save region
    // (0x3f0000 on a 4 MiB part), then deselect.
    let mut tick = vec![0x64, 0x12];
    emit_flash_write(&mut tick, 0x00);
    emit_flash_byte(&mut tick, 0x02);
    emit_flash_byte(&mut tick, 0x3F);
    emit_flash_byte(&mut tick, 0x00);
    emit_flash_byte(&mut tick, 0x00);
    emit_flash_byte(&mut tick, 0x12);
    emit_flash_byte(&mut tick, 0x34);
    tick.extend_from_slice(&[0xA9, 0x01, 0x85, 0x12]);
    tick.push(RTS);

    let mut pet = make_pet(&cold, &tick);
    pet.run_frame(&mut NullHost).expect("frame");
    assert_eq!(pet.rom().save_region()[0], 0x12);
    assert_eq!(pet.rom().save_region()[1], 0x34);
    assert_eq!(pet.rom().save_region()[2], 0x00);
}

/// Set up the intersect syscall's argument block and invoke it; the result
/// lands in $50.
fn intersect_code(x2: u8) -> Vec<u8> {
    let mut code = Vec::new();
    let store = |code: &mut Vec<u8>, addr: u8, value: u8| {
        code.extend_from_slice(&[0xA9, value, 0x8D, addr, 0x01]);
    };
    store(&mut code, 0x00, 10); // x1
    store(&mut code, 0x01, 20); // y1
    store(&mut code, 0x02, 0); // id1 lo
    store(&mut code, 0x03, 0); // id1 hi
    store(&mut code, 0x05, x2);
    store(&mut code, 0x06, 20); // y2
    store(&mut code, 0x07, 1); // id2 lo
    store(&mut code, 0x08, 0); // id2 hi
    code.extend_from_slice(&[0xA2, 0x10]); // LDX #$10
    code.extend_from_slice(&[0x20, 0x00, 0x60]); // JSR $6000
    code.extend_from_slice(&[0x85, 0x50]); // STA $50
    code.push(RTS);
    code
}

#[test]
fn intersect_syscall_reports_adjacency_correctly() {
    let images = [solid_image(4, 4, 1), solid_image(4, 4, 2)];

    // Overlapping: second sprite 3 columns over.
    let data = build_image(&[RTS], &intersect_code(13), &images);
    let mut pet = Toumapet::new(Rom::new(data).expect("rom"));
    pet.run_frame(&mut NullHost).expect("frame");
    assert_eq!(pet.memory()[0x50], 1);

    // Adjacent: 4 columns over, no overlap.
    let data = build_image(&[RTS], &intersect_code(14), &images);
    let mut pet = Toumapet::new(Rom::new(data).expect("rom"));
    pet.run_frame(&mut NullHost).expect("frame");
    assert_eq!(pet.memory()[0x50], 0);
}

#[test]
fn draw_syscall_paints_the_framebuffer() {
    // image_draw (X = 0x0a) of a 4x4 solid sprite at (5, 6).
    let mut code = Vec::new();
    let store = |code: &mut Vec<u8>, addr: u8, value: u8| {
        code.extend_from_slice(&[0xA9, value, 0x8D, addr, 0x01]);
    };
    store(&mut code, 0x00, 5); // x
    store(&mut code, 0x01, 6); // y
    store(&mut code, 0x02, 0); // id
    store(&mut code, 0x03, 0);
    store(&mut code, 0x04, 0); // flip
    store(&mut code, 0x05, 0xFF); // blend off
    code.extend_from_slice(&[0xA2, 0x0A, 0x20, 0x00, 0x60]); // LDX #$0a; JSR $6000
    code.push(RTS);

    let data = build_image(&[RTS], &code, &[solid_image(4, 4, 0x77)]);
    let mut pet = Toumapet::new(Rom::new(data).expect("rom"));
    pet.run_frame(&mut NullHost).expect("frame");
    assert_eq!(pet.screen()[6 * 128 + 5], 0x77);
    assert_eq!(pet.screen()[9 * 128 + 8], 0x77);
    assert_eq!(pet.screen()[6 * 128 + 9], 0x00);
}

#[test]
fn nested_rom_call_tracks_overlay_frames() {
    // Outer tick frame calls a second frame at 0x4000.
    let mut outer = Vec::new();
    for (addr, value) in [
        (0x80u8, 0x00u8),
        (0x81, 0x40),
        (0x82, 0x00),
        (0x83, 0x01), // one word
        (0x84, 0x00),
    ] {
        outer.extend_from_slice(&[0xA9, value, 0x85, addr]);
    }
    outer.extend_from_slice(&[0x4C, 0xDE, 0x60]); // JMP $60de

    let inner = [0xCB, RTS]; // WAI; RTS
    let mut data = build_image(&[RTS], &outer, &[]);
    data[0x4000..0x4002].copy_from_slice(&inner);
    let mut pet = Toumapet::new(Rom::new(data).expect("rom"));

    pet.run_frame(&mut NullHost).expect("frame 1");
    assert_eq!(pet.frame_depth(), 2);
    assert_eq!(&pet.memory()[0x300..0x302], &inner);

    // Waking frame unwinds the inner frame, restores the outer overlay,
    // and then returns all the way out.
    pet.run_frame(&mut NullHost).expect("frame 2");
    assert_eq!(pet.frame_depth(), 0);
    assert_eq!(pet.memory()[0x300], 0xA9); // outer frame restored
}

#[test]
fn oversized_rom_call_is_fatal() {
    // size field 0x280 words = 0x500 bytes, one past the overlay limit
    let mut outer = Vec::new();
    for (addr, value) in [
        (0x80u8, 0x00u8),
        (0x81, 0x40),
        (0x82, 0x00),
        (0x83, 0x80),
        (0x84, 0x02),
    ] {
        outer.extend_from_slice(&[0xA9, value, 0x85, addr]);
    }
    outer.extend_from_slice(&[0x4C, 0xDE, 0x60]);
    let mut pet = make_pet(&[RTS], &outer);
    let err = pet.run_frame(&mut NullHost);
    assert!(matches!(err, Err(EmuError::Runtime(m)) if m.contains("too big rom call")));
}

#[test]
fn unknown_syscall_is_fatal() {
    let tick = [0xA2, 0x42, 0x4C, 0x00, 0x60]; // LDX #$42; JMP $6000
    let mut pet = make_pet(&[RTS], &tick);
    let err = pet.run_frame(&mut NullHost);
    assert!(matches!(err, Err(EmuError::Runtime(m)) if m.contains("unknown syscall")));
}

#[test]
fn jumping_into_reserved_space_is_fatal() {
    let tick = [0x4C, 0x00, 0x80]; // JMP $8000
    let mut pet = make_pet(&[RTS], &tick);
    let err = pet.run_frame(&mut NullHost);
    assert!(matches!(err, Err(EmuError::Runtime(m)) if m.contains("unexpected pc")));
}

#[test]
fn undefined_opcode_is_fatal() {
    let tick = [0x00]; // BRK
    let mut pet = make_pet(&[RTS], &tick);
    let err = pet.run_frame(&mut NullHost);
    assert!(matches!(err, Err(EmuError::Runtime(m)) if m.contains("undefined opcode")));
}

#[test]
fn reset_wipes_cpu_state_and_reboots() {
    // Tick leaves a marker in memory.
    let tick = [0xE6, 0x40, RTS]; // INC $40
    let mut pet = make_pet(&[RTS], &tick);
    pet.run_frame(&mut NullHost).expect("frame");
    assert_eq!(pet.memory()[0x40], 1);

    pet.reset();
    assert_eq!(pet.memory()[0x40], 0);
    assert_eq!(pet.frame_depth(), 0);
    // Next frame cold-boots again and runs one tick.
    pet.run_frame(&mut NullHost).expect("frame");
    assert_eq!(pet.memory()[0x99], 0);
    assert_eq!(pet.memory()[0x40], 1);
}
