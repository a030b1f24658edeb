//! BIOS trampoline: reserved PCs serviced by the host.
//!
//! The firmware never maps real code above 0x6000. Instead, a handful of
//! fixed addresses act as entry points into mask-ROM services: a syscall
//! dispatcher selected by X, a 6-byte ROM read, the ROM-call/tail-call pair
//! that banks cartridge code into the overlay window at 0x0300, and the
//! return vector that unwinds it. After servicing, the core parks the CPU
//! on a synthesized `RTS` so the firmware's calling convention holds.

use log::trace;

use crate::error::EmuError;
use crate::toumapet::Toumapet;
use crate::video;

/// First reserved PC; everything at or above here belongs to the BIOS.
pub(crate) const BIOS_BASE: u16 = 0x6000;

/// Syscall dispatcher (function selected by X).
const SYSCALL_VECTOR: u16 = 0x6000;
/// 6-byte ROM read into 0x8d.
const ROM_READ_VECTOR: u16 = 0x6003;
/// ROM call that replaces the current overlay frame.
const TAIL_CALL_VECTOR: u16 = 0x6052;
/// ROM call pushing a new overlay frame.
pub(crate) const ROM_CALL_VECTOR: u16 = 0x60DE;
/// Overlay return.
const RETURN_VECTOR: u16 = 0x7000;
/// Landing pad holding the synthesized `RTS`.
const RTS_PAD: u16 = 0x7001;

/// CPU address the overlay window starts at.
pub(crate) const OVERLAY_BASE: usize = 0x0300;
/// Overlay size limit (exclusive).
const OVERLAY_MAX: u32 = 0x0500;

/// Maximum live ROM-call frames.
pub const FRAME_STACK_MAX: usize = 16;

/// One live overlay: a ROM slice currently mapped at 0x0300.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Frame {
    pub addr: u32,
    pub size: u16,
}

/// Bounded LIFO of live overlays.
#[derive(Debug, Default)]
pub(crate) struct FrameStack {
    frames: [Frame; FRAME_STACK_MAX],
    depth: usize,
}

impl FrameStack {
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn clear(&mut self) {
        self.depth = 0;
    }

    pub fn top(&self) -> Option<Frame> {
        self.depth.checked_sub(1).map(|i| self.frames[i])
    }

    pub fn push(&mut self, frame: Frame) -> Result<(), EmuError> {
        if self.depth >= FRAME_STACK_MAX {
            return Err(EmuError::Runtime("call stack overflow".into()));
        }
        self.frames[self.depth] = frame;
        self.depth += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<(), EmuError> {
        if self.depth == 0 {
            return Err(EmuError::Runtime("call stack underflow".into()));
        }
        self.depth -= 1;
        Ok(())
    }
}

/// What the interpreter loop should do after a trampoline service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Overlay switched; re-enter the loop at the new PC.
    Enter,
    /// Service done; execute the synthesized `RTS`.
    Resume,
    /// The frame stack drained: the interpreter run is over.
    Finished,
}

impl Toumapet {
    /// Handle execution landing at or above [`BIOS_BASE`].
    pub(crate) fn service_trampoline(&mut self) -> Result<Flow, EmuError> {
        match self.cpu.pc {
            SYSCALL_VECTOR => {
                self.syscall()?;
                Ok(self.synth_rts())
            }
            ROM_READ_VECTOR => {
                self.rom_read()?;
                Ok(self.synth_rts())
            }
            RETURN_VECTOR => {
                self.frames.pop()?;
                match self.frames.top() {
                    None => {
                        trace!("last overlay returned");
                        Ok(Flow::Finished)
                    }
                    Some(frame) => {
                        self.load_overlay(frame);
                        Ok(self.synth_rts())
                    }
                }
            }
            ROM_CALL_VECTOR => self.rom_call(false),
            TAIL_CALL_VECTOR => self.rom_call(true),
            pc => Err(EmuError::Runtime(format!("unexpected pc {pc:#06x}"))),
        }
    }

    /// Park the CPU on the synthesized `RTS` at 0x7001.
    fn synth_rts(&mut self) -> Flow {
        self.hw.mem[RTS_PAD as usize] = 0x60;
        self.cpu.pc = RTS_PAD;
        Flow::Resume
    }

    /// Copy a frame's ROM bytes into the overlay window.
    fn load_overlay(&mut self, frame: Frame) {
        let addr = frame.addr as usize;
        let size = usize::from(frame.size);
        self.hw.mem[OVERLAY_BASE..OVERLAY_BASE + size]
            .copy_from_slice(&self.hw.rom.bytes()[addr..addr + size]);
    }

    /// Bank a ROM slice in at 0x0300 and jump to it. A tail call replaces
    /// the calling frame; a plain call pushes the return trampoline first.
    fn rom_call(&mut self, tail: bool) -> Result<Flow, EmuError> {
        let addr = self.hw.mem_u24(0x80);
        let size = u32::from(self.hw.mem_u16(0x83)) << 1;
        trace!("ROM call ({addr:#x}, {size:#x}), tail = {tail}");
        if size >= OVERLAY_MAX {
            return Err(EmuError::Runtime(format!(
                "too big rom call ({addr:#x}, {size:#x})"
            )));
        }
        if (self.hw.rom.len() as u64) < u64::from(addr) + u64::from(size) {
            return Err(EmuError::Runtime(format!(
                "bad ROM call ({addr:#x}, {size:#x})"
            )));
        }
        if self.frames.depth() >= FRAME_STACK_MAX {
            return Err(EmuError::Runtime("call stack overflow".into()));
        }
        if tail {
            self.frames.pop()?;
        } else {
            // Push the return vector (minus the RTS adjust) for the callee.
            let ret = RETURN_VECTOR - 1;
            let sp = self.cpu.sp;
            self.hw.mem[0x100 + usize::from(sp)] = (ret >> 8) as u8;
            self.hw.mem[0x100 + usize::from(sp.wrapping_sub(1))] = ret as u8;
            self.cpu.sp = sp.wrapping_sub(2);
        }
        let frame = Frame {
            addr,
            size: size as u16,
        };
        self.frames.push(frame)?;
        self.load_overlay(frame);
        self.cpu.pc = OVERLAY_BASE as u16;
        Ok(Flow::Enter)
    }

    /// Copy 6 ROM bytes at the 24-bit address in 0x80 to 0x8d. Bytes past
    /// the end of the ROM read as the inverted key, like floating flash
    /// lines would.
    fn rom_read(&mut self) -> Result<(), EmuError> {
        let addr = self.hw.mem_u24(0x80) as usize;
        trace!("ROM read ({addr:#x})");
        if self.hw.rom.len() <= addr {
            return Err(EmuError::Runtime(format!(
                "read outside the ROM ({addr:#x})"
            )));
        }
        for i in 0..6 {
            self.hw.mem[0x8D + i] = if addr + i < self.hw.rom.len() {
                self.hw.rom.byte(addr + i)
            } else {
                !self.hw.rom.key()
            };
        }
        Ok(())
    }

    /// Bounds-check the ROM pointer argument shared by the diagnostic
    /// syscalls, then trace what it points at.
    fn diag_probe(&self, name: &str) -> Result<(), EmuError> {
        let addr = self.hw.mem_u24(0x80) as usize;
        if self.hw.rom.len() < addr + 4 {
            return Err(EmuError::Runtime(format!(
                "read outside the ROM ({addr:#x})"
            )));
        }
        trace!(
            "{name} (addr = {addr:#x}): {:#04x}, id = {}, {:#04x}",
            self.hw.rom.byte(addr),
            self.hw.rom.read_u16(addr + 1),
            self.hw.rom.byte(addr + 3),
        );
        Ok(())
    }

    /// Dispatch a BIOS function by the value of X. Arguments live in the
    /// stack page at 0x100.
    fn syscall(&mut self) -> Result<(), EmuError> {
        match self.cpu.x {
            // image_size: W/H of a resource into 0x85/0x86
            0x06 => {
                let id = self.hw.mem_u16(0x100);
                self.hw.set_mem_u16(0x102, id);
                trace!("image_size (id = {id})");
                let offs = self.hw.rom.image_offset(id)? as usize;
                self.hw.mem[0x85] = self.hw.rom.byte(offs);
                self.hw.mem[0x86] = self.hw.rom.byte(offs + 2);
            }
            // image_draw_alpha: color 0 transparent
            0x08 => {
                let (x, y, id) = self.draw_args();
                let flip = self.hw.mem[0x104];
                let blend = self.hw.mem[0x105];
                trace!("image_draw_alpha (x = {x}, y = {y}, id = {id}, flip = {flip}, blend = {blend:#04x})");
                let offs = self.hw.rom.image_offset(id)?;
                self.hw
                    .video
                    .draw_image(&self.hw.rom, x, y, offs, flip, blend, 0)?;
            }
            // image_draw: opaque
            0x0A => {
                let (x, y, id) = self.draw_args();
                let flip = self.hw.mem[0x104];
                let blend = self.hw.mem[0x105];
                trace!("image_draw (x = {x}, y = {y}, id = {id}, flip = {flip}, blend = {blend:#04x})");
                let offs = self.hw.rom.image_offset(id)?;
                self.hw
                    .video
                    .draw_image(&self.hw.rom, x, y, offs, flip, blend, -1)?;
            }
            // clear rows [start, end]
            0x0C => {
                let start = i32::from(self.hw.mem[0x100]);
                let end = i32::from(self.hw.mem[0x101]);
                let color = self.hw.mem[0x102];
                trace!("clear_screen (start = {start}, end = {end}, color = {color:#04x})");
                self.hw.video.clear_rows(start, end, color);
            }
            // repeat_line flood
            0x0E => {
                let start = i32::from(self.hw.mem[0x100]);
                let end = i32::from(self.hw.mem[0x101]);
                let id = self.hw.mem_u16(0x102);
                trace!("repeat_line (start = {start}, end = {end}, id = {id})");
                self.hw.video.repeat_line(&self.hw.rom, start, end, id)?;
            }
            // sprite intersection test -> A
            0x10 => {
                let x1 = self.hw.mem[0x100];
                let y1 = self.hw.mem[0x101];
                let id1 = self.hw.mem_u16(0x102);
                let x2 = self.hw.mem[0x105];
                let y2 = self.hw.mem[0x106];
                let id2 = self.hw.mem_u16(0x107);
                let hit = video::check_intersect(&self.hw.rom, x1, y1, id1, x2, y2, id2)?;
                trace!("check_intersect ({x1},{y1} id {id1} / {x2},{y2} id {id2}) = {hit}");
                self.cpu.a = u8::from(hit);
            }
            // Diagnostics: trace-only probes into ROM data structures.
            0x14 => self.diag_probe("bios_14")?,
            0x16 => self.diag_probe("bios_16")?,
            0x18 => self.diag_probe("bios_18")?,
            0x1A => self.diag_probe("bios_1a")?,
            0x1C => trace!("bios_1c (res = {})", self.hw.mem_u24(0x80)),
            0x1E => trace!("bios_1e"),
            0x2C => self.diag_probe("bios_2c")?,
            // draw_char_alpha: background transparent
            0x24 => {
                let x = i32::from(self.hw.mem[0x100]);
                let y = i32::from(self.hw.mem[0x101]);
                let code = self.hw.mem[0x102];
                let color = self.hw.mem[0x103];
                trace!("draw_char_alpha (x = {x}, y = {y}, code = {code}, color = {color:#04x})");
                self.hw.video.draw_char(&self.hw.rom, x, y, code, color, -1)?;
            }
            // draw_char with background fill
            0x26 => {
                let x = i32::from(self.hw.mem[0x100]);
                let y = i32::from(self.hw.mem[0x101]);
                let code = self.hw.mem[0x102];
                let color = self.hw.mem[0x103];
                let bg = i32::from(self.hw.mem[0x104]);
                trace!("draw_char (x = {x}, y = {y}, code = {code}, color = {color:#04x}, bg = {bg:#04x})");
                self.hw.video.draw_char(&self.hw.rom, x, y, code, color, bg)?;
            }
            x => return Err(EmuError::Runtime(format!("unknown syscall {x:#04x}"))),
        }
        Ok(())
    }

    fn draw_args(&self) -> (i32, i32, u16) {
        (
            i32::from(self.hw.mem[0x100]),
            i32::from(self.hw.mem[0x101]),
            self.hw.mem_u16(0x102),
        )
    }
}
