//! Top-level machine: CPU, hardware, and the frame scheduler.
//!
//! A frame is one pass of the firmware's periodic tick: the scheduler
//! advances the soft timers, banks the tick entry point in through the
//! ROM-call trampoline, and runs the interpreter until the overlay stack
//! unwinds, the firmware executes `WAI`, or it powers the unit off. The
//! caller presents the framebuffer between frames and owns pacing.

use std::time::{Duration, Instant};

use cpu_w65c02::{Cpu, Step};

use crate::bios::{Flow, FrameStack, BIOS_BASE, ROM_CALL_VECTOR};
use crate::bus::{CpuBus, Hardware};
use crate::error::EmuError;
use crate::input::{Host, Keys, KEY_BLANK, KEY_POWER_OFF, KEY_QUIT, KEY_RESET, KEY_WAI};
use crate::palette::Palette;
use crate::rom::Rom;

/// Idle timer the scheduler decrements once per frame.
const IDLE_TIMER_ADDR: usize = 0x181;

/// Millisecond tick accumulator (1/256 s units).
const TICK_ACCUM_ADDR: usize = 0xAF;

/// How the session looks after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    /// User asked to quit.
    Quit,
    /// Firmware powered the unit off.
    PowerOff,
    /// Soft-reset key: wipe the CPU and cold-boot again.
    ResetRequested,
}

/// The emulated device.
pub struct Toumapet {
    pub(crate) cpu: Cpu,
    pub(crate) hw: Hardware,
    pub(crate) frames: FrameStack,
    booted: bool,
    last_time: Instant,
    timer_rem: u32,
}

impl Toumapet {
    #[must_use]
    pub fn new(rom: Rom) -> Self {
        Self {
            cpu: Cpu::new(),
            hw: Hardware::new(rom),
            frames: FrameStack::default(),
            booted: false,
            last_time: Instant::now(),
            timer_rem: 0,
        }
    }

    #[must_use]
    pub fn rom(&self) -> &Rom {
        &self.hw.rom
    }

    /// The framebuffer, row-major palette indices.
    #[must_use]
    pub fn screen(&self) -> &[u8] {
        self.hw.video.screen()
    }

    #[must_use]
    pub fn screen_height(&self) -> usize {
        self.hw.video.height()
    }

    /// CPU memory.
    #[must_use]
    pub fn memory(&self) -> &[u8] {
        &self.hw.mem[..]
    }

    /// Mutable CPU memory, for state injection.
    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.hw.mem[..]
    }

    /// Current key bitmask.
    #[must_use]
    pub fn keys(&self) -> Keys {
        self.hw.keys
    }

    /// Live ROM-call overlay count.
    #[must_use]
    pub fn frame_depth(&self) -> usize {
        self.frames.depth()
    }

    /// Expand the framebuffer into a host pixel buffer.
    pub fn render(&self, palette: &Palette, zoom: usize, out: &mut [u32]) {
        palette.render(self.hw.video.screen(), zoom, out);
    }

    /// Poll the host and fold its input into the key mask.
    pub fn pump_input(&mut self, host: &mut dyn Host) {
        self.hw.pump_input(host);
    }

    /// Seed the firmware clock at 0x1df, seconds doubled.
    pub fn set_wall_clock(
        &mut self,
        year: u8,
        month0: u8,
        day0: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) {
        self.hw.mem[0x1DF] = year;
        self.hw.mem[0x1E0] = month0;
        self.hw.mem[0x1E1] = day0;
        self.hw.mem[0x1E2] = hour;
        self.hw.mem[0x1E3] = minute;
        self.hw.mem[0x1E4] = second.wrapping_mul(2);
    }

    /// Cold-boot the firmware if this session has not booted yet (loading a
    /// save counts as booted), and rebase the frame clock.
    ///
    /// # Errors
    ///
    /// Propagates any [`EmuError::Runtime`] the cold-start code raises.
    pub fn boot(&mut self, host: &mut dyn Host) -> Result<(), EmuError> {
        if !self.booted {
            self.booted = true;
            self.hw.mem[0xA3] |= 1; // play the start animation
            self.hw.mem[0x99] = self.hw.rom.key();
            self.frames.clear();
            self.cpu.sp = 0x7F;
            self.cpu.pc = ROM_CALL_VECTOR;
            let addr = u32::from(self.hw.rom.read_u16(3));
            let size = self.hw.rom.read_u16(5);
            self.hw.set_mem_u24(0x80, addr);
            self.hw.set_mem_u16(0x83, size);
            self.run(host)?;
        }
        self.last_time = Instant::now();
        self.timer_rem = 0;
        Ok(())
    }

    pub(crate) fn set_booted(&mut self) {
        self.booted = true;
    }

    /// Soft reset: keep the button state, wipe everything else, and let the
    /// next frame cold-boot again.
    pub fn reset(&mut self) {
        self.hw.keys.keep_buttons();
        self.booted = false;
        self.cpu = Cpu::new();
        self.hw.mem.fill(0);
        self.frames.clear();
    }

    /// Run one scheduler frame.
    ///
    /// # Errors
    ///
    /// Any [`EmuError::Runtime`] from the interpreter or its peripherals.
    pub fn run_frame(&mut self, host: &mut dyn Host) -> Result<(), EmuError> {
        if !self.booted {
            self.boot(host)?;
        }

        // Idle timer counts down once per frame, stopping at zero.
        let idle = self.hw.mem_u16(IDLE_TIMER_ADDR);
        if idle != 0 {
            self.hw.set_mem_u16(IDLE_TIMER_ADDR, idle - 1);
        }

        // Advance the 1/256-second tick accumulator, folding whole seconds
        // back into the reference time.
        let elapsed_ms = self.last_time.elapsed().as_millis() as u64;
        let a = (elapsed_ms * 256 / 1000) as u32;
        self.last_time += Duration::from_millis(u64::from(a >> 8) * 1000);
        let delta = a.wrapping_sub(self.timer_rem) as u8;
        self.hw.mem[TICK_ACCUM_ADDR] = self.hw.mem[TICK_ACCUM_ADDR].wrapping_add(delta);
        self.timer_rem = a;

        if self.hw.keys.take(KEY_WAI) {
            // Waking from WAI: resume where the firmware stopped instead of
            // re-entering the tick vector.
        } else {
            self.hw.mem[0x93] |= 1 << 4; // enable timers
            self.frames.clear();
            self.cpu.sp = 0x7F;
            self.cpu.pc = ROM_CALL_VECTOR;
            let addr = u32::from(self.hw.rom.read_u16(0x1B));
            let size = self.hw.rom.read_u16(0x1D);
            self.hw.set_mem_u24(0x80, addr);
            self.hw.set_mem_u16(0x83, size);
        }
        self.run(host)?;

        if self.hw.keys.take(KEY_BLANK) {
            self.hw.video.clear_all();
        }
        Ok(())
    }

    /// Session verdict from the key mask. Quit wins over power-off wins
    /// over reset.
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        if self.hw.keys.contains(KEY_QUIT) {
            SessionState::Quit
        } else if self.hw.keys.contains(KEY_POWER_OFF) {
            SessionState::PowerOff
        } else if self.hw.keys.contains(KEY_RESET) {
            SessionState::ResetRequested
        } else {
            SessionState::Running
        }
    }

    /// Run the interpreter until the frame stack unwinds, `WAI`, or
    /// power-off.
    fn run(&mut self, host: &mut dyn Host) -> Result<(), EmuError> {
        self.hw.input_timer = 0;
        loop {
            if self.cpu.pc >= BIOS_BASE {
                match self.service_trampoline()? {
                    Flow::Enter => continue,
                    Flow::Finished => return Ok(()),
                    Flow::Resume => {}
                }
            }
            let step = {
                let Toumapet { cpu, hw, .. } = self;
                let mut bus = CpuBus {
                    hw,
                    host: &mut *host,
                };
                cpu.step(&mut bus)
                    .map_err(|e| EmuError::Runtime(e.to_string()))?
            };
            if let Some(fault) = self.hw.take_fault() {
                return Err(fault);
            }
            if step == Step::Wai {
                self.hw.keys.set(KEY_WAI);
                return Ok(());
            }
            if self.hw.keys.contains(KEY_POWER_OFF) {
                return Ok(());
            }
        }
    }
}
