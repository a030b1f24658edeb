//! ToumaPet virtual-pet handheld emulator.
//!
//! Emulates the WDC 65C02-based electronic pet in two hardware revisions,
//! detected from the cartridge dump size: the OK-550 (4 MiB, 128x128
//! panel) and OK-560 (8 MiB, 128x160). The cartridge flash holds both the
//! banked game code, reached through a ROM-call trampoline, and the last
//! 64 KiB of battery save state, rewritten in-session through an emulated
//! SPI flash.
//!
//! The crate is the machine core; the binary in `main.rs` adds the minifb
//! window, key mapping, and frame pacing on top. Hosts integrate through
//! [`Host`] (polled input), [`Toumapet::run_frame`], and
//! [`Toumapet::render`].

mod bios;
mod bus;
mod config;
mod error;
mod flash;
mod input;
mod palette;
mod rom;
pub mod savefile;
mod toumapet;
mod video;

pub use bios::FRAME_STACK_MAX;
pub use config::Model;
pub use error::EmuError;
pub use input::{
    Button, Host, HostInput, Keys, NullHost, KEY_BLANK, KEY_POWER_OFF, KEY_QUIT, KEY_RESET,
    KEY_WAI,
};
pub use palette::Palette;
pub use rom::{Rom, SAVE_REGION_SIZE};
pub use toumapet::{SessionState, Toumapet};
pub use video::{check_intersect, SCREEN_W};
