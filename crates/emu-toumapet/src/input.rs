//! Key state and the host event pump.
//!
//! The key bitmask mirrors the firmware's view of the world: the low bits
//! are the physical buttons (which bit a button lands on depends on the
//! model), the high bits are emulator-level events. The firmware reads the
//! inverted low byte through port 0.

use crate::config::Model;

/// User asked to quit (Escape or window close). Sticky.
pub const KEY_QUIT: u32 = 1 << 16;
/// Soft-reset key held.
pub const KEY_RESET: u32 = 1 << 17;
/// Firmware wrote 0 to the power port.
pub const KEY_POWER_OFF: u32 = 1 << 18;
/// Interpreter yielded on `WAI`.
pub const KEY_WAI: u32 = 1 << 19;
/// Screen blank requested (power-off or LCD display-off command).
pub const KEY_BLANK: u32 = 1 << 20;

/// The five front buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    /// Left (select).
    Left,
    /// Middle (enter).
    Middle,
    /// Right (back/menu).
    Right,
    /// Left side button.
    SideLeft,
    /// Right side button.
    SideRight,
}

impl Button {
    pub const ALL: [Button; 5] = [
        Button::Left,
        Button::Middle,
        Button::Right,
        Button::SideLeft,
        Button::SideRight,
    ];

    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Button::Left => 0,
            Button::Middle => 1,
            Button::Right => 2,
            Button::SideLeft => 3,
            Button::SideRight => 4,
        }
    }
}

/// Snapshot of host input state, produced by [`Host::pump`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HostInput {
    /// Escape pressed or window closed.
    pub quit: bool,
    /// Reset key held.
    pub reset: bool,
    /// Button hold state, indexed by [`Button::index`].
    pub buttons: [bool; 5],
}

/// Host-side event source.
///
/// The core polls this at frame boundaries and every 16th read of the key
/// port, so input reaches the firmware without intra-frame stalls.
pub trait Host {
    fn pump(&mut self) -> HostInput;
}

/// Host that never reports input, for tests and headless runs.
pub struct NullHost;

impl Host for NullHost {
    fn pump(&mut self) -> HostInput {
        HostInput::default()
    }
}

/// The key bitmask.
#[derive(Debug, Clone, Copy, Default)]
pub struct Keys {
    raw: u32,
}

impl Keys {
    #[must_use]
    pub fn raw(&self) -> u32 {
        self.raw
    }

    pub fn set(&mut self, mask: u32) {
        self.raw |= mask;
    }

    pub fn clear(&mut self, mask: u32) {
        self.raw &= !mask;
    }

    #[must_use]
    pub fn contains(&self, mask: u32) -> bool {
        self.raw & mask != 0
    }

    /// Test and clear in one step.
    pub fn take(&mut self, mask: u32) -> bool {
        let hit = self.contains(mask);
        self.clear(mask);
        hit
    }

    /// Drop everything above the button byte. Used on soft reset.
    pub fn keep_buttons(&mut self) {
        self.raw &= 0xFF;
    }

    /// Fold a host input snapshot into the mask using the model's keymap.
    ///
    /// Buttons and reset are level-triggered; quit latches.
    pub fn apply(&mut self, input: &HostInput, model: Model) {
        let keymap = model.keymap();
        for button in Button::ALL {
            let mask = 1u32 << keymap[button.index()];
            if input.buttons[button.index()] {
                self.set(mask);
            } else {
                self.clear(mask);
            }
        }
        if input.reset {
            self.set(KEY_RESET);
        } else {
            self.clear(KEY_RESET);
        }
        if input.quit {
            self.set(KEY_QUIT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buttons_map_per_model() {
        let mut input = HostInput::default();
        input.buttons[Button::Left.index()] = true;

        let mut keys = Keys::default();
        keys.apply(&input, Model::Ok550);
        assert!(keys.contains(1 << 4));

        let mut keys = Keys::default();
        keys.apply(&input, Model::Ok560);
        assert!(keys.contains(1 << 2));
    }

    #[test]
    fn release_clears_button_bit() {
        let mut input = HostInput::default();
        input.buttons[Button::Middle.index()] = true;
        let mut keys = Keys::default();
        keys.apply(&input, Model::Ok550);
        assert!(keys.contains(1 << 5));
        input.buttons[Button::Middle.index()] = false;
        keys.apply(&input, Model::Ok550);
        assert!(!keys.contains(1 << 5));
    }

    #[test]
    fn quit_latches() {
        let mut keys = Keys::default();
        keys.apply(
            &HostInput {
                quit: true,
                ..HostInput::default()
            },
            Model::Ok550,
        );
        keys.apply(&HostInput::default(), Model::Ok550);
        assert!(keys.contains(KEY_QUIT));
    }

    #[test]
    fn keep_buttons_drops_events() {
        let mut keys = Keys::default();
        keys.set(KEY_RESET | KEY_BLANK | 0x34);
        keys.keep_buttons();
        assert_eq!(keys.raw(), 0x34);
    }
}
