//! Bus trait connecting the CPU to a machine's memory map.

/// Memory access interface presented to the CPU.
///
/// `read` and `write` are used for decoded data accesses and are allowed to
/// have I/O side effects. `peek` and `poke` are used for instruction fetches,
/// zero-page pointer fetches and stack traffic, which never touch I/O on the
/// real part and must not trigger side effects here either.
pub trait Bus {
    /// Data read at `addr`, with I/O side effects.
    fn read(&mut self, addr: u16) -> u8;

    /// Data write at `addr`, with I/O side effects.
    fn write(&mut self, addr: u16, value: u8);

    /// Side-effect-free read at `addr`.
    fn peek(&mut self, addr: u16) -> u8;

    /// Side-effect-free write at `addr`.
    fn poke(&mut self, addr: u16, value: u8);
}

/// Flat 64 KiB RAM with no I/O, for tests.
pub struct FlatBus {
    pub mem: Box<[u8; 0x10000]>,
}

impl FlatBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mem: Box::new([0u8; 0x10000]),
        }
    }

    /// Load `bytes` at `addr`.
    pub fn load(&mut self, addr: u16, bytes: &[u8]) {
        let start = addr as usize;
        self.mem[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl Default for FlatBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for FlatBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.mem[addr as usize]
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.mem[addr as usize] = value;
    }

    fn peek(&mut self, addr: u16) -> u8 {
        self.mem[addr as usize]
    }

    fn poke(&mut self, addr: u16, value: u8) {
        self.mem[addr as usize] = value;
    }
}
