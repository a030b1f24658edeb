//! Battery-save persistence.
//!
//! A save file is three sections back to back: the full 64 KiB of CPU
//! memory, the 64 KiB ROM save region (stored obfuscated, exactly as it
//! would sit in flash), and the framebuffer. The framebuffer section is
//! best-effort on load, matching the device's tolerance of a truncated
//! dump; the two 64 KiB sections are mandatory.

use std::fs;
use std::io;
use std::path::Path;

use log::{info, warn};

use crate::bus::MEM_SIZE;
use crate::error::EmuError;
use crate::rom::SAVE_REGION_SIZE;
use crate::toumapet::Toumapet;

/// Load a save file into the machine. A missing file is not an error: the
/// session just cold-boots. A successfully loaded save suppresses the cold
/// boot.
///
/// # Errors
///
/// Returns [`EmuError::Config`] when the file exists but is unreadable or
/// too short.
pub fn load(pet: &mut Toumapet, path: &Path) -> Result<bool, EmuError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("no save file at {}, cold-booting", path.display());
            return Ok(false);
        }
        Err(e) => {
            return Err(EmuError::Config(format!(
                "can't read save file {}: {e}",
                path.display()
            )));
        }
    };
    if data.len() < MEM_SIZE + SAVE_REGION_SIZE {
        return Err(EmuError::Config(format!(
            "unexpected save size ({})",
            data.len()
        )));
    }

    pet.hw.mem.copy_from_slice(&data[..MEM_SIZE]);

    let key = pet.hw.rom.key();
    let tail = &data[MEM_SIZE..MEM_SIZE + SAVE_REGION_SIZE];
    for (cell, &byte) in pet.hw.rom.save_region_mut().iter_mut().zip(tail) {
        *cell = byte ^ key;
    }

    let screen_src = &data[MEM_SIZE + SAVE_REGION_SIZE..];
    let screen = pet.hw.video.screen_mut();
    let n = screen.len().min(screen_src.len());
    screen[..n].copy_from_slice(&screen_src[..n]);

    pet.set_booted();
    info!("loaded save from {}", path.display());
    Ok(true)
}

/// Write the machine state out as a save file.
///
/// # Errors
///
/// Returns [`EmuError::Config`] when the file cannot be written.
pub fn save(pet: &Toumapet, path: &Path) -> Result<(), EmuError> {
    let key = pet.rom().key();
    let mut out = Vec::with_capacity(MEM_SIZE + SAVE_REGION_SIZE + pet.screen().len());
    out.extend_from_slice(pet.memory());
    out.extend(pet.rom().save_region().iter().map(|&b| b ^ key));
    out.extend_from_slice(pet.screen());
    fs::write(path, out).map_err(|e| {
        EmuError::Config(format!("can't write save file {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::Rom;
    use std::path::PathBuf;

    fn make_pet(key: u8) -> Toumapet {
        let mut data = vec![0u8; 4 << 20];
        data[0x23..0x27].copy_from_slice(b"tony");
        for byte in &mut data {
            *byte ^= key;
        }
        Toumapet::new(Rom::new(data).expect("rom"))
    }

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("toumapet-test-{}-{name}", std::process::id()));
        path
    }

    #[test]
    fn round_trips_memory_tail_and_screen() {
        let key = 0x42;
        let mut pet = make_pet(key);
        pet.memory_mut()[0x1234] = 0xAB;
        pet.hw.rom.save_region_mut()[7] = 0xCD;
        pet.hw.video.screen_mut()[9] = 0x31;

        let path = temp_path("roundtrip.sav");
        save(&pet, &path).expect("save");

        let mut restored = make_pet(key);
        assert!(load(&mut restored, &path).expect("load"));
        assert_eq!(restored.memory()[0x1234], 0xAB);
        assert_eq!(restored.rom().save_region()[7], 0xCD);
        assert_eq!(restored.screen()[9], 0x31);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn tail_is_stored_obfuscated() {
        let key = 0x5A;
        let mut pet = make_pet(key);
        pet.hw.rom.save_region_mut()[0] = 0x77;

        let path = temp_path("obfuscated.sav");
        save(&pet, &path).expect("save");
        let raw = fs::read(&path).expect("read back");
        // On disk the tail byte carries the key, in memory it does not.
        assert_eq!(raw[MEM_SIZE], 0x77 ^ key);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_tolerated() {
        let mut pet = make_pet(0);
        let loaded = load(&mut pet, Path::new("/nonexistent/toumapet.sav")).expect("load");
        assert!(!loaded);
    }

    #[test]
    fn short_file_is_rejected() {
        let path = temp_path("short.sav");
        fs::write(&path, vec![0u8; 100]).expect("write");
        let mut pet = make_pet(0);
        assert!(matches!(
            load(&mut pet, &path),
            Err(EmuError::Config(_))
        ));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_framebuffer_section_is_tolerated() {
        let path = temp_path("noscreen.sav");
        fs::write(&path, vec![0u8; MEM_SIZE + SAVE_REGION_SIZE]).expect("write");
        let mut pet = make_pet(0);
        assert!(load(&mut pet, &path).expect("load"));
        fs::remove_file(&path).ok();
    }
}
