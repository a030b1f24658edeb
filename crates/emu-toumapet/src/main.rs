//! ToumaPet emulator binary.
//!
//! Opens a minifb window, runs the machine at 30 fps, and maps the
//! keyboard onto the pet's five buttons. Input is polled, so the core can
//! pump events both at frame boundaries and from inside the interpreter.

use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Datelike, Local, Timelike};
use log::warn;
use minifb::{Key, Window, WindowOptions};

use emu_toumapet::{
    savefile, Button, EmuError, Host, HostInput, Palette, Rom, SessionState, Toumapet, SCREEN_W,
};

const FPS: i64 = 30;

/// Presentation pause after boot, long enough to get the test-menu key
/// chord down before the first tick.
const START_DELAY: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

struct CliArgs {
    rom_path: PathBuf,
    save_path: Option<PathBuf>,
    update_time: bool,
    zoom: usize,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        rom_path: PathBuf::from("toumapet.bin"),
        save_path: None,
        update_time: false,
        zoom: 3,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--rom" => {
                i += 1;
                match args.get(i) {
                    Some(path) => cli.rom_path = PathBuf::from(path),
                    None => bad_option(),
                }
            }
            "--save" => {
                i += 1;
                match args.get(i) {
                    Some(path) if !path.is_empty() => cli.save_path = Some(PathBuf::from(path)),
                    Some(_) => cli.save_path = None,
                    None => bad_option(),
                }
            }
            "--zoom" => {
                i += 1;
                match args.get(i) {
                    Some(s) => cli.zoom = s.parse().unwrap_or(0).clamp(1, 5),
                    None => bad_option(),
                }
            }
            "--update-time" => {
                cli.update_time = true;
            }
            "--help" | "-h" => {
                eprintln!("Usage: emu-toumapet [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --rom <file>     Cartridge dump [default: toumapet.bin]");
                eprintln!("  --save <file>    Battery save; loaded at start, written at exit");
                eprintln!("  --update-time    Copy the host clock into the pet at boot");
                eprintln!("  --zoom <1-5>     Window scale factor [default: 3]");
                process::exit(0);
            }
            other => {
                eprintln!("unknown option: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn bad_option() -> ! {
    eprintln!("bad option");
    process::exit(1);
}

// ---------------------------------------------------------------------------
// minifb host
// ---------------------------------------------------------------------------

/// Polls the window for key and close events on behalf of the core.
struct WindowHost<'a> {
    window: &'a mut Window,
}

impl Host for WindowHost<'_> {
    fn pump(&mut self) -> HostInput {
        self.window.update();
        let mut input = HostInput::default();
        if !self.window.is_open() {
            input.quit = true;
        }
        for key in self.window.get_keys() {
            match key {
                Key::Escape => input.quit = true,
                Key::R => input.reset = true,
                Key::A | Key::Left => input.buttons[Button::Left.index()] = true,
                Key::S | Key::Down => input.buttons[Button::Middle.index()] = true,
                Key::D | Key::Right => input.buttons[Button::Right.index()] = true,
                Key::Q | Key::Delete => input.buttons[Button::SideLeft.index()] = true,
                Key::E | Key::PageDown => input.buttons[Button::SideRight.index()] = true,
                _ => {}
            }
        }
        input
    }
}

fn present(pet: &Toumapet, palette: &Palette, zoom: usize, buffer: &mut [u32], window: &mut Window) {
    pet.render(palette, zoom, buffer);
    let width = SCREEN_W * zoom;
    let height = pet.screen_height() * zoom;
    // Present failures are logged; the session keeps running.
    if let Err(e) = window.update_with_buffer(buffer, width, height) {
        warn!("present failed: {e}");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn run(cli: &CliArgs) -> Result<(), EmuError> {
    let rom = Rom::load(&cli.rom_path)?;
    let mut pet = Toumapet::new(rom);

    if let Some(path) = &cli.save_path {
        savefile::load(&mut pet, path)?;
    }
    if cli.update_time {
        let now = Local::now();
        pet.set_wall_clock(
            (now.year().rem_euclid(100)) as u8,
            now.month0() as u8,
            (now.day() - 1) as u8,
            now.hour() as u8,
            now.minute() as u8,
            now.second() as u8,
        );
    }

    let width = SCREEN_W * cli.zoom;
    let height = pet.screen_height() * cli.zoom;
    let mut window = Window::new("ToumaPet", width, height, WindowOptions::default())
        .map_err(|e| EmuError::Config(format!("can't open window: {e}")))?;
    // Pacing is ours; don't let the window throttle update() calls.
    window.set_target_fps(0);

    let palette = Palette::new(2); // minifb buffers are 0RGB
    let mut buffer = vec![0u32; width * height];

    let clock = Instant::now();
    let now_ms = |clock: &Instant| clock.elapsed().as_millis() as i64;

    'session: loop {
        pet.boot(&mut WindowHost {
            window: &mut window,
        })?;
        present(&pet, &palette, cli.zoom, &mut buffer, &mut window);
        thread::sleep(START_DELAY);
        pet.pump_input(&mut WindowHost {
            window: &mut window,
        });

        let mut disp_anchor = now_ms(&clock);
        let mut frame_ix: i64 = 0;
        loop {
            match pet.session_state() {
                SessionState::Running => {}
                SessionState::Quit | SessionState::PowerOff => break 'session,
                SessionState::ResetRequested => {
                    pet.reset();
                    continue 'session;
                }
            }

            pet.run_frame(&mut WindowHost {
                window: &mut window,
            })?;
            present(&pet, &palette, cli.zoom, &mut buffer, &mut window);

            // Pace against an anchor instead of sleeping a fixed slice, so
            // slow frames borrow from fast ones within each second.
            let cur = now_ms(&clock);
            frame_ix += 1;
            if frame_ix >= FPS {
                disp_anchor += 1000;
                frame_ix = 0;
            }
            let wait = frame_ix * 1000 / FPS + disp_anchor - cur;
            if wait < 0 {
                disp_anchor = cur;
                frame_ix = 0;
            } else {
                thread::sleep(Duration::from_millis(wait as u64));
            }

            pet.pump_input(&mut WindowHost {
                window: &mut window,
            });
        }
    }

    if let Some(path) = &cli.save_path {
        if let Err(e) = savefile::save(&pet, path) {
            warn!("{e}");
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = parse_args();
    if let Err(e) = run(&cli) {
        eprintln!("{e}");
        process::exit(1);
    }
}
