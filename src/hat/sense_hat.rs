//! Raspberry Pi Sense HAT backend
//!
//! The kernel exposes the board through two character devices:
//!
//! ```text
//! evdev device named "Raspberry Pi Sense HAT Joystick"     ->  /dev/input/eventN
//! /sys/class/graphics/fbN/name == "RPi-Sense FB"           ->  /dev/fbN
//! ```
//!
//! The joystick is read through `evdev`, the framebuffer takes 64 RGB565
//! pixels. Both paths can be pinned in the settings to skip discovery.

use evdev::{Device, EventType, KeyCode};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{Action, Direction, HatError, InputEvent, JoystickHat, Rgb};

pub const DEFAULT_JOYSTICK_NAME: &str = "Raspberry Pi Sense HAT Joystick";
pub const DEFAULT_FRAMEBUFFER_NAME: &str = "RPi-Sense FB";

const LED_COUNT: usize = 64;

/// Where to look for the Sense HAT devices
#[derive(Clone, Debug)]
pub struct SenseHatSettings {
    pub joystick_name: String,
    pub framebuffer_name: String,
    /// Skips joystick discovery when set
    pub joystick_path: Option<PathBuf>,
    /// Skips framebuffer discovery when set
    pub framebuffer_path: Option<PathBuf>,
    pub sys_root: PathBuf,
    pub dev_root: PathBuf,
}

impl Default for SenseHatSettings {
    fn default() -> Self {
        Self {
            joystick_name: DEFAULT_JOYSTICK_NAME.to_string(),
            framebuffer_name: DEFAULT_FRAMEBUFFER_NAME.to_string(),
            joystick_path: None,
            framebuffer_path: None,
            sys_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
        }
    }
}

/// The 8x8 LED matrix behind the Sense HAT framebuffer
#[derive(Debug)]
pub struct LedMatrix {
    framebuffer: File,
    path: PathBuf,
}

impl LedMatrix {
    pub fn open(path: &Path) -> Result<Self, HatError> {
        let framebuffer = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|source| HatError::OpenError {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("LED framebuffer opened at {}", path.display());
        Ok(Self {
            framebuffer,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fill(&mut self, color: Rgb) -> Result<(), HatError> {
        let pixel = rgb565(color).to_ne_bytes();
        let frame: Vec<u8> = pixel.iter().copied().cycle().take(LED_COUNT * 2).collect();

        let write_frame = |framebuffer: &mut File| -> std::io::Result<()> {
            framebuffer.seek(SeekFrom::Start(0))?;
            framebuffer.write_all(&frame)?;
            framebuffer.flush()
        };
        write_frame(&mut self.framebuffer).map_err(HatError::DisplayError)
    }
}

/// Open handles to the joystick and the LED matrix
pub struct SenseHat {
    joystick: Device,
    joystick_path: PathBuf,
    leds: LedMatrix,
}

impl SenseHat {
    pub fn open(settings: &SenseHatSettings) -> Result<Self, HatError> {
        debug!("Opening Sense HAT with settings: {:?}", settings);

        let (joystick_path, joystick) = open_joystick(settings)?;
        joystick
            .set_nonblocking(true)
            .map_err(|source| HatError::OpenError {
                path: joystick_path.clone(),
                source,
            })?;
        debug!("Joystick opened at {}", joystick_path.display());

        let framebuffer_path = match &settings.framebuffer_path {
            Some(path) => path.clone(),
            None => {
                let class_dir = settings.sys_root.join("class/graphics");
                let entry = find_framebuffer(&class_dir, &settings.framebuffer_name)
                    .ok_or_else(|| HatError::DeviceNotFound {
                        kind: "framebuffer",
                        name: settings.framebuffer_name.clone(),
                        searched: class_dir.clone(),
                    })?;
                settings.dev_root.join(entry)
            }
        };
        let leds = LedMatrix::open(&framebuffer_path)?;

        Ok(Self {
            joystick,
            joystick_path,
            leds,
        })
    }

    pub fn joystick_path(&self) -> &Path {
        &self.joystick_path
    }

    pub fn framebuffer_path(&self) -> &Path {
        self.leds.path()
    }
}

impl JoystickHat for SenseHat {
    fn poll_events(&mut self) -> Result<Vec<InputEvent>, HatError> {
        let events: Vec<InputEvent> = match self.joystick.fetch_events() {
            Ok(fetched) => fetched.filter_map(|event| map_key_event(&event)).collect(),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Vec::new(),
            Err(e) => return Err(HatError::ReadError(e)),
        };

        if !events.is_empty() {
            debug!("Read {} joystick events", events.len());
        }
        Ok(events)
    }

    fn fill(&mut self, color: Rgb) -> Result<(), HatError> {
        self.leds.fill(color)
    }
}

/// Opens the pinned joystick node, or the first evdev device carrying the
/// configured name.
fn open_joystick(settings: &SenseHatSettings) -> Result<(PathBuf, Device), HatError> {
    if let Some(path) = &settings.joystick_path {
        let device = Device::open(path).map_err(|source| HatError::OpenError {
            path: path.clone(),
            source,
        })?;
        return Ok((path.clone(), device));
    }

    let mut candidates: Vec<(PathBuf, Device)> = evdev::enumerate()
        .filter(|(path, device)| {
            debug!("{} reports name {:?}", path.display(), device.name());
            device.name() == Some(settings.joystick_name.as_str())
        })
        .collect();
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    if candidates.is_empty() {
        return Err(HatError::DeviceNotFound {
            kind: "joystick",
            name: settings.joystick_name.clone(),
            searched: settings.dev_root.join("input"),
        });
    }
    Ok(candidates.swap_remove(0))
}

/// Scans `class_dir` for `fbN` entries whose `name` file holds `wanted` and
/// returns the matching entry name.
fn find_framebuffer(class_dir: &Path, wanted: &str) -> Option<String> {
    let read_dir = match fs::read_dir(class_dir) {
        Ok(read_dir) => read_dir,
        Err(e) => {
            warn!("Cannot scan {}: {}", class_dir.display(), e);
            return None;
        }
    };

    let mut candidates: Vec<String> = read_dir
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("fb"))
        .collect();
    candidates.sort();

    candidates.into_iter().find(|entry| {
        match fs::read_to_string(class_dir.join(entry).join("name")) {
            Ok(name) => {
                debug!("{} reports name {:?}", entry, name.trim());
                name.trim() == wanted
            }
            Err(_) => false,
        }
    })
}

/// Maps one evdev event to a joystick event. Returns `None` for anything that
/// is not a joystick key.
fn map_key_event(event: &evdev::InputEvent) -> Option<InputEvent> {
    if event.event_type() != EventType::KEY {
        return None;
    }
    let direction = match KeyCode(event.code()) {
        KeyCode::KEY_UP => Direction::Up,
        KeyCode::KEY_DOWN => Direction::Down,
        KeyCode::KEY_LEFT => Direction::Left,
        KeyCode::KEY_RIGHT => Direction::Right,
        KeyCode::KEY_ENTER => Direction::Middle,
        _ => return None,
    };
    let action = match event.value() {
        0 => Action::Released,
        1 => Action::Pressed,
        2 => Action::Held,
        other => {
            debug!("Ignoring key {} with value {}", event.code(), other);
            return None;
        }
    };
    Some(InputEvent::new(action, direction))
}

fn rgb565((r, g, b): Rgb) -> u16 {
    ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, value: i32) -> evdev::InputEvent {
        evdev::InputEvent::new(EventType::KEY.0, code.0, value)
    }

    fn scratch_dir(test: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sensehat-bridge-{}-{}",
            test,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn maps_joystick_keys() {
        assert_eq!(
            map_key_event(&key(KeyCode::KEY_UP, 1)),
            Some(InputEvent::new(Action::Pressed, Direction::Up))
        );
        assert_eq!(
            map_key_event(&key(KeyCode::KEY_ENTER, 0)),
            Some(InputEvent::new(Action::Released, Direction::Middle))
        );
        assert_eq!(
            map_key_event(&key(KeyCode::KEY_RIGHT, 2)),
            Some(InputEvent::new(Action::Held, Direction::Right))
        );
        assert_eq!(
            map_key_event(&key(KeyCode::KEY_DOWN, 1)),
            Some(InputEvent::new(Action::Pressed, Direction::Down))
        );
        assert_eq!(
            map_key_event(&key(KeyCode::KEY_LEFT, 0)),
            Some(InputEvent::new(Action::Released, Direction::Left))
        );
    }

    #[test]
    fn ignores_sync_and_unknown_events() {
        let sync = evdev::InputEvent::new(EventType::SYNCHRONIZATION.0, 0, 0);
        assert_eq!(map_key_event(&sync), None);
        assert_eq!(map_key_event(&key(KeyCode::KEY_A, 1)), None);
        assert_eq!(map_key_event(&key(KeyCode::KEY_DOWN, 7)), None);
        // KEY_UP code under a different event type
        let abs = evdev::InputEvent::new(EventType::ABSOLUTE.0, KeyCode::KEY_UP.0, 1);
        assert_eq!(map_key_event(&abs), None);
    }

    #[test]
    fn packs_rgb565() {
        assert_eq!(rgb565((0, 255, 0)), 0x07E0);
        assert_eq!(rgb565((255, 0, 0)), 0xF800);
        assert_eq!(rgb565((0, 0, 255)), 0x001F);
        assert_eq!(rgb565((0, 0, 0)), 0);
    }

    #[test]
    fn finds_framebuffer_by_name() {
        let sys = scratch_dir("discovery");
        let graphics = sys.join("class/graphics");
        for (entry, name) in [("fb0", "BCM2708 FB"), ("fb1", DEFAULT_FRAMEBUFFER_NAME)] {
            fs::create_dir_all(graphics.join(entry)).unwrap();
            fs::write(graphics.join(entry).join("name"), format!("{}\n", name)).unwrap();
        }
        fs::create_dir_all(graphics.join("fbcon")).unwrap();

        assert_eq!(
            find_framebuffer(&graphics, DEFAULT_FRAMEBUFFER_NAME),
            Some("fb1".to_string())
        );
        assert_eq!(find_framebuffer(&graphics, "nope"), None);
        assert_eq!(
            find_framebuffer(&sys.join("missing"), DEFAULT_FRAMEBUFFER_NAME),
            None
        );
        let _ = fs::remove_dir_all(&sys);
    }

    #[test]
    fn open_reports_missing_joystick() {
        let root = scratch_dir("missing");
        let settings = SenseHatSettings {
            joystick_name: "No Such Joystick".to_string(),
            sys_root: root.clone(),
            dev_root: root.clone(),
            ..Default::default()
        };
        match SenseHat::open(&settings) {
            Err(HatError::DeviceNotFound { kind, name, .. }) => {
                assert_eq!(kind, "joystick");
                assert_eq!(name, "No Such Joystick");
            }
            Err(other) => panic!("expected DeviceNotFound, got {:?}", other),
            Ok(_) => panic!("expected DeviceNotFound, got a device"),
        }
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn open_reports_unopenable_pinned_joystick() {
        let root = scratch_dir("pinned");
        let settings = SenseHatSettings {
            joystick_path: Some(root.join("event9")),
            ..Default::default()
        };
        match SenseHat::open(&settings) {
            Err(HatError::OpenError { path, .. }) => assert_eq!(path, root.join("event9")),
            Err(other) => panic!("expected OpenError, got {:?}", other),
            Ok(_) => panic!("expected OpenError, got a device"),
        }
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn fills_display_through_framebuffer_file() {
        let dir = scratch_dir("framebuffer");
        let framebuffer_path = dir.join("fb1");
        fs::write(&framebuffer_path, []).unwrap();

        let mut leds = LedMatrix::open(&framebuffer_path).unwrap();
        assert_eq!(leds.path(), framebuffer_path.as_path());

        leds.fill((0, 255, 0)).unwrap();
        let frame = fs::read(&framebuffer_path).unwrap();
        assert_eq!(frame.len(), LED_COUNT * 2);
        assert!(frame
            .chunks_exact(2)
            .all(|px| u16::from_ne_bytes([px[0], px[1]]) == 0x07E0));

        leds.fill((0, 0, 0)).unwrap();
        let frame = fs::read(&framebuffer_path).unwrap();
        assert_eq!(frame.len(), LED_COUNT * 2);
        assert!(frame.iter().all(|b| *b == 0));

        let _ = fs::remove_dir_all(&dir);
    }
}
