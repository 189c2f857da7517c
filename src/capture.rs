//! evdev capture: device discovery, reader threads and grab-based
//! suppression.

use crate::handler::InputSink;
use crate::keys::{key_name, KeyId, MouseButton};
use crate::settings::SettingsHandle;
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{Device, EventType, InputEvent, InputEventKind, Key, RelativeAxisType};
use std::collections::HashSet;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Readers re-check suppression and stop requests at least this often.
const POLL_SLICE_MS: i32 = 20;

/// Device names created by this program; never captured.
const OWN_DEVICE_PREFIX: &str = "kbm2joy";

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Key { key: KeyId, pressed: bool },
    MouseMove { dx: f32, dy: f32 },
    MouseButton { button: MouseButton, pressed: bool },
}

/// Suppression requests from the controller.
pub trait SuppressionControl: Send + Sync {
    fn set_suppressed(&self, suppressed: bool);
}

/// Decides, per event, whether the host must not see it.
pub struct SuppressionPolicy {
    suppressed: AtomicBool,
    settings: SettingsHandle,
}

impl SuppressionPolicy {
    pub fn new(settings: SettingsHandle) -> Self {
        Self {
            suppressed: AtomicBool::new(false),
            settings,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::Acquire)
    }

    /// The toggle key is never suppressed.
    pub fn should_suppress(&self, event: &CaptureEvent) -> bool {
        if let CaptureEvent::Key { key, .. } = event {
            if *key == self.settings.snapshot().mapping.toggle_key {
                return false;
            }
        }
        self.is_suppressed()
    }
}

impl SuppressionControl for SuppressionPolicy {
    fn set_suppressed(&self, suppressed: bool) {
        let was = self.suppressed.swap(suppressed, Ordering::AcqRel);
        if was != suppressed {
            log::info!(
                "Input suppression {}",
                if suppressed { "enabled" } else { "disabled" }
            );
        }
    }
}

/// Translate one raw evdev event. Key auto-repeat and unknown codes
/// produce `None`.
pub fn translate(ev: &InputEvent) -> Option<CaptureEvent> {
    match ev.kind() {
        InputEventKind::Key(key) => {
            let pressed = match ev.value() {
                0 => false,
                1 => true,
                _ => return None,
            };
            if let Some(button) = MouseButton::from_evdev(key) {
                return Some(CaptureEvent::MouseButton { button, pressed });
            }
            match key_name(key) {
                Some(name) => Some(CaptureEvent::Key {
                    key: KeyId::new(name),
                    pressed,
                }),
                None => {
                    log::debug!("Dropping unrecognized key {:?}", key);
                    None
                }
            }
        }
        InputEventKind::RelAxis(RelativeAxisType::REL_X) => Some(CaptureEvent::MouseMove {
            dx: ev.value() as f32,
            dy: 0.0,
        }),
        InputEventKind::RelAxis(RelativeAxisType::REL_Y) => Some(CaptureEvent::MouseMove {
            dx: 0.0,
            dy: ev.value() as f32,
        }),
        _ => None,
    }
}

fn deliver(sink: &dyn InputSink, event: &CaptureEvent) {
    match event {
        CaptureEvent::Key { key, pressed: true } => sink.on_key_down(key),
        CaptureEvent::Key { key, pressed: false } => sink.on_key_up(key),
        CaptureEvent::MouseMove { dx, dy } => sink.on_mouse_move(*dx, *dy),
        CaptureEvent::MouseButton { button, pressed } => sink.on_mouse_button(*button, *pressed),
    }
}

fn is_mouse(device: &Device) -> bool {
    let has_rel = device.supported_relative_axes().is_some_and(|axes| {
        axes.contains(RelativeAxisType::REL_X) && axes.contains(RelativeAxisType::REL_Y)
    });
    let has_btn_left = device
        .supported_keys()
        .is_some_and(|keys| keys.contains(Key::BTN_LEFT));
    has_rel && has_btn_left
}

fn is_keyboard(device: &Device) -> bool {
    device.supported_keys().is_some_and(|keys| {
        keys.contains(Key::KEY_A) && keys.contains(Key::KEY_SPACE) && keys.contains(Key::KEY_ENTER)
    })
}

#[derive(Debug, Default)]
pub struct FoundDevices {
    pub mice: Vec<PathBuf>,
    pub keyboards: Vec<PathBuf>,
}

/// Enumerate /dev/input/event* for mice (REL_X, REL_Y, BTN_LEFT) and
/// keyboards (KEY_A, KEY_SPACE, KEY_ENTER).
pub fn find_devices() -> FoundDevices {
    let mut found = FoundDevices::default();
    for i in 0..64 {
        let path = PathBuf::from(format!("/dev/input/event{}", i));
        if !path.exists() {
            continue;
        }
        let Ok(device) = Device::open(&path) else {
            continue;
        };
        let name = device.name().unwrap_or("unknown");
        if name.starts_with(OWN_DEVICE_PREFIX) {
            continue;
        }
        // A combo node is listed once; its reader handles keys as well.
        if is_mouse(&device) {
            log::info!("Found mouse: {} at {}", name, path.display());
            found.mice.push(path);
        } else if is_keyboard(&device) {
            log::info!("Found keyboard: {} at {}", name, path.display());
            found.keyboards.push(path);
        }
    }
    found
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own; no memory is passed.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn wait_readable(fd: RawFd, timeout_ms: i32) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: pfd is a single valid pollfd for the duration of the call.
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret > 0)
}

/// Virtual keyboard that re-emits the events a grabbed keyboard must still
/// deliver to the host.
struct Passthrough {
    device: VirtualDevice,
    down: HashSet<u16>,
}

impl Passthrough {
    fn for_keyboard(source: &Device) -> io::Result<Option<Self>> {
        let Some(keys) = source.supported_keys() else {
            return Ok(None);
        };
        let device = VirtualDeviceBuilder::new()?
            .name("kbm2joy Passthrough")
            .with_keys(keys)?
            .build()?;
        Ok(Some(Self {
            device,
            down: HashSet::new(),
        }))
    }

    fn emit(&mut self, keys: &[InputEvent]) -> io::Result<()> {
        for ev in keys {
            if ev.value() == 0 {
                self.down.remove(&ev.code());
            } else {
                self.down.insert(ev.code());
            }
        }
        let mut events = keys.to_vec();
        events.push(InputEvent::new(EventType::SYNCHRONIZATION, 0, 0));
        self.device.emit(&events)
    }

    /// Release whatever was pressed through us, so nothing stays stuck once
    /// the real device is ungrabbed.
    fn release_all(&mut self) -> io::Result<()> {
        if self.down.is_empty() {
            return Ok(());
        }
        let mut events: Vec<_> = self
            .down
            .drain()
            .map(|code| InputEvent::new(EventType::KEY, code, 0))
            .collect();
        events.push(InputEvent::new(EventType::SYNCHRONIZATION, 0, 0));
        self.device.emit(&events)
    }
}

pub struct DeviceReader {
    device: Device,
    label: String,
    sink: Arc<dyn InputSink>,
    policy: Arc<SuppressionPolicy>,
    stop: Arc<AtomicBool>,
    passthrough: Option<Passthrough>,
    grabbed: bool,
}

impl DeviceReader {
    pub fn new(
        path: &Path,
        sink: Arc<dyn InputSink>,
        policy: Arc<SuppressionPolicy>,
        stop: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let device = Device::open(path)?;
        set_nonblocking(device.as_raw_fd())?;
        let label = format!("{} ({})", device.name().unwrap_or("unknown"), path.display());
        let passthrough = if is_keyboard(&device) {
            match Passthrough::for_keyboard(&device) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("No passthrough keyboard for {}: {}", label, e);
                    None
                }
            }
        } else {
            None
        };
        log::info!("Opened input device: {}", label);
        Ok(Self {
            device,
            label,
            sink,
            policy,
            stop,
            passthrough,
            grabbed: false,
        })
    }

    /// Run the event loop. Call from a dedicated thread.
    pub fn run(&mut self) {
        let fd = self.device.as_raw_fd();
        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            self.sync_grab();

            match wait_readable(fd, POLL_SLICE_MS) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("Error polling {}: {}", self.label, e);
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
            }

            let events: Vec<InputEvent> = match self.device.fetch_events() {
                Ok(iter) => iter.collect(),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                    log::warn!("Input device removed: {}", self.label);
                    break;
                }
                Err(e) => {
                    log::error!("Error reading {}: {}", self.label, e);
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
            };
            self.dispatch(&events);
        }

        if self.grabbed {
            self.set_grab(false);
        }
    }

    fn dispatch(&mut self, events: &[InputEvent]) {
        let mut dx = 0.0f32;
        let mut dy = 0.0f32;
        let mut passthrough = Vec::new();

        for ev in events {
            match translate(ev) {
                Some(CaptureEvent::MouseMove { dx: x, dy: y }) => {
                    dx += x;
                    dy += y;
                }
                Some(event) => {
                    if self.grabbed && !self.policy.should_suppress(&event) {
                        passthrough.push(*ev);
                    }
                    deliver(self.sink.as_ref(), &event);
                }
                None => {}
            }
        }

        // One accumulation per report keeps X and Y of a report together.
        if dx != 0.0 || dy != 0.0 {
            self.sink.on_mouse_move(dx, dy);
        }

        if !passthrough.is_empty() {
            if let Some(p) = self.passthrough.as_mut() {
                if let Err(e) = p.emit(&passthrough) {
                    log::warn!("Failed to pass keys through: {}", e);
                }
            }
        }
    }

    /// Bring the grab in line with the suppression flag. Grabbing waits
    /// until no key or button is down on the device, otherwise the host
    /// would never see those releases.
    fn sync_grab(&mut self) {
        let want = self.policy.is_suppressed();
        if want == self.grabbed {
            return;
        }
        if want {
            match self.device.get_key_state() {
                Ok(keys) if keys.iter().next().is_some() => return,
                Ok(_) => {}
                Err(e) => log::debug!("Key state unavailable for {}: {}", self.label, e),
            }
        }
        self.set_grab(want);
    }

    fn set_grab(&mut self, grab: bool) {
        if grab {
            match self.device.grab() {
                Ok(()) => log::info!("Grabbed {}", self.label),
                Err(e) => log::warn!("Failed to grab {}: {}", self.label, e),
            }
        } else {
            if let Err(e) = self.device.ungrab() {
                log::warn!("Failed to ungrab {}: {}", self.label, e);
            }
            if let Some(p) = self.passthrough.as_mut() {
                if let Err(e) = p.release_all() {
                    log::warn!("Failed to release passthrough keys: {}", e);
                }
            }
            log::info!("Released {}", self.label);
        }
        // A failed grab is not retried until suppression changes again.
        self.grabbed = grab;
    }
}

pub fn spawn_reader(
    path: PathBuf,
    sink: Arc<dyn InputSink>,
    policy: Arc<SuppressionPolicy>,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    let name = format!("reader-{}", path.file_name().unwrap_or_default().to_string_lossy());
    std::thread::Builder::new().name(name).spawn(move || {
        match DeviceReader::new(&path, sink, policy, stop) {
            Ok(mut reader) => reader.run(),
            Err(e) => {
                log::error!("Failed to open input device: {}", e);
                log::error!("Check permissions on {}", path.display());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    fn key_event(key: Key, value: i32) -> InputEvent {
        InputEvent::new(EventType::KEY, key.code(), value)
    }

    #[test]
    fn key_presses_translate_to_logical_keys() {
        assert_eq!(
            translate(&key_event(Key::KEY_W, 1)),
            Some(CaptureEvent::Key {
                key: KeyId::new("w"),
                pressed: true
            })
        );
        assert_eq!(
            translate(&key_event(Key::KEY_RIGHTSHIFT, 0)),
            Some(CaptureEvent::Key {
                key: KeyId::new("shift"),
                pressed: false
            })
        );
    }

    #[test]
    fn autorepeat_and_unknown_keys_are_dropped() {
        assert_eq!(translate(&key_event(Key::KEY_W, 2)), None);
        assert_eq!(translate(&key_event(Key::KEY_PROG1, 1)), None);
    }

    #[test]
    fn mouse_events_translate() {
        assert_eq!(
            translate(&key_event(Key::BTN_RIGHT, 1)),
            Some(CaptureEvent::MouseButton {
                button: MouseButton::Right,
                pressed: true
            })
        );
        let rel_y = InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_Y.0, -7);
        assert_eq!(
            translate(&rel_y),
            Some(CaptureEvent::MouseMove { dx: 0.0, dy: -7.0 })
        );
        let wheel = InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_WHEEL.0, 1);
        assert_eq!(translate(&wheel), None);
    }

    #[test]
    fn toggle_key_is_never_suppressed() {
        let settings = SettingsHandle::new(Settings::default()).unwrap();
        let policy = SuppressionPolicy::new(settings.clone());
        let toggle = CaptureEvent::Key {
            key: KeyId::new("t"),
            pressed: true,
        };
        let space = CaptureEvent::Key {
            key: KeyId::new("space"),
            pressed: true,
        };
        let motion = CaptureEvent::MouseMove { dx: 1.0, dy: 0.0 };

        assert!(!policy.should_suppress(&space));
        policy.set_suppressed(true);
        assert!(policy.should_suppress(&space));
        assert!(policy.should_suppress(&motion));
        assert!(!policy.should_suppress(&toggle));

        settings
            .update(|s| s.mapping.set_toggle_key(KeyId::new("f8")))
            .unwrap();
        assert!(policy.should_suppress(&toggle));
        let f8 = CaptureEvent::Key {
            key: KeyId::new("f8"),
            pressed: false,
        };
        assert!(!policy.should_suppress(&f8));
    }
}
