use crate::buttons::Button;
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{
    AbsInfo, AbsoluteAxisType, AttributeSet, BusType, EventType, InputEvent, InputId, Key,
    UinputAbsSetup,
};
use thiserror::Error;

const STICK_MIN: i32 = -32767;
const STICK_MAX: i32 = 32767;
const TRIGGER_MAX: i32 = 255;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to create virtual gamepad: {0}")]
    Create(#[source] std::io::Error),
    #[error("failed to emit gamepad events: {0}")]
    Emit(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Virtual gamepad sink. Setters only stage values; nothing reaches
/// consumers until `flush()`.
pub trait Gamepad {
    fn set_stick(&mut self, side: Side, x: f32, y: f32);
    fn press(&mut self, button: Button);
    fn release(&mut self, button: Button);
    fn set_trigger(&mut self, side: Side, value: f32);
    fn flush(&mut self) -> Result<(), DeviceError>;

    /// Stage neutral values on every channel.
    fn reset_all(&mut self) {
        self.set_stick(Side::Left, 0.0, 0.0);
        self.set_stick(Side::Right, 0.0, 0.0);
        for button in Button::ALL {
            self.release(button);
        }
        self.set_trigger(Side::Left, 0.0);
        self.set_trigger(Side::Right, 0.0);
    }
}

fn button_key(button: Button) -> Key {
    match button {
        Button::A => Key::BTN_SOUTH,
        Button::B => Key::BTN_EAST,
        Button::X => Key::BTN_NORTH,
        Button::Y => Key::BTN_WEST,
        Button::DpadUp => Key::BTN_DPAD_UP,
        Button::DpadDown => Key::BTN_DPAD_DOWN,
        Button::DpadLeft => Key::BTN_DPAD_LEFT,
        Button::DpadRight => Key::BTN_DPAD_RIGHT,
        Button::LeftShoulder => Key::BTN_TL,
        Button::RightShoulder => Key::BTN_TR,
        Button::Start => Key::BTN_START,
        Button::Back => Key::BTN_SELECT,
        Button::LeftThumb => Key::BTN_THUMBL,
        Button::RightThumb => Key::BTN_THUMBR,
        Button::Guide => Key::BTN_MODE,
    }
}

/// Float stick value to evdev range. Evdev Y grows downward, so callers
/// negate Y before converting.
fn stick_value(v: f32) -> i32 {
    ((v.clamp(-1.0, 1.0) * STICK_MAX as f32).round() as i32).clamp(STICK_MIN, STICK_MAX)
}

fn trigger_value(v: f32) -> i32 {
    (v.clamp(0.0, 1.0) * TRIGGER_MAX as f32).round() as i32
}

/// Staged report: raw evdev values for every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Report {
    axes: [i32; 6],
    buttons: [bool; 15],
}

const AXES: [AbsoluteAxisType; 6] = [
    AbsoluteAxisType::ABS_X,
    AbsoluteAxisType::ABS_Y,
    AbsoluteAxisType::ABS_RX,
    AbsoluteAxisType::ABS_RY,
    AbsoluteAxisType::ABS_Z,
    AbsoluteAxisType::ABS_RZ,
];

impl Report {
    /// Events needed to move from `prev` to `self`.
    fn diff(&self, prev: &Report) -> Vec<InputEvent> {
        let mut events = Vec::new();
        for (i, axis) in AXES.iter().enumerate() {
            if self.axes[i] != prev.axes[i] {
                events.push(InputEvent::new(EventType::ABSOLUTE, axis.0, self.axes[i]));
            }
        }
        for (i, button) in Button::ALL.iter().enumerate() {
            if self.buttons[i] != prev.buttons[i] {
                events.push(InputEvent::new(
                    EventType::KEY,
                    button_key(*button).code(),
                    self.buttons[i] as i32,
                ));
            }
        }
        events
    }

    fn button_slot(button: Button) -> usize {
        Button::ALL
            .iter()
            .position(|b| *b == button)
            .unwrap_or_default()
    }
}

/// uinput-backed Xbox-style gamepad.
pub struct VirtualPad {
    device: VirtualDevice,
    staged: Report,
    sent: Report,
}

impl VirtualPad {
    pub fn new() -> Result<Self, DeviceError> {
        Self::build().map_err(DeviceError::Create)
    }

    fn build() -> std::io::Result<Self> {
        let stick = |axis: AbsoluteAxisType| -> UinputAbsSetup {
            UinputAbsSetup::new(axis, AbsInfo::new(0, STICK_MIN, STICK_MAX, 16, 128, 1))
        };
        let trigger = |axis: AbsoluteAxisType| -> UinputAbsSetup {
            UinputAbsSetup::new(axis, AbsInfo::new(0, 0, TRIGGER_MAX, 0, 0, 1))
        };

        let mut keys = AttributeSet::<Key>::new();
        for button in Button::ALL {
            keys.insert(button_key(button));
        }

        let device = VirtualDeviceBuilder::new()?
            .name("kbm2joy Pad")
            .input_id(InputId::new(BusType::BUS_VIRTUAL, 0x045e, 0x028e, 1))
            .with_keys(&keys)?
            .with_absolute_axis(&stick(AbsoluteAxisType::ABS_X))?
            .with_absolute_axis(&stick(AbsoluteAxisType::ABS_Y))?
            .with_absolute_axis(&stick(AbsoluteAxisType::ABS_RX))?
            .with_absolute_axis(&stick(AbsoluteAxisType::ABS_RY))?
            .with_absolute_axis(&trigger(AbsoluteAxisType::ABS_Z))?
            .with_absolute_axis(&trigger(AbsoluteAxisType::ABS_RZ))?
            .build()?;

        log::info!("Created virtual gamepad");

        Ok(Self {
            device,
            staged: Report::default(),
            sent: Report::default(),
        })
    }
}

impl Gamepad for VirtualPad {
    fn set_stick(&mut self, side: Side, x: f32, y: f32) {
        let base = match side {
            Side::Left => 0,
            Side::Right => 2,
        };
        self.staged.axes[base] = stick_value(x);
        self.staged.axes[base + 1] = stick_value(-y);
    }

    fn press(&mut self, button: Button) {
        self.staged.buttons[Report::button_slot(button)] = true;
    }

    fn release(&mut self, button: Button) {
        self.staged.buttons[Report::button_slot(button)] = false;
    }

    fn set_trigger(&mut self, side: Side, value: f32) {
        let slot = match side {
            Side::Left => 4,
            Side::Right => 5,
        };
        self.staged.axes[slot] = trigger_value(value);
    }

    /// Emit changed channels followed by SYN_REPORT. With nothing changed a
    /// bare SYN_REPORT still goes out as a keepalive.
    fn flush(&mut self) -> Result<(), DeviceError> {
        let mut events = self.staged.diff(&self.sent);
        events.push(InputEvent::new(EventType::SYNCHRONIZATION, 0, 0));
        self.device.emit(&events).map_err(DeviceError::Emit)?;
        self.sent = self.staged;
        Ok(())
    }
}
