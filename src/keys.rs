use evdev::Key;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical key identifier, e.g. `"space"`, `"alt_l"`, `"w"`.
///
/// Always lower-case. Left and right shift are folded into `"shift"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct KeyId(String);

impl KeyId {
    pub fn new(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        let name = match name.as_str() {
            "shift_l" | "shift_r" | "lshift" | "rshift" => "shift".to_string(),
            "escape" => "esc".to_string(),
            _ => name,
        };
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for KeyId {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<&str> for KeyId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<KeyId> for String {
    fn from(k: KeyId) -> Self {
        k.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Movement stick directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Back,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Forward,
        Direction::Back,
        Direction::Left,
        Direction::Right,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Back => 1,
            Direction::Left => 2,
            Direction::Right => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other,
}

impl MouseButton {
    pub fn from_evdev(key: Key) -> Option<Self> {
        match key {
            Key::BTN_LEFT => Some(MouseButton::Left),
            Key::BTN_RIGHT => Some(MouseButton::Right),
            Key::BTN_MIDDLE => Some(MouseButton::Middle),
            Key::BTN_SIDE | Key::BTN_EXTRA | Key::BTN_FORWARD | Key::BTN_BACK => {
                Some(MouseButton::Other)
            }
            _ => None,
        }
    }
}

/// Translate an evdev keyboard code into its logical name.
/// Returns `None` for codes that have no logical name (they are dropped).
pub fn key_name(key: Key) -> Option<&'static str> {
    let name = match key {
        Key::KEY_A => "a",
        Key::KEY_B => "b",
        Key::KEY_C => "c",
        Key::KEY_D => "d",
        Key::KEY_E => "e",
        Key::KEY_F => "f",
        Key::KEY_G => "g",
        Key::KEY_H => "h",
        Key::KEY_I => "i",
        Key::KEY_J => "j",
        Key::KEY_K => "k",
        Key::KEY_L => "l",
        Key::KEY_M => "m",
        Key::KEY_N => "n",
        Key::KEY_O => "o",
        Key::KEY_P => "p",
        Key::KEY_Q => "q",
        Key::KEY_R => "r",
        Key::KEY_S => "s",
        Key::KEY_T => "t",
        Key::KEY_U => "u",
        Key::KEY_V => "v",
        Key::KEY_W => "w",
        Key::KEY_X => "x",
        Key::KEY_Y => "y",
        Key::KEY_Z => "z",
        Key::KEY_1 => "1",
        Key::KEY_2 => "2",
        Key::KEY_3 => "3",
        Key::KEY_4 => "4",
        Key::KEY_5 => "5",
        Key::KEY_6 => "6",
        Key::KEY_7 => "7",
        Key::KEY_8 => "8",
        Key::KEY_9 => "9",
        Key::KEY_0 => "0",
        Key::KEY_SPACE => "space",
        Key::KEY_TAB => "tab",
        Key::KEY_ESC => "esc",
        Key::KEY_ENTER => "enter",
        Key::KEY_BACKSPACE => "backspace",
        Key::KEY_CAPSLOCK => "caps_lock",
        Key::KEY_LEFTSHIFT | Key::KEY_RIGHTSHIFT => "shift",
        Key::KEY_LEFTCTRL => "ctrl_l",
        Key::KEY_RIGHTCTRL => "ctrl_r",
        Key::KEY_LEFTALT => "alt_l",
        Key::KEY_RIGHTALT => "alt_r",
        Key::KEY_GRAVE => "`",
        Key::KEY_MINUS => "-",
        Key::KEY_EQUAL => "=",
        Key::KEY_LEFTBRACE => "[",
        Key::KEY_RIGHTBRACE => "]",
        Key::KEY_SEMICOLON => ";",
        Key::KEY_APOSTROPHE => "'",
        Key::KEY_COMMA => ",",
        Key::KEY_DOT => ".",
        Key::KEY_SLASH => "/",
        Key::KEY_BACKSLASH => "\\",
        Key::KEY_UP => "up",
        Key::KEY_DOWN => "down",
        Key::KEY_LEFT => "left",
        Key::KEY_RIGHT => "right",
        Key::KEY_INSERT => "insert",
        Key::KEY_DELETE => "delete",
        Key::KEY_HOME => "home",
        Key::KEY_END => "end",
        Key::KEY_PAGEUP => "page_up",
        Key::KEY_PAGEDOWN => "page_down",
        Key::KEY_F1 => "f1",
        Key::KEY_F2 => "f2",
        Key::KEY_F3 => "f3",
        Key::KEY_F4 => "f4",
        Key::KEY_F5 => "f5",
        Key::KEY_F6 => "f6",
        Key::KEY_F7 => "f7",
        Key::KEY_F8 => "f8",
        Key::KEY_F9 => "f9",
        Key::KEY_F10 => "f10",
        Key::KEY_F11 => "f11",
        Key::KEY_F12 => "f12",
        _ => return None,
    };
    Some(name)
}
