//! Runtime settings: numeric tunables and the key mapping table.
//!
//! Settings are loaded from an optional TOML file and may be swapped at
//! runtime (reload, remap). Every change is validated first; a rejected
//! change leaves the previous settings in place.

use crate::buttons::Button;
use crate::keys::{Direction, KeyId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("{field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{0} must be a finite number")]
    NotFinite(&'static str),
    #[error("button {button:?} is mapped to both '{first}' and '{second}'")]
    DuplicateButton {
        button: Button,
        first: KeyId,
        second: KeyId,
    },
    #[error("key '{0}' is the toggle key")]
    ToggleKeyConflict(KeyId),
    #[error("key '{0}' is a movement key")]
    MovementKeyConflict(KeyId),
    #[error("movement key '{key}' is bound to both {first:?} and {second:?}")]
    DuplicateMovementKey {
        key: KeyId,
        first: Direction,
        second: Direction,
    },
    #[error("key '{0}' is already mapped")]
    AlreadyMapped(KeyId),
    #[error("key '{0}' is not mapped to any button")]
    NotMapped(KeyId),
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NotFinite(field));
    }
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Numeric tunables, read once per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Update rate in Hz (60-240)
    pub tick_rate_hz: u32,
    pub dpi_scaling: f32,
    pub sens_x: f32,
    pub sens_y: f32,
    /// Look sensitivity multiplier while aiming (0.1-2.0)
    pub ads_multiplier: f32,
    pub deadzone: f32,
    /// 0 = no smoothing, 1 = frozen output
    pub smoothing: f32,
    pub recoil_enabled: bool,
    /// Downward bias added to dy while firing (0.0-5.0)
    pub recoil_compensation: f32,
    pub wake: WakeHandshake,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            tick_rate_hz: 120,
            dpi_scaling: 0.013,
            sens_x: 1.0,
            sens_y: 1.0,
            ads_multiplier: 0.9,
            deadzone: 0.0012,
            smoothing: 0.0,
            recoil_enabled: true,
            recoil_compensation: 1.8,
            wake: WakeHandshake::default(),
        }
    }
}

impl Tunables {
    pub const TICK_RATE_RANGE: (u32, u32) = (60, 240);

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (lo, hi) = Self::TICK_RATE_RANGE;
        check_range("tick_rate_hz", self.tick_rate_hz as f64, lo as f64, hi as f64)?;
        check_range("dpi_scaling", self.dpi_scaling as f64, f64::MIN_POSITIVE, 1.0)?;
        check_range("sens_x", self.sens_x as f64, f64::MIN_POSITIVE, 10.0)?;
        check_range("sens_y", self.sens_y as f64, f64::MIN_POSITIVE, 10.0)?;
        check_range("ads_multiplier", self.ads_multiplier as f64, 0.1, 2.0)?;
        // deadzone must stay below full deflection
        check_range("deadzone", self.deadzone as f64, 0.0, 0.999)?;
        check_range("smoothing", self.smoothing as f64, 0.0, 1.0)?;
        check_range("recoil_compensation", self.recoil_compensation as f64, 0.0, 5.0)?;
        self.wake.validate()
    }
}

/// Synthetic activity sent once per activation so consumers notice the pad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeHandshake {
    pub repetitions: u32,
    pub pause_ms: u64,
    /// Right stick X deflection used while waking
    pub stick_x: f32,
    pub button: Button,
}

impl Default for WakeHandshake {
    fn default() -> Self {
        Self {
            repetitions: 2,
            pause_ms: 30,
            stick_x: 0.5,
            button: Button::Back,
        }
    }
}

impl WakeHandshake {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_range("wake.repetitions", self.repetitions as f64, 0.0, 10.0)?;
        check_range("wake.pause_ms", self.pause_ms as f64, 0.0, 500.0)?;
        check_range("wake.stick_x", self.stick_x as f64, -1.0, 1.0)
    }
}

/// Keys driving the movement stick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementKeys {
    pub forward: KeyId,
    pub back: KeyId,
    pub left: KeyId,
    pub right: KeyId,
}

impl Default for MovementKeys {
    fn default() -> Self {
        Self {
            forward: KeyId::new("w"),
            back: KeyId::new("s"),
            left: KeyId::new("a"),
            right: KeyId::new("d"),
        }
    }
}

impl MovementKeys {
    pub fn direction_of(&self, key: &KeyId) -> Option<Direction> {
        Direction::ALL
            .into_iter()
            .find(|&dir| self.key(dir) == key)
    }

    pub fn key(&self, dir: Direction) -> &KeyId {
        match dir {
            Direction::Forward => &self.forward,
            Direction::Back => &self.back,
            Direction::Left => &self.left,
            Direction::Right => &self.right,
        }
    }

    fn contains(&self, key: &KeyId) -> bool {
        self.direction_of(key).is_some()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (i, &first) in Direction::ALL.iter().enumerate() {
            for &second in &Direction::ALL[i + 1..] {
                if self.key(first) == self.key(second) {
                    return Err(ConfigError::DuplicateMovementKey {
                        key: self.key(first).clone(),
                        first,
                        second,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Key to button table plus the two distinguished key roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingTable {
    pub toggle_key: KeyId,
    pub movement: MovementKeys,
    pub buttons: BTreeMap<KeyId, Button>,
}

impl Default for MappingTable {
    fn default() -> Self {
        let buttons = [
            ("space", Button::A),
            ("c", Button::B),
            ("r", Button::X),
            ("1", Button::Y),
            ("2", Button::DpadUp),
            ("alt_l", Button::DpadDown),
            ("b", Button::DpadLeft),
            ("3", Button::DpadRight),
            ("q", Button::LeftShoulder),
            ("e", Button::RightShoulder),
            ("esc", Button::Start),
            ("tab", Button::Back),
            ("shift", Button::LeftThumb),
            ("f", Button::RightThumb),
        ]
        .into_iter()
        .map(|(k, b)| (KeyId::new(k), b))
        .collect();

        Self {
            toggle_key: KeyId::new("t"),
            movement: MovementKeys::default(),
            buttons,
        }
    }
}

impl MappingTable {
    pub fn button_for(&self, key: &KeyId) -> Option<Button> {
        self.buttons.get(key).copied()
    }

    pub fn key_for(&self, button: Button) -> Option<&KeyId> {
        self.buttons
            .iter()
            .find_map(|(k, &b)| (b == button).then_some(k))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.movement.validate()?;
        if self.movement.contains(&self.toggle_key) {
            return Err(ConfigError::MovementKeyConflict(self.toggle_key.clone()));
        }
        let mut seen: BTreeMap<Button, &KeyId> = BTreeMap::new();
        for (key, &button) in &self.buttons {
            if *key == self.toggle_key {
                return Err(ConfigError::ToggleKeyConflict(key.clone()));
            }
            if self.movement.contains(key) {
                return Err(ConfigError::MovementKeyConflict(key.clone()));
            }
            if let Some(first) = seen.insert(button, key) {
                return Err(ConfigError::DuplicateButton {
                    button,
                    first: first.clone(),
                    second: key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Move the button bound to `old_key` onto `new_key`.
    pub fn remap(&mut self, old_key: &KeyId, new_key: KeyId) -> Result<(), ConfigError> {
        if *old_key == new_key {
            return if self.buttons.contains_key(old_key) {
                Ok(())
            } else {
                Err(ConfigError::NotMapped(old_key.clone()))
            };
        }
        if new_key == self.toggle_key {
            return Err(ConfigError::ToggleKeyConflict(new_key));
        }
        if self.movement.contains(&new_key) {
            return Err(ConfigError::MovementKeyConflict(new_key));
        }
        if self.buttons.contains_key(&new_key) {
            return Err(ConfigError::AlreadyMapped(new_key));
        }
        let button = self
            .buttons
            .remove(old_key)
            .ok_or_else(|| ConfigError::NotMapped(old_key.clone()))?;
        self.buttons.insert(new_key, button);
        Ok(())
    }

    pub fn set_toggle_key(&mut self, key: KeyId) -> Result<(), ConfigError> {
        if self.buttons.contains_key(&key) {
            return Err(ConfigError::AlreadyMapped(key));
        }
        if self.movement.contains(&key) {
            return Err(ConfigError::MovementKeyConflict(key));
        }
        self.toggle_key = key;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tunables: Tunables,
    pub mapping: MappingTable,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tunables.validate()?;
        self.mapping.validate()
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = self.to_toml_string()?;
        std::fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `edit` to the settings file at `path` and write the result back.
    /// A missing file starts from the defaults. Nothing is written on error.
    pub fn edit_file<F>(path: &Path, edit: F) -> Result<Settings, ConfigError>
    where
        F: FnOnce(&SettingsHandle) -> Result<(), ConfigError>,
    {
        let current = match Self::load(path) {
            Ok(settings) => settings,
            Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => return Err(e),
        };
        let handle = SettingsHandle::new(current)?;
        edit(&handle)?;
        let next = Settings::clone(&handle.snapshot());
        next.save(path)?;
        Ok(next)
    }
}

/// Atomically swappable settings snapshot shared by all threads.
#[derive(Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Arc<Settings>>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(settings))),
        })
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        Arc::clone(&self.inner.read())
    }

    /// Replace the settings wholesale. On error the previous value is kept.
    pub fn replace(&self, settings: Settings) -> Result<(), ConfigError> {
        settings.validate()?;
        *self.inner.write() = Arc::new(settings);
        Ok(())
    }

    /// Edit a copy of the current settings and swap it in if it validates.
    pub fn update<F>(&self, edit: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut Settings) -> Result<(), ConfigError>,
    {
        let mut guard = self.inner.write();
        let mut next = Settings::clone(&guard);
        edit(&mut next)?;
        next.validate()?;
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn reset_to_defaults(&self) {
        *self.inner.write() = Arc::new(Settings::default());
    }

    pub fn reload_from(&self, path: &Path) -> Result<(), ConfigError> {
        let settings = Settings::load(path)?;
        self.replace(settings)
    }
}
