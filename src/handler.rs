use crate::input::{InputState, TriggerSide};
use crate::keys::{KeyId, MouseButton};
use crate::settings::SettingsHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Callbacks invoked by the capture layer from its own threads.
pub trait InputSink: Send + Sync {
    fn on_key_down(&self, key: &KeyId);
    fn on_key_up(&self, key: &KeyId);
    fn on_mouse_move(&self, dx: f32, dy: f32);
    fn on_mouse_button(&self, button: MouseButton, pressed: bool);
}

/// One-deep toggle request queue. Repeated requests before the scheduler
/// consumes them collapse into one.
#[derive(Default)]
pub struct ToggleSignal(AtomicBool);

impl ToggleSignal {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Routes capture events into `InputState`.
pub struct InputHandler {
    input: Arc<InputState>,
    settings: SettingsHandle,
    toggle: &'static ToggleSignal,
    active: Arc<AtomicBool>,
}

impl InputHandler {
    pub fn new(
        input: Arc<InputState>,
        settings: SettingsHandle,
        toggle: &'static ToggleSignal,
        active: Arc<AtomicBool>,
    ) -> Self {
        Self {
            input,
            settings,
            toggle,
            active,
        }
    }
}

impl InputSink for InputHandler {
    fn on_key_down(&self, key: &KeyId) {
        let settings = self.settings.snapshot();
        let mapping = &settings.mapping;

        if *key == mapping.toggle_key {
            log::info!(
                "Toggle key pressed (controller {})",
                if self.active.load(Ordering::Acquire) { "active" } else { "inactive" }
            );
            self.toggle.request();
            return;
        }

        if let Some(dir) = mapping.movement.direction_of(key) {
            self.input.set_joystick_key(dir, true);
        } else if mapping.button_for(key).is_some() {
            self.input.set_key(key, true);
        } else {
            log::trace!("Ignoring unmapped key '{}'", key);
        }
    }

    fn on_key_up(&self, key: &KeyId) {
        let settings = self.settings.snapshot();
        if let Some(dir) = settings.mapping.movement.direction_of(key) {
            self.input.set_joystick_key(dir, false);
        } else {
            // Unconditional so a key remapped while held cannot stay held.
            self.input.set_key(key, false);
        }
    }

    fn on_mouse_move(&self, dx: f32, dy: f32) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        self.input.accumulate_mouse(dx, dy);
    }

    fn on_mouse_button(&self, button: MouseButton, pressed: bool) {
        match button {
            MouseButton::Left => self.input.set_trigger(TriggerSide::Fire, pressed),
            MouseButton::Right => self.input.set_trigger(TriggerSide::Aim, pressed),
            MouseButton::Middle | MouseButton::Other => {}
        }
    }
}
