//! Activation state machine and the per-tick mapping pipeline.

use crate::axis::{movement_stick, LookStick};
use crate::buttons::{button_states, trigger_values};
use crate::capture::SuppressionControl;
use crate::cursor::CursorControl;
use crate::input::InputState;
use crate::settings::{SettingsHandle, WakeHandshake};
use crate::virtual_pad::{DeviceError, Gamepad, Side};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub type PadFactory<P> = Box<dyn FnMut() -> Result<P, DeviceError> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Inactive,
    Active,
}

/// What the look pipeline saw and produced during one active tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutput {
    pub raw: (f32, f32),
    pub look: (f32, f32),
}

/// Owns the virtual pad. Only the scheduler thread drives it, so at most
/// one transition or tick runs at a time.
pub struct Controller<P: Gamepad> {
    pad: Option<P>,
    factory: PadFactory<P>,
    state: ActivationState,
    active: Arc<AtomicBool>,
    input: Arc<InputState>,
    settings: SettingsHandle,
    look: LookStick,
    suppression: Arc<dyn SuppressionControl>,
    cursor: Box<dyn CursorControl>,
}

impl<P: Gamepad> Controller<P> {
    pub fn new(
        factory: PadFactory<P>,
        input: Arc<InputState>,
        settings: SettingsHandle,
        active: Arc<AtomicBool>,
        suppression: Arc<dyn SuppressionControl>,
        cursor: Box<dyn CursorControl>,
    ) -> Self {
        Self {
            pad: None,
            factory,
            state: ActivationState::Inactive,
            active,
            input,
            settings,
            look: LookStick::new(),
            suppression,
            cursor,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ActivationState {
        self.state
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn tick_period(&self) -> Duration {
        self.settings.snapshot().tunables.tick_period()
    }

    #[cfg(test)]
    pub fn pad(&self) -> Option<&P> {
        self.pad.as_ref()
    }

    /// Create the virtual pad if it does not exist yet.
    pub fn init_device(&mut self) -> Result<(), DeviceError> {
        if self.pad.is_none() {
            self.pad = Some((self.factory)()?);
        }
        Ok(())
    }

    pub fn toggle(&mut self) -> bool {
        match self.state {
            ActivationState::Inactive => self.activate(),
            ActivationState::Active => {
                self.deactivate();
                true
            }
        }
    }

    /// Returns `false` if the virtual pad could not be created; the state
    /// then stays inactive.
    pub fn activate(&mut self) -> bool {
        if self.state == ActivationState::Active {
            return true;
        }
        log::info!("Activating controller mode");

        if let Err(e) = self.init_device() {
            log::error!("{}", e);
            log::error!("Do you have /dev/uinput access? Try: sudo modprobe uinput");
            return false;
        }

        // Wake the consumer before host input disappears.
        let wake = self.settings.snapshot().tunables.wake.clone();
        self.wake(&wake);

        self.suppression.set_suppressed(true);
        if let Err(e) = self.cursor.lock_to_center() {
            log::warn!("Cursor not locked: {}", e);
        }
        if let Err(e) = self.cursor.hide() {
            log::warn!("Cursor not hidden: {}", e);
        }

        self.input.drain_mouse();
        self.look.reset();
        self.state = ActivationState::Active;
        self.active.store(true, Ordering::Release);
        log::info!("Controller mode active");
        true
    }

    pub fn deactivate(&mut self) {
        if self.state == ActivationState::Inactive {
            return;
        }
        log::info!("Deactivating controller mode");

        self.state = ActivationState::Inactive;
        self.active.store(false, Ordering::Release);

        self.reset_pad();
        self.input.clear();
        self.look.reset();

        self.suppression.set_suppressed(false);
        if let Err(e) = self.cursor.show() {
            log::warn!("Cursor not shown: {}", e);
        }
        log::info!("Normal input restored");
    }

    fn wake(&mut self, wake: &WakeHandshake) {
        let Some(pad) = self.pad.as_mut() else {
            return;
        };
        let pause = wake.pause();
        for _ in 0..wake.repetitions {
            pad.set_stick(Side::Right, wake.stick_x, 0.0);
            pad.press(wake.button);
            if let Err(e) = pad.flush() {
                log::warn!("Wake-up flush failed: {}", e);
            }
            spin_sleep::sleep(pause);

            pad.set_stick(Side::Right, 0.0, 0.0);
            pad.release(wake.button);
            if let Err(e) = pad.flush() {
                log::warn!("Wake-up flush failed: {}", e);
            }
            spin_sleep::sleep(pause);
        }
        if wake.repetitions > 0 {
            log::info!("Sent wake-up signal to the virtual gamepad");
        }
    }

    fn reset_pad(&mut self) {
        if let Some(pad) = self.pad.as_mut() {
            pad.reset_all();
            if let Err(e) = pad.flush() {
                log::error!("Failed to reset gamepad: {}", e);
            }
        }
    }

    /// One scheduler tick. Live input is mapped only while active, but the
    /// pad is flushed every tick so it stays connected.
    pub fn tick(&mut self) -> Result<Option<TickOutput>, DeviceError> {
        let Some(pad) = self.pad.as_mut() else {
            return Ok(None);
        };
        let mut output = None;

        if self.state == ActivationState::Active {
            let settings = self.settings.snapshot();

            let (lx, ly) = movement_stick(&self.input);
            pad.set_stick(Side::Left, lx, ly);

            let raw = self.input.drain_mouse();
            let look = self.look.update_from(raw, &self.input, &settings.tunables);
            pad.set_stick(Side::Right, look.0, look.1);

            for (button, held) in button_states(&settings.mapping, &self.input) {
                if held {
                    pad.press(button);
                } else {
                    pad.release(button);
                }
            }

            let triggers = trigger_values(&self.input);
            pad.set_trigger(Side::Left, triggers.left);
            pad.set_trigger(Side::Right, triggers.right);

            output = Some(TickOutput { raw, look });
        }

        pad.flush()?;
        Ok(output)
    }

    /// Force the inactive state, neutralize the pad and release it.
    pub fn shutdown(&mut self) {
        self.deactivate();
        if let Some(mut pad) = self.pad.take() {
            pad.reset_all();
            if let Err(e) = pad.flush() {
                log::warn!("Final gamepad flush failed: {}", e);
            }
        }
        log::info!("Controller shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buttons::Button;
    use crate::input::TriggerSide;
    use crate::keys::{Direction, KeyId};
    use crate::settings::Settings;
    use crate::testing::{CursorCall, RecordingCursor, RecordingPad, RecordingSuppression, PadEvent};
    use parking_lot::Mutex;

    struct Harness {
        controller: Controller<RecordingPad>,
        input: Arc<InputState>,
        active: Arc<AtomicBool>,
        suppression: Arc<RecordingSuppression>,
        cursor: Arc<Mutex<Vec<CursorCall>>>,
        created: Arc<Mutex<u32>>,
    }

    fn quiet_settings() -> Settings {
        let mut s = Settings::default();
        s.tunables.wake.pause_ms = 0;
        s.tunables.recoil_enabled = false;
        s
    }

    fn harness_with(settings: Settings, fail_create: bool) -> Harness {
        let input = Arc::new(InputState::new());
        let active = Arc::new(AtomicBool::new(false));
        let suppression = Arc::new(RecordingSuppression::default());
        let cursor = RecordingCursor::default();
        let cursor_log = cursor.calls();
        let created = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&created);
        let factory: PadFactory<RecordingPad> = Box::new(move || {
            if fail_create {
                return Err(DeviceError::Create(std::io::Error::from(
                    std::io::ErrorKind::PermissionDenied,
                )));
            }
            *counter.lock() += 1;
            Ok(RecordingPad::default())
        });
        let controller = Controller::new(
            factory,
            Arc::clone(&input),
            SettingsHandle::new(settings).unwrap(),
            Arc::clone(&active),
            suppression.clone(),
            Box::new(cursor),
        );
        Harness {
            controller,
            input,
            active,
            suppression,
            cursor: cursor_log,
            created,
        }
    }

    fn harness() -> Harness {
        harness_with(quiet_settings(), false)
    }

    #[test]
    fn starts_inactive_without_a_device() {
        let mut h = harness();
        assert_eq!(h.controller.state(), ActivationState::Inactive);
        assert_eq!(h.controller.tick().unwrap(), None);
        assert!(h.controller.pad().is_none());
    }

    #[test]
    fn activation_wakes_then_suppresses() {
        let mut h = harness();
        assert!(h.controller.activate());
        assert_eq!(h.controller.state(), ActivationState::Active);
        assert!(h.active.load(Ordering::Acquire));
        assert_eq!(h.suppression.calls(), vec![true]);
        assert_eq!(*h.cursor.lock(), vec![CursorCall::Lock, CursorCall::Hide]);

        let pad = h.controller.pad().unwrap();
        // press, release per repetition, each followed by a flush
        let presses = pad
            .events()
            .iter()
            .filter(|e| **e == PadEvent::Press(Button::Back))
            .count();
        assert_eq!(presses, 2);
        assert_eq!(pad.flushes(), 4);
        let state = pad.state();
        assert_eq!(state.right_stick, (0.0, 0.0));
        assert!(!state.pressed.contains(&Button::Back));
    }

    #[test]
    fn activating_twice_is_a_noop() {
        let mut h = harness();
        assert!(h.controller.activate());
        let flushes = h.controller.pad().unwrap().flushes();
        assert!(h.controller.activate());
        assert_eq!(h.suppression.calls(), vec![true]);
        assert_eq!(h.controller.pad().unwrap().flushes(), flushes);
        assert_eq!(*h.created.lock(), 1);
    }

    #[test]
    fn deactivating_while_inactive_is_a_noop() {
        let mut h = harness();
        h.controller.deactivate();
        assert!(h.suppression.calls().is_empty());
        assert!(h.cursor.lock().is_empty());
    }

    #[test]
    fn failed_device_creation_keeps_inactive() {
        let mut h = harness_with(quiet_settings(), true);
        assert!(!h.controller.activate());
        assert_eq!(h.controller.state(), ActivationState::Inactive);
        assert!(!h.active.load(Ordering::Acquire));
        assert!(h.suppression.calls().is_empty());
    }

    #[test]
    fn active_tick_maps_live_input() {
        let mut h = harness();
        h.controller.activate();
        h.input.set_joystick_key(Direction::Forward, true);
        h.input.set_key(&KeyId::new("space"), true);
        h.input.set_trigger(TriggerSide::Fire, true);
        h.input.accumulate_mouse(10.0, 0.0);

        let out = h.controller.tick().unwrap().unwrap();
        assert_eq!(out.raw, (10.0, 0.0));

        let state = h.controller.pad().unwrap().state();
        assert_eq!(state.left_stick, (0.0, 1.0));
        assert!((state.right_stick.0 - 0.13).abs() < 1e-5);
        assert!(state.pressed.contains(&Button::A));
        assert_eq!(state.triggers, (0.0, 1.0));

        // The movement was drained.
        let out = h.controller.tick().unwrap().unwrap();
        assert_eq!(out.raw, (0.0, 0.0));
    }

    #[test]
    fn inactive_tick_still_flushes() {
        let mut h = harness();
        h.controller.init_device().unwrap();
        h.input.set_key(&KeyId::new("space"), true);
        assert_eq!(h.controller.tick().unwrap(), None);
        let pad = h.controller.pad().unwrap();
        assert_eq!(pad.flushes(), 1);
        assert!(pad.state().pressed.is_empty());
    }

    #[test]
    fn deactivation_neutralizes_everything() {
        let mut h = harness();
        h.controller.activate();
        h.input.set_joystick_key(Direction::Left, true);
        h.input.set_key(&KeyId::new("q"), true);
        h.input.set_key(&KeyId::new("e"), true);
        h.input.set_trigger(TriggerSide::Aim, true);
        h.input.set_trigger(TriggerSide::Fire, true);
        h.input.accumulate_mouse(-30.0, 12.0);
        h.controller.tick().unwrap();
        assert!(!h.controller.pad().unwrap().state().pressed.is_empty());

        h.controller.deactivate();
        assert_eq!(h.controller.state(), ActivationState::Inactive);
        assert!(!h.active.load(Ordering::Acquire));
        let state = h.controller.pad().unwrap().state();
        assert_eq!(state.left_stick, (0.0, 0.0));
        assert_eq!(state.right_stick, (0.0, 0.0));
        assert!(state.pressed.is_empty());
        assert_eq!(state.triggers, (0.0, 0.0));

        assert!(!h.input.is_key_held(&KeyId::new("q")));
        assert!(!h.input.is_joystick_key_held(Direction::Left));
        assert!(!h.input.is_trigger_held(TriggerSide::Fire));
        assert_eq!(h.suppression.calls(), vec![true, false]);
        assert_eq!(h.cursor.lock().last(), Some(&CursorCall::Show));
    }

    #[test]
    fn reactivation_starts_neutral() {
        let mut settings = quiet_settings();
        settings.tunables.smoothing = 0.5;
        let mut h = harness_with(settings, false);
        h.controller.activate();
        h.input.accumulate_mouse(50.0, 50.0);
        h.controller.tick().unwrap();
        h.controller.deactivate();

        h.controller.activate();
        let out = h.controller.tick().unwrap().unwrap();
        assert_eq!(out.look, (0.0, 0.0));
        let state = h.controller.pad().unwrap().state();
        assert_eq!(state.left_stick, (0.0, 0.0));
        assert!(state.pressed.is_empty());
        assert_eq!(state.triggers, (0.0, 0.0));
    }

    #[test]
    fn remap_releases_the_old_binding_next_tick() {
        let mut h = harness();
        h.controller.activate();
        h.input.set_key(&KeyId::new("c"), true);
        h.input.set_key(&KeyId::new("space"), true);
        h.controller.tick().unwrap();
        let state = h.controller.pad().unwrap().state();
        assert!(state.pressed.contains(&Button::B));

        h.controller
            .settings()
            .update(|s| s.mapping.remap(&KeyId::new("c"), KeyId::new("x")))
            .unwrap();
        h.controller.tick().unwrap();
        let state = h.controller.pad().unwrap().state();
        assert!(!state.pressed.contains(&Button::B));
        assert!(state.pressed.contains(&Button::A));
    }

    #[test]
    fn tunables_apply_on_next_tick() {
        let mut h = harness();
        h.controller.activate();
        h.input.accumulate_mouse(10.0, 0.0);
        let before = h.controller.tick().unwrap().unwrap().look.0;

        h.controller
            .settings()
            .update(|s| {
                s.tunables.sens_x = 2.0;
                Ok(())
            })
            .unwrap();
        h.input.accumulate_mouse(10.0, 0.0);
        let after = h.controller.tick().unwrap().unwrap().look.0;
        assert!((after - 2.0 * before).abs() < 1e-5);
    }

    #[test]
    fn toggle_flips_state() {
        let mut h = harness();
        assert!(h.controller.toggle());
        assert_eq!(h.controller.state(), ActivationState::Active);
        assert!(h.controller.toggle());
        assert_eq!(h.controller.state(), ActivationState::Inactive);
    }

    #[test]
    fn flush_failure_is_reported_and_recovers() {
        let mut h = harness();
        h.controller.activate();
        h.controller.pad.as_mut().unwrap().fail_next_flush();
        assert!(h.controller.tick().is_err());
        assert_eq!(h.controller.state(), ActivationState::Active);
        assert!(h.controller.tick().is_ok());
    }

    #[test]
    fn shutdown_deactivates_and_drops_the_device() {
        let mut h = harness();
        h.controller.activate();
        h.input.set_key(&KeyId::new("space"), true);
        h.controller.shutdown();
        assert_eq!(h.controller.state(), ActivationState::Inactive);
        assert!(h.controller.pad().is_none());
        assert_eq!(h.suppression.calls(), vec![true, false]);
        assert!(!h.input.is_key_held(&KeyId::new("space")));
    }
}
