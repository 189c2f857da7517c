//! Test doubles for the controller's collaborators.

use crate::buttons::Button;
use crate::capture::SuppressionControl;
use crate::cursor::{CursorControl, CursorError};
use crate::virtual_pad::{DeviceError, Gamepad, Side};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum PadEvent {
    Stick(Side, f32, f32),
    Press(Button),
    Release(Button),
    Trigger(Side, f32),
    Flush,
}

/// Channel values as last flushed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PadState {
    pub left_stick: (f32, f32),
    pub right_stick: (f32, f32),
    pub pressed: BTreeSet<Button>,
    /// (left, right)
    pub triggers: (f32, f32),
}

#[derive(Default)]
pub struct RecordingPad {
    staged: PadState,
    committed: PadState,
    events: Vec<PadEvent>,
    flushes: usize,
    fail_next: bool,
}

impl RecordingPad {
    pub fn state(&self) -> &PadState {
        &self.committed
    }

    pub fn events(&self) -> &[PadEvent] {
        &self.events
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    pub fn fail_next_flush(&mut self) {
        self.fail_next = true;
    }
}

impl Gamepad for RecordingPad {
    fn set_stick(&mut self, side: Side, x: f32, y: f32) {
        match side {
            Side::Left => self.staged.left_stick = (x, y),
            Side::Right => self.staged.right_stick = (x, y),
        }
        self.events.push(PadEvent::Stick(side, x, y));
    }

    fn press(&mut self, button: Button) {
        self.staged.pressed.insert(button);
        self.events.push(PadEvent::Press(button));
    }

    fn release(&mut self, button: Button) {
        self.staged.pressed.remove(&button);
        self.events.push(PadEvent::Release(button));
    }

    fn set_trigger(&mut self, side: Side, value: f32) {
        match side {
            Side::Left => self.staged.triggers.0 = value,
            Side::Right => self.staged.triggers.1 = value,
        }
        self.events.push(PadEvent::Trigger(side, value));
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        if std::mem::take(&mut self.fail_next) {
            return Err(DeviceError::Emit(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        }
        self.committed = self.staged.clone();
        self.flushes += 1;
        self.events.push(PadEvent::Flush);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSuppression(Mutex<Vec<bool>>);

impl RecordingSuppression {
    pub fn calls(&self) -> Vec<bool> {
        self.0.lock().clone()
    }
}

impl SuppressionControl for RecordingSuppression {
    fn set_suppressed(&self, suppressed: bool) {
        self.0.lock().push(suppressed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorCall {
    Lock,
    Hide,
    Show,
}

#[derive(Default)]
pub struct RecordingCursor(Arc<Mutex<Vec<CursorCall>>>);

impl RecordingCursor {
    pub fn calls(&self) -> Arc<Mutex<Vec<CursorCall>>> {
        Arc::clone(&self.0)
    }
}

impl CursorControl for RecordingCursor {
    fn lock_to_center(&mut self) -> Result<(), CursorError> {
        self.0.lock().push(CursorCall::Lock);
        Ok(())
    }

    fn hide(&mut self) -> Result<(), CursorError> {
        self.0.lock().push(CursorCall::Hide);
        Ok(())
    }

    fn show(&mut self) -> Result<(), CursorError> {
        // Unsupported backends must not break deactivation.
        self.0.lock().push(CursorCall::Show);
        Err(CursorError::Unsupported)
    }
}
