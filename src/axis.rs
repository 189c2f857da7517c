use crate::input::{InputState, TriggerSide};
use crate::keys::Direction;
use crate::settings::Tunables;

/// Movement stick from the four direction keys.
/// Diagonals are normalized so they are no faster than straight movement.
pub fn movement_stick(input: &InputState) -> (f32, f32) {
    let mut x = 0.0f32;
    let mut y = 0.0f32;
    for dir in Direction::ALL {
        if !input.is_joystick_key_held(dir) {
            continue;
        }
        match dir {
            Direction::Right => x += 1.0,
            Direction::Left => x -= 1.0,
            Direction::Forward => y += 1.0,
            Direction::Back => y -= 1.0,
        }
    }

    if x != 0.0 && y != 0.0 {
        let magnitude = (x * x + y * y).sqrt();
        x /= magnitude;
        y /= magnitude;
    }
    (x, y)
}

/// Look stick filter state. Only the scheduler tick touches it.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct LookStick {
    last_x: f32,
    last_y: f32,
}

impl LookStick {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn last(&self) -> (f32, f32) {
        (self.last_x, self.last_y)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Turn one tick's drained mouse displacement into stick values.
    ///
    /// Order matters: recoil is folded into `dy` before Y is inverted,
    /// the deadzone runs before smoothing, and clamping is last.
    pub fn update(&mut self, dx: f32, dy: f32, fire: bool, aim: bool, t: &Tunables) -> (f32, f32) {
        let mut dy = dy;
        if t.recoil_enabled && fire {
            dy += t.recoil_compensation;
        }

        let sens_multiplier = if aim { t.ads_multiplier } else { 1.0 };
        let mut rx = dx * t.sens_x * sens_multiplier * t.dpi_scaling;
        let mut ry = -(dy * t.sens_y * sens_multiplier * t.dpi_scaling);

        if rx.abs() <= t.deadzone {
            rx = 0.0;
        }
        if ry.abs() <= t.deadzone {
            ry = 0.0;
        }

        let s = t.smoothing;
        rx = self.last_x * s + rx * (1.0 - s);
        ry = self.last_y * s + ry * (1.0 - s);

        rx = rx.clamp(-1.0, 1.0);
        ry = ry.clamp(-1.0, 1.0);

        self.last_x = rx;
        self.last_y = ry;
        (rx, ry)
    }

    /// Convenience wrapper reading the trigger flags from `input`.
    pub fn update_from(&mut self, (dx, dy): (f32, f32), input: &InputState, t: &Tunables) -> (f32, f32) {
        let fire = input.is_trigger_held(TriggerSide::Fire);
        let aim = input.is_trigger_held(TriggerSide::Aim);
        self.update(dx, dy, fire, aim, t)
    }
}
