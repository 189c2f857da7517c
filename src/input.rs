use crate::keys::{Direction, KeyId};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Which mouse-driven trigger flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSide {
    /// Left mouse button.
    Fire,
    /// Right mouse button.
    Aim,
}

/// Pending mouse displacement as two f32s packed into one word, so that
/// drain-and-zero is a single `swap` and an accumulation is a single CAS.
struct MouseAccumulator(AtomicU64);

fn pack(dx: f32, dy: f32) -> u64 {
    ((dx.to_bits() as u64) << 32) | dy.to_bits() as u64
}

fn unpack(bits: u64) -> (f32, f32) {
    (f32::from_bits((bits >> 32) as u32), f32::from_bits(bits as u32))
}

impl MouseAccumulator {
    fn new() -> Self {
        Self(AtomicU64::new(pack(0.0, 0.0)))
    }

    fn add(&self, dx: f32, dy: f32) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let (x, y) = unpack(bits);
                Some(pack(x + dx, y + dy))
            });
    }

    fn drain(&self) -> (f32, f32) {
        unpack(self.0.swap(pack(0.0, 0.0), Ordering::AcqRel))
    }
}

/// Input state shared between capture threads (writers) and the scheduler
/// (reader/drainer). No operation blocks beyond a short critical section.
pub struct InputState {
    mouse: MouseAccumulator,
    held_keys: Mutex<HashSet<KeyId>>,
    joystick: [AtomicBool; 4],
    fire: AtomicBool,
    aim: AtomicBool,
}

impl InputState {
    pub fn new() -> Self {
        Self {
            mouse: MouseAccumulator::new(),
            held_keys: Mutex::new(HashSet::new()),
            joystick: Default::default(),
            fire: AtomicBool::new(false),
            aim: AtomicBool::new(false),
        }
    }

    pub fn accumulate_mouse(&self, dx: f32, dy: f32) {
        self.mouse.add(dx, dy);
    }

    /// Drain accumulated deltas, returning (dx, dy) and resetting to zero.
    pub fn drain_mouse(&self) -> (f32, f32) {
        self.mouse.drain()
    }

    pub fn set_key(&self, key: &KeyId, pressed: bool) {
        let mut held = self.held_keys.lock();
        if pressed {
            held.insert(key.clone());
        } else {
            held.remove(key);
        }
    }

    pub fn is_key_held(&self, key: &KeyId) -> bool {
        self.held_keys.lock().contains(key)
    }

    pub fn set_joystick_key(&self, dir: Direction, pressed: bool) {
        self.joystick[dir.index()].store(pressed, Ordering::SeqCst);
    }

    pub fn is_joystick_key_held(&self, dir: Direction) -> bool {
        self.joystick[dir.index()].load(Ordering::SeqCst)
    }

    pub fn set_trigger(&self, side: TriggerSide, pressed: bool) {
        self.trigger(side).store(pressed, Ordering::SeqCst);
    }

    pub fn is_trigger_held(&self, side: TriggerSide) -> bool {
        self.trigger(side).load(Ordering::SeqCst)
    }

    fn trigger(&self, side: TriggerSide) -> &AtomicBool {
        match side {
            TriggerSide::Fire => &self.fire,
            TriggerSide::Aim => &self.aim,
        }
    }

    /// Forget every held key, direction and trigger. Pending mouse
    /// displacement is discarded as well.
    pub fn clear(&self) {
        self.held_keys.lock().clear();
        for flag in &self.joystick {
            flag.store(false, Ordering::SeqCst);
        }
        self.fire.store(false, Ordering::SeqCst);
        self.aim.store(false, Ordering::SeqCst);
        self.mouse.drain();
    }
}

impl Default for InputState {
    fn default() -> Self {
        Self::new()
    }
}
