use crate::controller::{Controller, TickOutput};
use crate::handler::ToggleSignal;
use crate::virtual_pad::Gamepad;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Fixed-period tick gate. A late poll yields one tick, never a burst.
#[derive(Debug, Default)]
pub struct TickClock {
    last: Option<Instant>,
}

impl TickClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll(&mut self, now: Instant, period: Duration) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Time left until the next tick is due.
    pub fn remaining(&self, now: Instant, period: Duration) -> Duration {
        self.last
            .map(|last| (last + period).saturating_duration_since(now))
            .unwrap_or_default()
    }
}

/// Signals the loop reacts to between ticks.
pub struct LoopControl<'a> {
    pub quit: &'a AtomicBool,
    pub toggle: &'a ToggleSignal,
    pub reload: &'a AtomicBool,
    pub settings_path: Option<&'a Path>,
    pub debug: bool,
}

/// Debug summary printed every 100 ticks.
#[derive(Default)]
struct Diagnostics {
    ticks: u32,
    raw_dx: f32,
    raw_dy: f32,
    samples: u32,
    last_look: (f32, f32),
}

impl Diagnostics {
    fn record(&mut self, output: Option<TickOutput>) {
        if let Some(out) = output {
            self.raw_dx += out.raw.0;
            self.raw_dy += out.raw.1;
            if out.raw != (0.0, 0.0) {
                self.samples += 1;
            }
            self.last_look = out.look;
        }
        self.ticks += 1;
        if self.ticks >= 100 {
            if self.raw_dx != 0.0 || self.raw_dy != 0.0 || self.last_look != (0.0, 0.0) {
                log::debug!(
                    "raw({:+6.0},{:+6.0}) n={:<3} look({:+.3},{:+.3})",
                    self.raw_dx,
                    self.raw_dy,
                    self.samples,
                    self.last_look.0,
                    self.last_look.1,
                );
            }
            *self = Self::default();
        }
    }
}

fn reload<P: Gamepad>(controller: &Controller<P>, path: Option<&Path>) {
    let Some(path) = path else {
        log::warn!("Reload requested but no settings file was given (--config)");
        return;
    };
    match controller.settings().reload_from(path) {
        Ok(()) => log::info!("Reloaded settings from {}", path.display()),
        Err(e) => log::warn!("Keeping previous settings: {}", e),
    }
}

/// Run the fixed-rate loop until `quit` is set.
pub fn run<P: Gamepad>(controller: &mut Controller<P>, ctl: &LoopControl<'_>) {
    let mut clock = TickClock::new();
    let mut diagnostics = Diagnostics::default();
    let mut failing = false;

    loop {
        if ctl.quit.load(Ordering::Relaxed) {
            break;
        }
        if ctl.toggle.take() && !controller.toggle() {
            log::error!("Activation failed; staying inactive");
        }
        if ctl.reload.swap(false, Ordering::Relaxed) {
            reload(controller, ctl.settings_path);
        }

        let period = controller.tick_period();
        if clock.poll(Instant::now(), period) {
            match controller.tick() {
                Ok(output) => {
                    if failing {
                        log::info!("Gamepad updates recovered");
                        failing = false;
                    }
                    if ctl.debug {
                        diagnostics.record(output);
                    }
                }
                Err(e) => {
                    if !failing {
                        log::warn!("Gamepad update failed: {}", e);
                        failing = true;
                    }
                }
            }
        }

        spin_sleep::sleep(clock.remaining(Instant::now(), period));
    }
}
