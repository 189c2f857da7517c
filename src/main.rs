mod axis;
mod buttons;
mod capture;
mod config;
mod controller;
mod cursor;
mod handler;
mod input;
mod keys;
mod scheduler;
mod settings;
#[cfg(test)]
mod testing;
mod virtual_pad;

use capture::{find_devices, spawn_reader, SuppressionPolicy};
use clap::Parser;
use config::{Config, EditCommand};
use controller::Controller;
use cursor::GrabbedCursor;
use handler::{InputHandler, InputSink, ToggleSignal};
use input::InputState;
use keys::KeyId;
use scheduler::LoopControl;
use settings::{Settings, SettingsHandle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use virtual_pad::VirtualPad;

static QUIT: AtomicBool = AtomicBool::new(false);
static RELOAD: AtomicBool = AtomicBool::new(false);
pub(crate) static TOGGLE: ToggleSignal = ToggleSignal::new();

fn main() {
    // Handle "kbm2joy toggle" / "quit" / "reload" before clap parsing.
    // These send a signal to the running instance and exit immediately.
    if let Some(cmd) = std::env::args().nth(1) {
        match cmd.as_str() {
            "toggle" => {
                send_to_running(libc::SIGUSR1, "Toggle");
                return;
            }
            "quit" => {
                send_to_running(libc::SIGTERM, "Quit");
                return;
            }
            "reload" => {
                send_to_running(libc::SIGHUP, "Reload");
                return;
            }
            _ => {}
        }
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config = Config::parse();

    if let Some(command) = &config.command {
        let Some(path) = &config.config else {
            log::error!("Editing settings needs a settings file (--config)");
            std::process::exit(1);
        };
        edit_settings(path, command);
        return;
    }

    let mut settings = match &config.config {
        Some(path) => match Settings::load(path) {
            Ok(s) => s,
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        },
        None => Settings::default(),
    };
    if let Some(rate) = config.rate {
        settings.tunables.tick_rate_hz = rate;
    }

    if config.print_config {
        match settings.validate().and_then(|()| settings.to_toml_string()) {
            Ok(text) => print!("{}", text),
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let settings = match SettingsHandle::new(settings) {
        Ok(h) => h,
        Err(e) => {
            log::error!("Invalid settings: {}", e);
            std::process::exit(1);
        }
    };

    {
        let s = settings.snapshot();
        println!("kbm2joy - Keyboard+Mouse to Gamepad");
        println!("  Update rate: {} Hz", s.tunables.tick_rate_hz);
        println!("  Toggle key:  {}", s.mapping.toggle_key);
        println!("  Recoil:      {}", if s.tunables.recoil_enabled { "on" } else { "off" });
        println!();
    }

    signal_setup();

    let (mice, keyboards) = if config.mouse.is_empty() && config.keyboard.is_empty() {
        let found = find_devices();
        (found.mice, found.keyboards)
    } else {
        (config.mouse.clone(), config.keyboard.clone())
    };
    let devices = unique_devices(mice.into_iter().chain(keyboards));
    if devices.is_empty() {
        log::error!("No input devices found. Are you in the 'input' group?");
        log::error!("Try: sudo usermod -aG input $USER (then re-login)");
        std::process::exit(1);
    }

    let input = Arc::new(InputState::new());
    let active = Arc::new(AtomicBool::new(false));
    let sink: Arc<dyn InputSink> = Arc::new(InputHandler::new(
        Arc::clone(&input),
        settings.clone(),
        &TOGGLE,
        Arc::clone(&active),
    ));
    let policy = Arc::new(SuppressionPolicy::new(settings.clone()));
    let stop = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for path in devices {
        let label = path.display().to_string();
        match spawn_reader(path, Arc::clone(&sink), Arc::clone(&policy), Arc::clone(&stop)) {
            Ok(handle) => readers.push(handle),
            Err(e) => log::error!("Failed to spawn reader for {}: {}", label, e),
        }
    }

    let mut controller = Controller::new(
        Box::new(VirtualPad::new),
        input,
        settings,
        active,
        policy,
        Box::new(GrabbedCursor),
    );

    // Create the pad up front so consumers can enumerate it before the
    // first activation. Activation retries on failure.
    if let Err(e) = controller.init_device() {
        log::error!("{}", e);
        log::error!("Do you have /dev/uinput access? Try: sudo modprobe uinput");
    }

    println!("Toggle: press the toggle key, or run `kbm2joy toggle`");
    println!("Reload: kbm2joy reload");
    println!("Quit:   kbm2joy quit");
    println!();

    scheduler::run(
        &mut controller,
        &LoopControl {
            quit: &QUIT,
            toggle: &TOGGLE,
            reload: &RELOAD,
            settings_path: config.config.as_deref(),
            debug: config.debug,
        },
    );

    log::info!("Shutting down...");
    controller.shutdown();
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        let _ = reader.join();
    }
    log::info!("Done");
}

/// One reader per device node, even if it was listed twice.
fn unique_devices(paths: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut devices: Vec<PathBuf> = Vec::new();
    for path in paths {
        if !devices.contains(&path) {
            devices.push(path);
        }
    }
    devices
}

fn edit_settings(path: &Path, command: &EditCommand) {
    let result = Settings::edit_file(path, |handle| match command {
        EditCommand::Remap { old, new } => {
            handle.update(|s| s.mapping.remap(&KeyId::new(old), KeyId::new(new)))
        }
        EditCommand::SetToggle { key } => {
            handle.update(|s| s.mapping.set_toggle_key(KeyId::new(key)))
        }
        EditCommand::ResetDefaults => {
            handle.reset_to_defaults();
            Ok(())
        }
    });
    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
    log::info!("Saved {}", path.display());

    if let Some(pid) = find_running_instance() {
        if unsafe { libc::kill(pid, libc::SIGHUP) } == 0 {
            log::info!("Asked kbm2joy (pid {}) to reload", pid);
        } else {
            log::warn!("Failed to signal kbm2joy (pid {}); run `kbm2joy reload`", pid);
        }
    }
}

fn signal_setup() {
    unsafe {
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGUSR1, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGHUP, signal_handler as libc::sighandler_t);
    }
}

extern "C" fn signal_handler(sig: libc::c_int) {
    match sig {
        libc::SIGUSR1 => TOGGLE.request(),
        libc::SIGHUP => RELOAD.store(true, Ordering::Relaxed),
        _ => QUIT.store(true, Ordering::Relaxed),
    }
}

/// Find PID of a running kbm2joy instance by scanning /proc.
fn find_running_instance() -> Option<i32> {
    let my_pid = std::process::id() as i32;
    for entry in std::fs::read_dir("/proc").ok()? {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let pid: i32 = match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            Some(p) => p,
            None => continue,
        };
        if pid == my_pid {
            continue;
        }
        if let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) {
            if comm.trim() == "kbm2joy" {
                return Some(pid);
            }
        }
    }
    None
}

/// Send a signal to the running kbm2joy instance, or exit with an error.
fn send_to_running(sig: libc::c_int, action: &str) {
    match find_running_instance() {
        Some(pid) => {
            let ret = unsafe { libc::kill(pid, sig) };
            if ret == 0 {
                eprintln!("{} sent to kbm2joy (pid {})", action, pid);
            } else {
                eprintln!("Failed to send signal to kbm2joy (pid {})", pid);
                std::process::exit(1);
            }
        }
        None => {
            eprintln!("No running kbm2joy instance found");
            std::process::exit(1);
        }
    }
}
