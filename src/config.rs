use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Linux keyboard+mouse to virtual gamepad remapper (evdev/uinput).
/// Press the toggle key (default: T) to switch controller mode on and off.
#[derive(Parser, Debug)]
#[command(name = "kbm2joy")]
pub struct Config {
    /// Settings file (TOML). Re-read on `kbm2joy reload`
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Mouse evdev device (e.g. /dev/input/event5). Repeatable; autodetected if omitted
    #[arg(short, long)]
    pub mouse: Vec<PathBuf>,

    /// Keyboard evdev device. Repeatable; autodetected if omitted
    #[arg(short, long)]
    pub keyboard: Vec<PathBuf>,

    /// Override the update rate in Hz (60-240)
    #[arg(short, long)]
    pub rate: Option<u32>,

    /// Print the effective settings as TOML and exit
    #[arg(long, default_value_t = false)]
    pub print_config: bool,

    /// Log drained mouse input and look stick output every 100 ticks
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<EditCommand>,
}

/// Edits applied to the `--config` file. A running instance is told to reload.
#[derive(Subcommand, Debug, PartialEq)]
pub enum EditCommand {
    /// Move the button bound to OLD onto NEW
    Remap { old: String, new: String },
    /// Change the key that toggles controller mode
    SetToggle { key: String },
    /// Restore default tunables and key mapping
    ResetDefaults,
}
