//! Startup shared by the `beltpack` and `basestation` binaries

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppConfig, Role};
use crate::hal::sim::{self, SimButtons, SimControls};
use crate::hal::{Button, Peripherals};
use crate::session::{RunFlag, Session, SessionExit};

/// `RUST_LOG` wins over the configured level
pub fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Config from the first argument, else the platform default location
pub fn load_config(role: Role) -> Result<AppConfig> {
    let path: Option<PathBuf> = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(AppConfig::default_path);

    let mut config = match &path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::default(),
    };
    config.apply_role(role);
    config.validate()?;
    Ok(config)
}

fn board(config: &AppConfig) -> Result<(Peripherals, SimControls)> {
    if config.device.simulate_hardware {
        return Ok(sim::peripherals(config));
    }

    #[cfg(feature = "host-audio")]
    {
        Ok(crate::hal::host::peripherals(config)?)
    }
    #[cfg(not(feature = "host-audio"))]
    {
        anyhow::bail!("built without host-audio; set device.simulate_hardware = true")
    }
}

#[cfg(feature = "host-audio")]
fn print_devices(sample_rate: u32) {
    println!("\n=== Available Audio Devices ===");
    for device in crate::audio::list_devices(sample_rate) {
        let kind = if device.is_input { "Input" } else { "Output" };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        let rate = if device.supports_rate { "" } else { " (rate unsupported)" };
        println!("  {} ({}){}{}", device.name, kind, default_marker, rate);
        println!("    ID: {}", device.id);
    }
    println!();
}

/// Drive the simulated buttons from the terminal.
///
/// `p` toggles PTT, `c` toggles call. The board is swapped after every
/// deep-sleep restart, so the handle is shared.
fn spawn_console(buttons: Arc<Mutex<Option<SimButtons>>>) {
    let spawned = thread::Builder::new().name("console".into()).spawn(move || {
        let mut ptt = false;
        let mut call = false;
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let guard = buttons.lock();
            let Some(buttons) = guard.as_ref() else { continue };

            let (button, pressed) = match line.trim() {
                "p" => {
                    ptt = !ptt;
                    (Button::Ptt, ptt)
                }
                "c" => {
                    call = !call;
                    (Button::Call, call)
                }
                _ => continue,
            };
            if pressed {
                buttons.press(button);
            } else {
                buttons.release(button);
            }
            println!("{:?} {}", button, if pressed { "down" } else { "up" });
        }
    });
    if let Err(e) = spawned {
        tracing::warn!("Console input unavailable: {}", e);
    }
}

/// Run sessions for `role` until Ctrl+C, restarting after deep sleep
pub async fn run(role: Role) -> Result<()> {
    let config = load_config(role)?;
    init_logging(&config.logging.level);

    tracing::info!("Starting {} ({})", role, crate::constants::VERSION);

    #[cfg(feature = "host-audio")]
    if !config.device.simulate_hardware {
        print_devices(config.audio.sample_rate);
    }

    let stop = RunFlag::new();
    let stop_on_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            stop_on_signal.stop();
        }
    });

    let console = Arc::new(Mutex::new(None));
    spawn_console(Arc::clone(&console));
    println!("Buttons: 'p' + Enter toggles PTT, 'c' + Enter toggles call, Ctrl+C quits");

    while stop.is_running() {
        let (peripherals, controls) = board(&config)?;
        *console.lock() = Some(controls.buttons.clone());

        let session = Session::new(config.clone(), peripherals, stop.clone())?;
        let exit = tokio::task::spawn_blocking(move || session.run())
            .await
            .context("session thread panicked")??;

        match exit {
            SessionExit::Shutdown => break,
            SessionExit::DeepSleep => tracing::info!("Re-initializing after deep sleep"),
        }
    }

    tracing::info!("{} stopped", role);
    Ok(())
}
