//! perchd, host service for an animatronic songbird USB toy
//!
//! Drives the bird's motors and LEDs over vendor control transfers and
//! streams raw audio to its interrupt-out endpoint. One-shot subcommands
//! attach, act, and detach; `monitor` stays resident and follows hot-plug.

mod config;
mod logging;
mod monitor;
mod transport;

use anyhow::{Context as _, Result, anyhow};
use clap::{Parser, Subcommand};
use config::HostConfig;
use logging::setup_logging;
use monitor::{MonitorEvent, spawn_monitor};
use protocol::{ActuatorCommand, INT_OUT_FRAME_MAX};
use rusb::UsbContext;
use session::{CancelToken, LifecycleController, MinorId, SessionHandle, SessionRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use transport::{UsbBirdTransport, find_birds};

#[derive(Parser, Debug)]
#[command(name = "perchd")]
#[command(
    author,
    version,
    about = "Control an animatronic songbird USB toy"
)]
#[command(long_about = "
Host service for an animatronic songbird USB toy: motorized wings, beak and
head, two LEDs, and a 12 kHz raw-audio playback path.

EXAMPLES:
    # List plugged-in birds
    perchd list

    # Flap the wings
    perchd command flap

    # Make the bird talk (raw 12 kHz mono PCM)
    perchd play speech.raw

    # Stay resident, attach/detach on hot-plug, log status traffic
    perchd monitor

CONFIGURATION:
    perchd reads <config dir>/perch/perchd.toml when present; use
    --save-config to write the defaults there.
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to the default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List matching devices on the bus
    List,
    /// Send one actuator command (neutral, all-off, leds-on, flap, beak,
    /// tilt, flap-once) or a raw code digit
    Command { name: String },
    /// Stream a raw 12 kHz PCM file to the bird
    Play { file: PathBuf },
    /// Stay resident, attaching birds as they are plugged in
    Monitor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = HostConfig::default();
        let path = HostConfig::default_path();
        config.save(&path)?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::load_or_default(),
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.host.log_level);
    setup_logging(log_level)?;
    info!("perchd v{}", env!("CARGO_PKG_VERSION"));

    // Ctrl-c aborts pending lock waits in the blocking subcommands.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.raise();
            }
        });
    }

    match args.command.unwrap_or(Commands::Monitor) {
        Commands::List => {
            tokio::task::spawn_blocking(move || list_birds(&config)).await?
        }
        Commands::Command { name } => {
            let command = parse_command(&name).ok_or_else(|| {
                anyhow!(
                    "Unknown command '{}' (try: neutral, all-off, leds-on, flap, beak, tilt, flap-once)",
                    name
                )
            })?;
            tokio::task::spawn_blocking(move || run_command(&config, command, &cancel)).await?
        }
        Commands::Play { file } => {
            tokio::task::spawn_blocking(move || run_play(&config, &file, &cancel)).await?
        }
        Commands::Monitor => run_monitor(config).await,
    }
}

/// Resolve a command name or raw code digit.
fn parse_command(name: &str) -> Option<ActuatorCommand> {
    let command = match name {
        "neutral" => ActuatorCommand::Neutral,
        "all-off" | "off" => ActuatorCommand::AllOff,
        "leds-on" | "leds" => ActuatorCommand::LedsOn,
        "flap" => ActuatorCommand::FlapWings,
        "beak" => ActuatorCommand::MoveBeak,
        "tilt" => ActuatorCommand::TiltHead,
        "flap-once" | "reset" => ActuatorCommand::FlapOnce,
        other => {
            let code = other.bytes().next()?;
            if other.len() != 1 || !code.is_ascii_digit() {
                return None;
            }
            ActuatorCommand::from_code(code)
        }
    };
    Some(command)
}

fn list_birds(config: &HostConfig) -> Result<()> {
    let context = rusb::Context::new().context("Failed to create USB context")?;
    let birds = find_birds(&context, config.device.vendor_id, config.device.product_id)
        .context("Failed to enumerate USB devices")?;

    if birds.is_empty() {
        println!("No birds found.");
        return Ok(());
    }

    println!("Found {} bird(s):\n", birds.len());
    for device in birds {
        println!(
            "  Bus {:03} Device {:03}: {:04x}:{:04x}",
            device.bus_number(),
            device.address(),
            config.device.vendor_id,
            config.device.product_id
        );
        let serial = device.open().ok().and_then(|handle| {
            let descriptor = device.device_descriptor().ok()?;
            let index = descriptor.serial_number_string_index()?;
            handle.read_string_descriptor_ascii(index).ok()
        });
        match serial {
            Some(serial) => println!("      Serial: {}", serial),
            None => println!("      Serial: unavailable"),
        }
    }
    Ok(())
}

/// A bird attached and opened for a one-shot operation.
struct AttachedBird {
    controller: LifecycleController,
    minor: MinorId,
    handle: SessionHandle,
}

fn open_one_bird(config: &HostConfig, cancel: &CancelToken) -> Result<AttachedBird> {
    let context = rusb::Context::new().context("Failed to create USB context")?;
    let birds = find_birds(&context, config.device.vendor_id, config.device.product_id)
        .context("Failed to enumerate USB devices")?;
    let device = birds.first().context("No bird found (is it plugged in?)")?;

    let transport = UsbBirdTransport::open(device).context("Failed to open the device")?;
    let controller = LifecycleController::new(Arc::new(SessionRegistry::new()));
    let minor = controller.attach(Arc::new(transport))?;
    let handle = controller.registry().open(minor, cancel)?;
    Ok(AttachedBird { controller, minor, handle })
}

fn close_bird(bird: AttachedBird) {
    let AttachedBird { controller, minor, handle } = bird;
    if let Err(e) = handle.close() {
        error!("Close failed: {}", e);
    }
    if let Err(e) = controller.detach(minor) {
        error!("Detach failed: {}", e);
    }
}

fn run_command(config: &HostConfig, command: ActuatorCommand, cancel: &CancelToken) -> Result<()> {
    let bird = open_one_bird(config, cancel)?;
    info!("Sending {:?} to session {}", command, bird.minor);
    let outcome = bird.handle.send(command, cancel);
    close_bird(bird);
    outcome.context("Command failed")
}

fn run_play(config: &HostConfig, file: &Path, cancel: &CancelToken) -> Result<()> {
    let audio =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let bird = open_one_bird(config, cancel)?;
    info!("Streaming {} bytes of audio to session {}", audio.len(), bird.minor);

    let mut sent = 0usize;
    let mut outcome: Result<()> = Ok(());
    for chunk in audio.chunks(INT_OUT_FRAME_MAX) {
        if cancel.is_raised() {
            info!("Playback interrupted after {} bytes", sent);
            break;
        }
        match bird.handle.write(chunk, cancel) {
            Ok(written) => {
                sent += written;
                if written < chunk.len() {
                    warn!("Device accepted a short frame ({} of {} bytes)", written, chunk.len());
                    break;
                }
            }
            Err(e) => {
                outcome = Err(e).context("Playback write failed");
                break;
            }
        }
    }

    close_bird(bird);
    outcome?;
    info!("Playback finished ({} bytes)", sent);
    Ok(())
}

async fn run_monitor(config: HostConfig) -> Result<()> {
    let (event_tx, event_rx) = async_channel::bounded(64);
    let shutdown = Arc::new(AtomicBool::new(false));
    let worker = spawn_monitor(config, event_tx, Arc::clone(&shutdown));

    info!("Watching for birds; press ctrl-c to stop");
    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Ok(event) => print_event(&event),
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down USB monitor...");
    shutdown.store(true, Ordering::Release);
    match worker.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow!("USB monitor failed: {}", e)),
        Err(_) => Err(anyhow!("USB monitor thread panicked")),
    }
}

fn print_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::Attached { minor, serial } => {
            println!("Bird {} attached as session {}", serial, minor);
        }
        MonitorEvent::AttachFailed { message } => {
            println!("A bird could not be attached: {}", message);
        }
        MonitorEvent::Detached { minor } => {
            println!("Session {} detached", minor);
        }
        MonitorEvent::Payload { minor, len } => {
            println!("Session {}: {} status byte(s)", minor, len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_names() {
        assert_eq!(parse_command("flap"), Some(ActuatorCommand::FlapWings));
        assert_eq!(parse_command("beak"), Some(ActuatorCommand::MoveBeak));
        assert_eq!(parse_command("tilt"), Some(ActuatorCommand::TiltHead));
        assert_eq!(parse_command("reset"), Some(ActuatorCommand::FlapOnce));
        assert_eq!(parse_command("off"), Some(ActuatorCommand::AllOff));
        assert_eq!(parse_command("leds-on"), Some(ActuatorCommand::LedsOn));
        assert_eq!(parse_command("neutral"), Some(ActuatorCommand::Neutral));
    }

    #[test]
    fn test_parse_command_digits() {
        assert_eq!(parse_command("3"), Some(ActuatorCommand::FlapWings));
        // Digits outside the table still resolve, to the neutral command.
        assert_eq!(parse_command("9"), Some(ActuatorCommand::Neutral));
        assert_eq!(parse_command("wiggle"), None);
        assert_eq!(parse_command("42"), None);
        assert_eq!(parse_command(""), None);
    }
}
