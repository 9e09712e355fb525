//! airwave - terminal internet radio player

mod cli;

use std::io::BufRead;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing_subscriber::EnvFilter;

use airwave::audio::{PlayerEventReceiver, list_output_devices, spawn_output_thread};
use airwave::settings::Settings;
use airwave::{Player, PlayerEvent, Station};
use cli::{Cli, Command, HELP, VOLUME_STEP};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug)?;

    if cli.list_devices {
        for device in list_output_devices() {
            println!("{}", device.name);
        }
        return Ok(());
    }

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from_file(path)
            .with_context(|| format!("load settings from {}", path.display()))?,
        None => Settings::load(),
    };
    if let Some(volume) = cli.volume {
        settings.volume = volume;
        settings.muted = false;
    }
    if let Some(device) = &cli.device {
        settings.system.audio_output_device = Some(device.clone());
    }

    let device = settings.system.audio_output_device.clone();
    let output_thread = tokio::task::spawn_blocking(move || spawn_output_thread(device.as_deref()))
        .await
        .context("audio output startup panicked")?
        .context("open audio output")?;

    let player = Player::builder(settings.engine_config())
        .output(Arc::new(output_thread.output()))
        .build()
        .context("create player")?;
    if settings.muted {
        player.toggle_mute();
    }
    if let Some(events) = player.take_event_rx() {
        spawn_event_printer(events);
    }

    let station = Station::from_stream_urls("cli", cli.station_title(), cli.urls.clone());
    println!("Tuning in to {}", station.title);
    println!("{HELP}");
    let driver = {
        let player = player.clone();
        tokio::spawn(async move { player.play(&station).await })
    };

    let (command_tx, command_rx) = unbounded_channel();
    spawn_input_thread(command_tx);
    run_command_loop(&player, command_rx).await;

    player.stop().await;
    match driver.await {
        Ok(Err(e)) => tracing::debug!("Playback ended with: {}", e),
        Err(e) => tracing::warn!("Playback task failed: {}", e),
        Ok(Ok(())) => {}
    }

    settings.volume = player.volume();
    settings.muted = player.is_muted();
    let saved = match &cli.config {
        Some(path) => settings.save_to_file(path),
        None => settings.save(),
    };
    if let Err(e) = saved {
        tracing::warn!("Failed to save settings: {}", e);
    }

    if let Err(e) = output_thread.join(Duration::from_secs(2)) {
        tracing::warn!("{}", e);
    }
    Ok(())
}

fn init_tracing(debug: bool) -> Result<()> {
    if !debug {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        return Ok(());
    }

    let log_path = Settings::debug_log_path().context("no cache directory for the debug log")?;
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let file = open_log_file(&log_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init();
    eprintln!("Debug log: {}", log_path.display());
    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}

/// Reads stdin on a plain thread so a pending read never holds up shutdown
fn spawn_input_thread(command_tx: UnboundedSender<Command>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match Command::parse(&line) {
                Some(command) => {
                    if command_tx.send(command).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => println!("{HELP}"),
            }
        }
        // EOF on stdin quits
        let _ = command_tx.send(Command::Quit);
    });
}

async fn run_command_loop(player: &Player, mut command_rx: UnboundedReceiver<Command>) {
    loop {
        let command = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            command = command_rx.recv() => command,
        };

        match command {
            None | Some(Command::Quit) => break,
            Some(Command::TogglePause) => player.toggle_pause(),
            Some(Command::VolumeUp) => {
                player.adjust_volume(VOLUME_STEP);
                println!("Volume {}%", player.volume());
            }
            Some(Command::VolumeDown) => {
                player.adjust_volume(-VOLUME_STEP);
                println!("Volume {}%", player.volume());
            }
            Some(Command::ToggleMute) => {
                player.toggle_mute();
                if player.is_muted() {
                    println!("Muted");
                } else {
                    println!("Volume {}%", player.volume());
                }
            }
            Some(Command::Reconnect) => {
                let player = player.clone();
                tokio::spawn(async move {
                    if let Err(e) = player.reconnect().await {
                        tracing::warn!("Reconnect failed: {}", e);
                    }
                });
            }
            Some(Command::Status) => print_status(player),
            Some(Command::Help) => println!("{HELP}"),
        }
    }
}

fn print_status(player: &Player) {
    let descriptor = player.stream_descriptor();
    let retry = player.retry_info();

    println!("[{}] {}", player.state(), player.current_track());
    println!(
        "  {} {} kbps, {} Hz ({})",
        descriptor.format, descriptor.bitrate_kbps, descriptor.sample_rate_hz, descriptor.quality
    );
    println!(
        "  buffer {}%, playing for {}s, {}s behind live",
        player.buffer_health(),
        player.session_duration().as_secs(),
        player.playback_delay().as_secs()
    );
    if player.is_muted() {
        println!("  volume muted ({}%)", player.volume());
    } else {
        println!("  volume {}%", player.volume());
    }
    if retry.attempt > 0 {
        println!("  retry {}/{}", retry.attempt, retry.max_attempts);
    }
    let last_error = player.last_error();
    if !last_error.is_empty() {
        println!("  last error: {}", last_error);
    }
}

fn spawn_event_printer(mut events: PlayerEventReceiver) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PlayerEvent::StateChanged { new, .. } => println!("[{}]", new),
                PlayerEvent::TrackChanged { title } if !title.is_empty() => {
                    println!("Now playing: {}", title)
                }
                PlayerEvent::TrackChanged { .. } => {}
                PlayerEvent::StreamInfo { descriptor } => println!(
                    "Stream: {} {} kbps, {} Hz",
                    descriptor.format, descriptor.bitrate_kbps, descriptor.sample_rate_hz
                ),
                PlayerEvent::Retrying {
                    attempt,
                    max_attempts,
                } => println!("Retrying ({}/{})", attempt, max_attempts),
                PlayerEvent::Error { message } => eprintln!("Error: {}", message),
            }
        }
    });
}
