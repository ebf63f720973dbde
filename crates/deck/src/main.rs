//! Deck — a terminal audio player built around a single playback engine
//! thread.
//!
//! The engine decodes with Symphonia and feeds the CPAL callback on
//! demand, inserting a Rubato rate converter when a track's native rate
//! differs from the device. The device opens once, at the first track's
//! rate, and never reconfigures after that.
//!
//! This binary is a thin driver around `deck-engine`: it queues the files
//! given on the command line, relays commands typed on stdin, and prints
//! the engine's status events to stdout. Logs go to stderr so the event
//! stream stays clean.
//!
//! ## Commands (stdin, one per line)
//! - empty line or `p`: toggle play/pause
//! - `s`: stop the current track and advance to the next queued file
//! - `q`: quit
//! - anything else: played next, preempting the current track

mod cli;

use std::collections::VecDeque;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use crossbeam_channel::{Receiver, never, select, unbounded};
use deck_engine::config::EngineConfig;
use deck_engine::player::{PlayerHandle, spawn_player};
use deck_engine::sink::CpalOutput;
use deck_types::{Command, PlayState, Status};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,deck=info,deck_engine=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.list_devices {
        return deck_engine::device::list_devices(&cpal::default_host());
    }

    match args.cmd {
        Some(cli::Command::Play { paths }) => play(paths, args.device, args.json),
        None => bail!("nothing to do; try `deck play <files>...` or `deck --list-devices`"),
    }
}

fn play(paths: Vec<PathBuf>, device: Option<String>, json: bool) -> Result<()> {
    if paths.is_empty() {
        bail!("no files given");
    }

    let player = spawn_player(CpalOutput::new(device), EngineConfig::default());

    let (sig_tx, sig_rx) = unbounded::<()>();
    let _ = ctrlc::set_handler(move || {
        let _ = sig_tx.send(());
    });

    let line_rx = spawn_stdin_reader();
    let mut line_rx = Some(line_rx);

    let mut queue: VecDeque<PathBuf> = paths.into();
    let mut loaded = false;
    if !advance(&player, &mut queue) {
        player.shutdown();
        return Ok(());
    }

    loop {
        let lines = line_rx.clone().unwrap_or_else(never);

        select! {
            recv(player.status()) -> status => match status {
                Ok(status) => {
                    print_status(&status, json)?;
                    match status {
                        Status::PlayStateUpdate { state: PlayState::NoTrackLoaded } => {
                            loaded = false;
                            if !advance(&player, &mut queue) {
                                break;
                            }
                        }
                        Status::PlayStateUpdate { .. } => loaded = true,
                        // A file that failed to load never unloads, so the
                        // queue moves on here.
                        Status::ErrorUpdate { .. } => {
                            loaded = false;
                            if !advance(&player, &mut queue) {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                Err(_) => break,
            },
            recv(lines) -> line => match line {
                Ok(line) => {
                    let line = line.trim();
                    match line {
                        "" | "p" => {
                            let _ = player.command(Command::PlayPause);
                        }
                        "s" => {
                            let _ = player.command(Command::Stop);
                        }
                        "q" => break,
                        path => {
                            queue.push_front(PathBuf::from(path));
                            if loaded {
                                // The unload event pulls it off the queue.
                                let _ = player.command(Command::Stop);
                            } else if !advance(&player, &mut queue) {
                                break;
                            }
                        }
                    }
                }
                Err(_) => {
                    line_rx = None;
                }
            },
            recv(sig_rx) -> _ => {
                queue.clear();
                if loaded {
                    let _ = player.command(Command::Stop);
                } else {
                    break;
                }
            }
        }
    }

    player.shutdown();
    Ok(())
}

/// Lines typed on stdin, forwarded from a blocking reader thread.
fn spawn_stdin_reader() -> Receiver<String> {
    let (line_tx, line_rx) = unbounded();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                return;
            };
            if line_tx.send(line).is_err() {
                return;
            }
        }
    });
    line_rx
}

/// Pull the next queued file and hand it to the engine. Returns false
/// when the queue is empty.
fn advance(player: &PlayerHandle, queue: &mut VecDeque<PathBuf>) -> bool {
    let Some(path) = queue.pop_front() else {
        return false;
    };
    println!("> {}", path.display());
    if let Err(e) = player.request_track(path) {
        tracing::error!("track request failed: {e:#}");
        return false;
    }
    true
}

fn print_status(status: &Status, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(status)?);
        return Ok(());
    }

    match status {
        Status::PositionUpdate { position, length } => {
            println!("{} / {}", format_mmss(*position), format_mmss(*length));
        }
        Status::PlayStateUpdate { state } => match state {
            PlayState::Playing => println!("playing"),
            PlayState::Paused => println!("paused"),
            PlayState::NoTrackLoaded => println!("stopped"),
        },
        Status::AudioInfoUpdate { info } => {
            // The engine clears metadata with an all-empty info event;
            // nothing to show for that in text mode.
            if info.title.is_empty() {
                return Ok(());
            }
            let mut line = String::new();
            if !info.artist.is_empty() {
                line.push_str(&info.artist);
                line.push_str(" - ");
            }
            line.push_str(&info.title);
            if !info.album.is_empty() {
                line.push_str(&format!(" ({})", info.album));
            }
            println!("{line}");
            if !info.artwork.is_empty() {
                // Kitty graphics escape stream; terminals without the
                // protocol drop it silently.
                println!("{}", info.artwork.data);
            }
        }
        Status::ErrorUpdate { message } => eprintln!("error: {message}"),
    }
    Ok(())
}

fn format_mmss(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}
