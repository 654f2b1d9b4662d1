//! Process-level plumbing at the boundary: the single-instance lock file
//! and the control socket the CLI talks to. Command parsing and output
//! formatting live with the CLI; only transport and dispatch are here.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, warn};

use crate::actor::reactor::{Command, Event};
use crate::common::util::user_name;
use crate::errors::{Error, Result};
use crate::layout_engine::{Direction, SplitAxis};

pub fn control_socket_path() -> PathBuf {
    PathBuf::from(format!("/tmp/yabai.zig_{}.socket", user_name()))
}

pub fn lock_file_path() -> PathBuf {
    PathBuf::from(format!("/tmp/yabai.zig_{}.lock", user_name()))
}

/// Exclusive advisory lock held for the process lifetime; a second
/// instance fails to acquire it and exits.
pub struct LockFile {
    _lock: Flock<File>,
    path: PathBuf,
}

impl LockFile {
    pub fn acquire(path: &Path) -> Result<LockFile> {
        let file = File::create(path)?;
        let mut permissions = file.metadata()?.permissions();
        permissions.set_mode(0o600);
        file.set_permissions(permissions)?;
        let lock = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|_| Error::ProtocolError("another instance is already running"))?;
        Ok(LockFile { _lock: lock, path: path.to_path_buf() })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Line-oriented command intake from the CLI. One connection per command;
/// replies are a single `ok`/`error` line.
pub struct ControlServer {
    listener: UnixListener,
    events: Sender<Event>,
}

impl ControlServer {
    pub fn bind(path: &Path, events: Sender<Event>) -> Result<ControlServer> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_mode(0o600);
        std::fs::set_permissions(path, permissions)?;
        Ok(ControlServer { listener, events })
    }

    pub fn spawn(self) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("control".into())
            .spawn(move || self.run())
            .expect("spawning the control listener")
    }

    fn run(&self) {
        for stream in self.listener.incoming() {
            let Ok(stream) = stream else { break };
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            if reader.read_line(&mut line).is_err() {
                continue;
            }
            let reply = match parse_command(line.trim()) {
                Some(command) => {
                    debug!("control: {command:?}");
                    match self.events.send(Event::Command(command)) {
                        Ok(()) => "ok\n",
                        Err(_) => "error: manager is shutting down\n",
                    }
                }
                None => {
                    warn!("control: unparsable command {line:?}");
                    "error: unknown command\n"
                }
            };
            let _ = reader.into_inner().write_all(reply.as_bytes());
        }
    }
}

fn parse_direction(token: &str) -> Option<Direction> {
    match token {
        "west" => Some(Direction::West),
        "east" => Some(Direction::East),
        "north" => Some(Direction::North),
        "south" => Some(Direction::South),
        _ => None,
    }
}

fn parse_axis(token: &str) -> Option<Option<SplitAxis>> {
    match token {
        "x" | "vertical" => Some(Some(SplitAxis::Vertical)),
        "y" | "horizontal" => Some(Some(SplitAxis::Horizontal)),
        "all" => Some(None),
        _ => None,
    }
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "focus" => parse_direction(parts.next()?).map(Command::FocusDirection),
        "swap" => parse_direction(parts.next()?).map(Command::SwapDirection),
        "resize" => {
            let direction = parse_direction(parts.next()?)?;
            let delta: f32 = parts.next()?.parse().ok()?;
            Some(Command::AdjustRatio(direction, delta))
        }
        "equalize" => parse_axis(parts.next().unwrap_or("all")).map(Command::Equalize),
        "balance" => parse_axis(parts.next().unwrap_or("all")).map(Command::Balance),
        "toggle-float" => {
            let wid: u32 = parts.next()?.parse().ok()?;
            Some(Command::ToggleFloat(crate::sys::screen::WindowId::new(wid)))
        }
        _ => None,
    }
}
