use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use slate_wm::actor::reactor::{Dirty, Reactor};
use slate_wm::common::config::{Config, config_file};
use slate_wm::common::log;
use slate_wm::ipc;

#[cfg(target_os = "macos")]
embed_plist::embed_info_plist!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/Info.plist"));

const EXIT_RUNNING_AS_ROOT: i32 = 64;
const EXIT_ACCESSIBILITY_DENIED: i32 = 65;
const EXIT_SEPARATE_SPACES_DISABLED: i32 = 66;

/// How often the run loop wakes to drain; also the coalescing window for
/// event bursts.
const TICK: Duration = Duration::from_millis(50);
/// Periodic full resync, in ticks.
const RESCAN_TICKS: u32 = 20;

#[derive(Parser)]
struct Cli {
    /// Path to the configuration file (overrides the default).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Parse the configuration and exit.
    #[arg(long)]
    validate: bool,

    /// Log at debug level.
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a command to the running instance.
    Msg {
        #[arg(trailing_var_arg = true, required = true)]
        words: Vec<String>,
    },
}

fn main() {
    sigpipe::reset();
    let cli = Cli::parse();
    log::init_logging(cli.verbose);

    if let Some(Commands::Msg { words }) = &cli.command {
        match send_message(words) {
            Ok(reply) => {
                print!("{reply}");
                process::exit(0);
            }
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    }

    let config_path = cli.config.unwrap_or_else(config_file);
    if cli.validate {
        match Config::load(&config_path) {
            Ok(_) => {
                println!("{} is valid", config_path.display());
                process::exit(0);
            }
            Err(e) => {
                eprintln!("{e:#}");
                process::exit(1);
            }
        }
    }
    let config = Config::load_or_default(&config_path);

    if nix::unistd::geteuid().is_root() {
        eprintln!("refusing to run as root");
        process::exit(EXIT_RUNNING_AS_ROOT);
    }
    check_platform_preconditions();

    let _lock = match ipc::LockFile::acquire(&ipc::lock_file_path()) {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    run(config);
}

fn send_message(words: &[String]) -> anyhow::Result<String> {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    let mut stream = UnixStream::connect(ipc::control_socket_path())?;
    stream.write_all(words.join(" ").as_bytes())?;
    stream.write_all(b"\n")?;
    let mut reply = String::new();
    stream.read_to_string(&mut reply)?;
    Ok(reply)
}

#[cfg(target_os = "macos")]
fn check_platform_preconditions() {
    unsafe extern "C" {
        fn AXIsProcessTrusted() -> bool;
    }
    if !unsafe { AXIsProcessTrusted() } {
        eprintln!(
            "accessibility permission has not been granted; enable it in \
System Settings > Privacy & Security > Accessibility and restart"
        );
        process::exit(EXIT_ACCESSIBILITY_DENIED);
    }
    if !slate_wm::sys::skylight::displays_have_separate_spaces() {
        eprintln!(
            "the macOS setting \"Displays have separate Spaces\" is disabled; \
it is required for per-display space management"
        );
        process::exit(EXIT_SEPARATE_SPACES_DISABLED);
    }
}

#[cfg(not(target_os = "macos"))]
fn check_platform_preconditions() {
    eprintln!("this platform has no window server to manage");
    process::exit(1);
}

#[cfg(target_os = "macos")]
fn dock_pid() -> Option<i32> {
    use objc2_app_kit::NSRunningApplication;
    use objc2_foundation::NSString;

    let bundle_id = NSString::from_str("com.apple.dock");
    let apps =
        unsafe { NSRunningApplication::runningApplicationsWithBundleIdentifier(&bundle_id) };
    apps.iter().next().map(|app| unsafe { app.processIdentifier() })
}

#[cfg(target_os = "macos")]
fn load_scripting_addition(config: &Config) -> bool {
    use slate_wm::sa;

    if !config.use_scripting_addition {
        return false;
    }
    let Some(pid) = dock_pid() else {
        tracing::warn!("no Dock process; scripting addition unavailable");
        return false;
    };
    let payload = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("libslate_wm.dylib")));
    let Some(payload) = payload.filter(|p| p.exists()) else {
        tracing::warn!("payload dylib not found next to the binary");
        return false;
    };
    match sa::inject::inject(pid, &payload.to_string_lossy()) {
        Ok(outcome) => {
            tracing::info!("scripting addition: {outcome:?}");
            true
        }
        Err(e) => {
            tracing::warn!("scripting addition unavailable: {e}");
            false
        }
    }
}

#[cfg(target_os = "macos")]
fn run(config: Config) {
    use slate_wm::platform::macos::MacosPlatform;

    let sa_loaded = load_scripting_addition(&config);
    let mut platform = MacosPlatform::new();
    if sa_loaded {
        platform.refresh_sa();
    }
    run_loop(config, platform);
}

#[cfg(not(target_os = "macos"))]
fn run(_config: Config) {
    unreachable!("preconditions abort on non-macOS hosts");
}

#[allow(dead_code)]
fn run_loop(config: Config, mut platform: impl slate_wm::platform::Platform) {
    let (events_tx, events_rx) = crossbeam_channel::unbounded();

    let control = ipc::ControlServer::bind(&ipc::control_socket_path(), events_tx.clone());
    match control {
        Ok(server) => {
            server.spawn();
        }
        Err(e) => {
            eprintln!("control socket unavailable: {e}");
            process::exit(1);
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        let _ = ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst));
    }

    let mut reactor = Reactor::new(config.clone());
    reactor.rules = config.build_rules();
    reactor.mark(Dirty::SCAN_APPS | Dirty::LAYOUT_ALL);

    let mut ticks: u32 = 0;
    while !shutdown.load(Ordering::SeqCst) {
        // coalesce everything that arrived during this tick
        let deadline = std::time::Instant::now() + TICK;
        while let Ok(event) = events_rx.recv_deadline(deadline) {
            reactor.handle_event(&mut platform, event);
        }

        ticks += 1;
        if ticks % RESCAN_TICKS == 0 {
            reactor.mark(
                Dirty::SCAN_APPS
                    | Dirty::VALIDATE_STATE
                    | Dirty::REFRESH_WINDOW_SPACES
                    | Dirty::LAYOUT_ALL,
            );
        }
        reactor.drain(&mut platform);
    }
    tracing::info!("shutting down");
    let _ = std::fs::remove_file(ipc::control_socket_path());
}
