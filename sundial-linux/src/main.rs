use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use sundial::datastructures::common::ClockIdentity;
use sundial::ptp_instance::{PtpInstance, RunControl, RunExit};
use sundial_linux::clock::LinuxClock;
use sundial_linux::config::Config;
use sundial_linux::socket::{mac_address, PtpNetwork};
use sundial_linux::tracing::setup_logger;

/// The signal handlers communicate with the event loop through these flags.
static RUN_CONTROL: RunControl = RunControl::new();

#[derive(Parser, Debug)]
#[clap(author, version, about = "IEEE 1588-2008 (PTP v2) ordinary clock daemon")]
struct Args {
    /// Path to the configuration file
    #[clap(short, long, default_value = "/etc/sundial/sundial.toml")]
    config: PathBuf,

    /// Enable logging of debug messages
    #[clap(short = 'D', long)]
    debug: bool,

    /// Detach from the terminal and run in the background
    #[clap(short = 'f', long)]
    daemonize: bool,
}

extern "C" fn handle_signal(signal: libc::c_int) {
    match signal {
        libc::SIGHUP => RUN_CONTROL.request_reconfigure(),
        // a plain atomic store, safe from a signal handler
        libc::SIGUSR1 => log::set_max_level(log::LevelFilter::Debug),
        _ => RUN_CONTROL.request_shutdown(),
    }
}

fn install_signal_handlers() -> std::io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_signal as extern "C" fn(libc::c_int) as usize;

        for signal in [libc::SIGHUP, libc::SIGUSR1, libc::SIGINT, libc::SIGTERM] {
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

/// Classic double-fork-free daemonization: fork once, start a new session,
/// move to the root directory, and point stdio at /dev/null.
fn daemonize() -> std::io::Result<()> {
    unsafe {
        match libc::fork() {
            -1 => return Err(std::io::Error::last_os_error()),
            0 => {}
            _ => libc::_exit(0),
        }

        libc::umask(0);

        if libc::setsid() < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::chdir(b"/\0".as_ptr() as *const libc::c_char) < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let null = libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, libc::O_RDWR);
        if null < 0 {
            return Err(std::io::Error::last_os_error());
        }
        libc::dup2(null, 0);
        libc::dup2(null, 1);
        libc::dup2(null, 2);
        if null > 2 {
            libc::close(null);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("invalid configuration: {error}");
            return ExitCode::FAILURE;
        }
    };

    if args.daemonize {
        if let Err(error) = daemonize() {
            eprintln!("could not daemonize: {error}");
            return ExitCode::FAILURE;
        }
    }

    let level = if args.debug || config.general.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    if let Err(error) = setup_logger(level) {
        eprintln!("could not set up logging: {error}");
        return ExitCode::FAILURE;
    }

    if let Err(error) = install_signal_handlers() {
        log::error!("could not install signal handlers: {error}");
        return ExitCode::FAILURE;
    }

    if config.interfaces.is_empty() {
        log::error!("no interfaces configured");
        return ExitCode::FAILURE;
    }

    // The clock identity comes from the first interface's hardware address.
    let clock_identity = match mac_address(&config.interfaces[0].name) {
        Ok(mac) => ClockIdentity::from_mac_address(mac),
        Err(error) => {
            log::error!(
                "could not read hardware address of {}: {error}",
                config.interfaces[0].name
            );
            return ExitCode::FAILURE;
        }
    };
    log::info!("clock identity {clock_identity}");

    'restart: loop {
        let clock = match LinuxClock::new() {
            Ok(clock) => clock,
            Err(error) => {
                log::error!("could not open system clock: {error}");
                return ExitCode::FAILURE;
            }
        };

        let mut instance = PtpInstance::new(config.instance_config(), clock_identity, clock);
        for interface in &config.interfaces {
            instance.add_port(config.port_config(interface), StdRng::from_entropy());
        }

        loop {
            let mut packet = match PtpNetwork::open(&config.interfaces) {
                Ok(packet) => packet,
                Err(error) => {
                    log::error!("could not open packet interface: {error}");
                    std::thread::sleep(Duration::from_secs(1));
                    if RUN_CONTROL.shutdown_requested() {
                        break 'restart;
                    }
                    continue;
                }
            };

            match instance.run(&mut packet, &RUN_CONTROL) {
                RunExit::Shutdown => {
                    log::info!("shutting down");
                    break 'restart;
                }
                RunExit::SocketRestart => {
                    log::warn!("restarting packet interface");
                }
                RunExit::Reconfigure => {
                    log::info!("reloading configuration");
                    match Config::from_file(&args.config) {
                        Ok(new_config) => config = new_config,
                        Err(error) => {
                            log::error!("invalid configuration, keeping the old one: {error}")
                        }
                    }
                    continue 'restart;
                }
            }
        }
    }

    ExitCode::SUCCESS
}
