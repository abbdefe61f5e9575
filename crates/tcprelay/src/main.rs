//! tcprelay: transparent TCP relay.
//!
//! Accepts connections on a local port and relays each one to a fixed
//! remote host/port, optionally passing either direction through an
//! external filter command.

mod config;
mod daemon;
mod logging;
#[cfg(unix)]
mod notify;

use clap::{CommandFactory, Parser};
use config::{ConfigFile, LogOptions, Overrides};
use daemon::Detached;
use std::path::PathBuf;
use std::sync::Arc;
use tcprelay_core::{NoopNotifier, ReadinessNotifier};
use tracing::{error, info};

const EXIT_STATUS_HELP: &str = "\
Exit status:
  0  clean shutdown
  1  runtime failure
  2  usage error
  3  cannot create socket
  4  cannot configure socket
  5  cannot bind
  6  cannot listen
  7  cannot resolve bind address
  8  invalid configuration";

/// Transparent TCP relay
#[derive(Parser, Debug)]
#[command(
    name = "tcprelay",
    version,
    about = "Transparent TCP relay with optional stream filters",
    after_help = EXIT_STATUS_HELP,
    disable_help_flag = true
)]
struct Cli {
    /// Local address to bind (default: all interfaces, IPv4 and IPv6)
    #[arg(short = 'b', long)]
    bind_address: Option<String>,

    /// Local port to listen on
    #[arg(short = 'l', long)]
    local_port: Option<u16>,

    /// Remote host to relay to
    #[arg(short = 'h', long)]
    remote_host: Option<String>,

    /// Remote port to relay to
    #[arg(short = 'p', long)]
    remote_port: Option<u16>,

    /// Filter command for data flowing from the remote host to the client
    #[arg(short = 'i', long = "input-parser", value_name = "COMMAND")]
    input_parser: Option<String>,

    /// Filter command for data flowing from the client to the remote host
    #[arg(short = 'o', long = "output-parser", value_name = "COMMAND")]
    output_parser: Option<String>,

    /// Stay in the foreground instead of detaching
    #[arg(short, long)]
    foreground: bool,

    /// Log to syslog instead of stderr
    #[arg(short, long)]
    syslog: bool,

    /// Config file path
    #[arg(long)]
    config: Option<String>,

    /// Listen backlog
    #[arg(long)]
    backlog: Option<u32>,

    /// Per-flow buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Print help
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            bind_address: self.bind_address.clone(),
            local_port: self.local_port,
            remote_host: self.remote_host.clone(),
            remote_port: self.remote_port,
            inbound_filter: self.input_parser.clone(),
            outbound_filter: self.output_parser.clone(),
            backlog: self.backlog,
            buffer_size: self.buffer_size,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let file = match cli.config.as_deref() {
        Some(path) => ConfigFile::load(&PathBuf::from(path)),
        None => Ok(ConfigFile::default()),
    };

    // A broken config file is still reported through the chosen sink.
    let log = LogOptions::resolve(file.as_ref().ok(), cli.log_level.as_deref(), cli.syslog);
    if let Err(e) = logging::init(&log.level, log.syslog) {
        eprintln!("tcprelay: {e:#}");
        std::process::exit(1);
    }

    let file = match file {
        Ok(f) => f,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(e.exit_code());
        }
    };

    let relay = match file.relay.merge(cli.overrides()) {
        Ok(relay) => relay,
        Err(missing) => Cli::command()
            .error(
                clap::error::ErrorKind::MissingRequiredArgument,
                format!("missing required option {}", missing.0),
            )
            .exit(),
    };

    if let Err(e) = relay.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(e.exit_code());
    }

    if !cli.foreground {
        match daemon::detach().await {
            Ok(Detached::Ready { pid }) => {
                info!(pid, "detached");
                return;
            }
            Ok(Detached::Failed { code }) => {
                error!(code, "relay failed to start");
                std::process::exit(code);
            }
            Err(e) => {
                error!(error = %e, "cannot daemonize");
                std::process::exit(1);
            }
        }
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        local_port = relay.local_port,
        remote = %format_args!("{}:{}", relay.remote_host, relay.remote_port),
        "starting tcprelay"
    );

    if let Err(e) = tcprelay_core::run(relay, readiness_notifier()).await {
        error!(error = %e, "cannot run relay");
        std::process::exit(e.exit_code());
    }

    info!("tcprelay stopped");
}

fn readiness_notifier() -> Arc<dyn ReadinessNotifier> {
    let notifier = service_notifier();
    if std::env::var_os(daemon::DETACHED_ENV).is_some() {
        return Arc::new(daemon::DetachedNotifier::new(notifier));
    }
    notifier
}

fn service_notifier() -> Arc<dyn ReadinessNotifier> {
    #[cfg(unix)]
    {
        if let Some(notifier) = notify::SystemdNotifier::from_env() {
            return Arc::new(notifier);
        }
    }
    Arc::new(NoopNotifier)
}
