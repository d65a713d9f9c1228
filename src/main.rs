//! quay: multi-call binary for init and the power commands.
//!
//! Invoked as `init`, `reboot`, `poweroff`, `halt` or `shutdown` (for
//! example through symlinks) it behaves as that command; otherwise the
//! first argument names the subcommand.

use clap::{Parser, Subcommand};
use power::PowerOutcome;
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const POWER_COMMANDS: [&str; 4] = ["reboot", "poweroff", "halt", "shutdown"];

#[derive(Parser)]
#[command(name = "quay", about = "Init and power management for quay", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the system as PID 1
    Init {
        /// Only reap children; used after the root switch
        #[arg(long)]
        reap_only: bool,

        /// Log at debug level
        #[arg(long)]
        debug: bool,

        /// Arguments passed by the kernel
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Reboot the system
    Reboot {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Power off the system
    Poweroff {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Halt the system
    Halt {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Shut down (-h, -P), halt (-H) or reboot (-r) the system
    Shutdown {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Whether the boot configuration asks for debug logging.
fn config_debug() -> bool {
    config::ConfigLoader::system()
        .load()
        .map(|config| config.debug)
        .unwrap_or(false)
}

fn run_init(argv: Vec<String>, reap_only: bool) -> anyhow::Result<()> {
    if reap_only {
        match init::main_reaper()? {}
    }
    match init::main_init(argv)? {}
}

fn run_power(command: &str, argv: Vec<String>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match runtime.block_on(power::main_power(command, argv))? {
        PowerOutcome::Relaunched(exit) => {
            info!(status = exit.status_code, "Power container finished");
            if exit.status_code != 0 {
                std::process::exit(1);
            }
        }
        PowerOutcome::Completed => {}
    }
    Ok(())
}

fn prepend(command: &str, args: Vec<String>) -> Vec<String> {
    std::iter::once(command.to_string()).chain(args).collect()
}

fn main() -> anyhow::Result<()> {
    let argv: Vec<String> = std::env::args().collect();
    let program = argv
        .first()
        .and_then(|arg0| Path::new(arg0).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let result = if program == "init" {
        let reap_only = argv.iter().any(|arg| arg == init::pid1::REAP_ONLY_FLAG);
        init_logging(config_debug());
        run_init(argv, reap_only)
    } else if POWER_COMMANDS.contains(&program.as_str()) {
        init_logging(false);
        run_power(&program, argv)
    } else {
        let cli = Cli::parse();
        match cli.command {
            Commands::Init { reap_only, debug, args } => {
                init_logging(debug || config_debug());
                run_init(prepend("init", args), reap_only)
            }
            Commands::Reboot { args } => {
                init_logging(false);
                run_power("reboot", prepend("reboot", args))
            }
            Commands::Poweroff { args } => {
                init_logging(false);
                run_power("poweroff", prepend("poweroff", args))
            }
            Commands::Halt { args } => {
                init_logging(false);
                run_power("halt", prepend("halt", args))
            }
            Commands::Shutdown { args } => {
                init_logging(false);
                run_power("shutdown", prepend("shutdown", args))
            }
        }
    };

    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}
