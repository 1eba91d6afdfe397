use clap::Parser;

use reelsmith::cancel::{setup_ctrlc_handler, CancelFlag};
use reelsmith::cli::{self, Args, Command};
use reelsmith::config::Config;

/// Load .env file
///
/// Loads environment variables (API keys) from .env in the working directory.
/// Does not override existing environment variables.
fn load_env() {
    // dotenv::dotenv() returns Err if .env doesn't exist, which is fine
    let _ = dotenv::dotenv();
}

/// Initialise env_logger; `RUST_LOG` wins over the default level.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

/// Load the config file.
///
/// An explicit --config path must exist; otherwise a missing or broken
/// default file falls back to built-in defaults.
fn load_config(path: Option<&std::path::Path>) -> Result<Config, String> {
    match path {
        Some(path) => Config::load(Some(path)).map_err(|e| e.to_string()),
        None => match Config::load(None) {
            Ok(c) => Ok(c),
            Err(e) => {
                eprintln!("Warning: Failed to load config file: {}", e);
                eprintln!("Using default settings.\n");
                Ok(Config::default())
            }
        },
    }
}

/// Cancel flag wired to Ctrl+C.
fn cancel_on_ctrlc() -> CancelFlag {
    let cancel = CancelFlag::new();
    if let Err(e) = setup_ctrlc_handler(cancel.clone()) {
        eprintln!("Warning: Could not set up Ctrl+C handler: {}", e);
    }
    cancel
}

fn dispatch(args: Args) -> Result<(), String> {
    let config_path = args.config.as_deref();

    match args.command {
        Command::Config { action } => cli::handle_config_action(action, config_path),
        Command::Plan { duration, provider } => {
            let config = load_config(config_path)?;
            cli::plan(duration, provider, &config)
        }
        Command::Concat {
            inputs,
            output,
            crossfade,
            max_duration,
        } => {
            let config = load_config(config_path)?;
            cli::concat(&inputs, &output, crossfade, max_duration, &config)
        }
        Command::Generate(source) => {
            let config = load_config(config_path)?;
            if source.duration.is_none() && source.audio.is_none() {
                return Err("Either --duration or --audio must be provided".to_string());
            }
            cli::generate(&source, &config, cancel_on_ctrlc())
        }
        Command::Assemble {
            main,
            project,
            audio,
            output,
            branding,
        } => {
            let config = load_config(config_path)?;
            cli::assemble(
                &main,
                &project,
                audio.as_deref(),
                output.as_deref(),
                &branding,
                &config,
                cancel_on_ctrlc(),
            )
        }
        Command::Run { source, branding } => {
            let config = load_config(config_path)?;
            if source.duration.is_none() && source.audio.is_none() {
                return Err("Either --duration or --audio must be provided".to_string());
            }
            cli::run(&source, &branding, &config, cancel_on_ctrlc())
        }
    }
}

fn main() {
    // Load .env file before anything else
    load_env();

    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = dispatch(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
