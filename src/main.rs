use std::process;

use clap::{Parser, ValueHint};
use log::{debug, error, info, LevelFilter};

use plexrp::{bridge::Bridge, config::Config, discord::DiscordSink, error::Result};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when built in release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file
    ///
    /// Keep this file secure and do not share it publicly: it contains a
    /// credential granting access to your Plex account.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("settings.toml"))]
    settings_file: String,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Runs the bridge until the feed drops or the process is interrupted.
///
/// # Errors
///
/// Returns error on a fatal configuration or connection problem. A feed
/// disconnect is also fatal; rely on the service manager to restart the
/// process.
async fn run(args: Args) -> Result<()> {
    let config = Config::from_file(&args.settings_file)?;

    let sink = DiscordSink::new(config.client_id);
    let mut bridge = Bridge::new(config, sink)?;

    tokio::select! {
        // Prioritize shutdown signals.
        biased;

        _ = tokio::signal::ctrl_c() => {
            info!("shutting down gracefully");
            bridge.stop().await;
            Ok(())
        }

        result = bridge.run() => {
            bridge.stop().await;
            result
        }
    }
}

/// Main entry point of the application.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {args:#?}");

    info!(
        "starting {}/{}; {BUILD_PROFILE}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
