use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use stbt::{uri_to_remote, uri_to_remote_recorder, StbtConfig};
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "stbt")]
#[command(about = "Remote control and recording tools for set-top-box testing")]
#[command(version)]
#[command(long_about = "Presses keys on a device under test through a network, infrared or \
test-pattern remote control, and records keypresses from a remote control listener or a file. \
Configuration is read from /etc/stbt/stbt.conf, ~/.config/stbt/stbt.conf and $STBT_CONFIG_FILE, \
and can be overridden with STBT__<SECTION>__<KEY> environment variables.")]
struct Args {
    /// Extra configuration file, applied on top of the standard ones
    #[arg(short, long, global = true, help = "Path to TOML configuration file")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Override log format (json, pretty, compact)
    #[arg(long, global = true, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send keypresses to the device under test
    Press {
        /// Remote control URI (default: global.control)
        #[arg(long)]
        control: Option<String>,

        /// Keys to press, in order
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Print keypresses as they are received, optionally forwarding them
    Record {
        /// Where to read keypresses from (default: remote.control_recorder)
        #[arg(long)]
        control_recorder: Option<String>,

        /// Remote control to forward each recorded key to
        #[arg(long)]
        control: Option<String>,
    },

    /// Validate configuration and exit
    ValidateConfig,

    /// Print default configuration in TOML format and exit
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::PrintConfig = args.command {
        print_default_config()?;
        return Ok(());
    }

    // Loading validates too, so an invalid file is reported here
    let config = match StbtConfig::load_with(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) if matches!(args.command, Command::ValidateConfig) => {
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to load configuration"),
    };

    init_logging(&args, &config);
    debug!("stbt v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Press { control, keys } => press(&config, control, keys).await,
        Command::Record {
            control_recorder,
            control,
        } => record(&config, control_recorder, control).await,
        Command::ValidateConfig => match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                Ok(())
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        },
        Command::PrintConfig => Ok(()),
    }
}

async fn press(config: &StbtConfig, control: Option<String>, keys: Vec<String>) -> Result<()> {
    let uri = control.unwrap_or_else(|| config.global.control.clone());
    let mut control = uri_to_remote(&uri, None, &config.remote)
        .await
        .with_context(|| format!("Failed to set up remote control {}", uri))?;

    for key in &keys {
        control
            .press(key)
            .await
            .with_context(|| format!("Failed to press {}", key))?;
        info!("Pressed {}", key);
    }

    control.close().await?;
    Ok(())
}

async fn record(
    config: &StbtConfig,
    control_recorder: Option<String>,
    control: Option<String>,
) -> Result<()> {
    let recorder_uri = control_recorder.unwrap_or_else(|| config.remote.control_recorder.clone());

    let mut forward = match control {
        Some(uri) => Some(
            uri_to_remote(&uri, None, &config.remote)
                .await
                .with_context(|| format!("Failed to set up remote control {}", uri))?,
        ),
        None => None,
    };

    let mut keys = uri_to_remote_recorder(&recorder_uri, &config.remote)
        .await
        .with_context(|| format!("Failed to set up recorder {}", recorder_uri))?;

    while let Some(key) = keys.next().await {
        let key = key?;
        println!("{}", key);
        if let Some(control) = forward.as_mut() {
            control.press(&key).await?;
        }
    }

    if let Some(mut control) = forward {
        control.close().await?;
    }
    Ok(())
}

fn init_logging(args: &Args, config: &StbtConfig) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let verbosity = args.verbose.max(config.global.verbose);
    let log_level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let detailed = verbosity > 0;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("stbt={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("pretty") => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(detailed)
            .with_line_number(detailed)
            .boxed(),
        Some("compact") | None => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# stbt configuration file");
    println!("# Install as /etc/stbt/stbt.conf or ~/.config/stbt/stbt.conf");
    println!();
    print!("{}", toml::to_string_pretty(&StbtConfig::default())?);
    Ok(())
}
