use anyhow::Context;
use clap::Parser;
use std::{
    env,
    path::PathBuf,
    str::FromStr,
};
use tracing_subscriber::{
    filter::EnvFilter,
    layer::SubscriberExt,
    registry,
    Layer,
};

#[cfg(feature = "env")]
use dotenvy::dotenv;

pub mod simulate;

#[derive(Parser, Debug)]
#[clap(
    name = "btp-relay",
    about = "Relays BTP messages between two blockchains",
    version,
    rename_all = "kebab-case"
)]
pub struct Opt {
    #[clap(subcommand)]
    command: Relay,
}

#[derive(Debug, Parser)]
pub enum Relay {
    /// Runs a link between two in-memory chains and prints its final state.
    Simulate(simulate::Command),
}

pub const LOG_FILTER: &str = "RUST_LOG";
pub const HUMAN_LOGGING: &str = "HUMAN_LOGGING";

#[cfg(feature = "env")]
fn init_environment() -> Option<PathBuf> {
    dotenv().ok()
}

#[cfg(not(feature = "env"))]
fn init_environment() -> Option<PathBuf> {
    None
}

pub fn init_logging() -> anyhow::Result<()> {
    let filter = match env::var_os(LOG_FILTER) {
        Some(_) => EnvFilter::try_from_default_env()
            .context("Invalid `RUST_LOG` provided")?,
        None => EnvFilter::new("info"),
    };

    let human_logging = match env::var(HUMAN_LOGGING) {
        Ok(value) => bool::from_str(&value).context(
            "Expected `true` or `false` to be provided for `HUMAN_LOGGING`",
        )?,
        Err(_) => true,
    };

    let layer = tracing_subscriber::fmt::Layer::default().with_writer(std::io::stderr);

    let fmt = if human_logging {
        layer
            .with_ansi(true)
            .with_level(true)
            .with_line_number(true)
            .boxed()
    } else {
        // machine parseable structured logs
        layer
            .with_ansi(false)
            .with_level(true)
            .with_line_number(true)
            .json()
            .boxed()
    };

    let subscriber = registry::Registry::default().with(filter).with(fmt);

    tracing::subscriber::set_global_default(subscriber)
        .context("setting global default failed")?;
    Ok(())
}

/// Loads the environment with `load_env`, then sets up logging from it.
fn init(load_env: impl FnOnce() -> Option<PathBuf>) -> anyhow::Result<()> {
    let env_file = load_env();
    init_logging()?;
    if let Some(path) = env_file {
        let path = path.display();
        tracing::info!("Loaded environment variables from {path}");
    }
    Ok(())
}

pub async fn run_cli() -> anyhow::Result<()> {
    init(init_environment)?;
    match Opt::try_parse() {
        Ok(opt) => match opt.command {
            Relay::Simulate(command) => simulate::exec(command).await,
        },
        Err(e) => {
            // Prints the error and exits.
            e.exit()
        }
    }
}
