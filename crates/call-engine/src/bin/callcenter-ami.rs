//! Call center AMI service
//!
//! `track` runs the call lifecycle tracker against the PBX and the call
//! store until interrupted, reconnecting after transport failures. The other
//! commands run synchronous PBX queries and print the result as JSON;
//! `extensions` also reads the active agents from the call store.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};

use callcenter_engine::config::CallCenterAmiConfig;
use callcenter_engine::correlator::ActionCorrelator;
use callcenter_engine::database::{CallStore, MySqlCallStore};
use callcenter_engine::tracker::CallTracker;

#[derive(Parser, Debug)]
#[command(author, version, about = "Asterisk Manager Interface integration for the call center", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "CALLCENTER_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow calls on the PBX event stream and persist them
    Track,

    /// Hang up every open channel of an extension
    Hangup {
        /// Extension number, e.g. 8001
        extension: String,
    },

    /// Show the state of an extension
    Status {
        extension: String,
    },

    /// Status and queue membership of every active agent
    Extensions,

    /// List queue members
    Queues {
        /// Only this queue
        #[arg(short, long)]
        queue: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = CallCenterAmiConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    if args.verbose {
        config.logging.level = "debug".to_string();
    } else if !matches!(args.command, Command::Track) {
        // keep stdout readable for the JSON result
        config.logging.level = "warn".to_string();
    }

    let _guard = infra_common::setup_logging(&config.logging).context("failed to set up logging")?;

    match args.command {
        Command::Track => track(config).await,
        Command::Hangup { extension } => {
            let correlator = ActionCorrelator::new(&config.ami, config.actions.clone());
            let result = correlator.hangup(&extension).await;
            print_result(
                result.map(|()| json!({ "extension": extension, "hungup": true })),
            )
        }
        Command::Status { extension } => {
            let correlator = ActionCorrelator::new(&config.ami, config.actions.clone());
            let result = correlator.extension_status(&extension).await;
            print_result(result.and_then(|state| to_json(&state)))
        }
        Command::Extensions => {
            config.validate_database()?;
            let store = MySqlCallStore::connect(&config.database)
                .await
                .context("failed to connect the call store")?;
            let numbers = store.active_agent_numbers().await;
            store.close().await;
            let numbers = numbers.context("failed to list active agents")?;

            let correlator = ActionCorrelator::new(&config.ami, config.actions.clone());
            let report = correlator.extension_report(numbers.as_slice()).await;
            print_result(to_json(&report))
        }
        Command::Queues { queue } => {
            let correlator = ActionCorrelator::new(&config.ami, config.actions.clone());
            let result = correlator.queue_status(queue.as_deref()).await;
            print_result(result.and_then(|members| to_json(&members)))
        }
    }
}

async fn track(config: CallCenterAmiConfig) -> anyhow::Result<()> {
    infra_common::logging::setup::log_welcome("callcenter-ami", env!("CARGO_PKG_VERSION"));
    config.validate_database()?;

    let store = MySqlCallStore::connect(&config.database)
        .await
        .context("failed to connect the call store")?;
    let pool = store.pool_status();
    info!(
        total = pool.total_connections,
        idle = pool.idle_connections,
        max = pool.max_connections,
        "Call store pool ready"
    );

    let mut tracker = CallTracker::new(
        store.clone(),
        config.tracker.clone(),
        config.database.statement_timeout(),
    )?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };
    tracker
        .supervise(&config.ami.connect_options(), shutdown)
        .await?;

    store.close().await;
    info!("callcenter-ami stopped");
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> callcenter_engine::Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| callcenter_engine::CallCenterError::internal(e.to_string()))
}

fn print_result(result: callcenter_engine::Result<serde_json::Value>) -> anyhow::Result<()> {
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", json!({ "error": e.to_string() }));
            Err(e.into())
        }
    }
}
