//! flowmgrd entry point.
//!
//! Runs the flow manager standalone: newline-delimited JSON requests and
//! speaker acks are read from stdin; replies and speaker commands are
//! written to stdout, one JSON document per line. Paths are computed over
//! the links declared in the configuration file; stored flows can be
//! preloaded from a JSON file of directional records.

use anyhow::Context;
use clap::Parser;
use flow_types::Flow;
use flowmgrd::audit::{AuditCategory, AuditOutcome, AuditRecord};
use flowmgrd::audit_log;
use flowmgrd::{
    ChannelSpeaker, Collaborators, FlowDaemon, FlowMgrConfig, InMemoryFlowStore, SpeakerCommand,
    StaticTopology,
};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Flow manager daemon
#[derive(Parser, Debug)]
#[command(name = "flowmgrd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// JSON file with stored directional flow records to start from
    #[arg(short = 'f', long)]
    flows: Option<PathBuf>,

    /// Number of partition workers (overrides the config file)
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Switch ack deadline in milliseconds (overrides the config file)
    #[arg(long)]
    transaction_timeout_ms: Option<u64>,

    /// Deadline sweep period in milliseconds (overrides the config file)
    #[arg(long)]
    sweep_interval_ms: Option<u64>,

    /// Report cache sync differences without correcting them
    #[arg(long)]
    no_sync_rules: bool,

    /// Do not reinstall rules when a switch activates
    #[arg(long)]
    no_reflow: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the message stream.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    info!("====================================================================");
    info!("Starting flowmgrd");
    info!("====================================================================");

    let code = match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("flowmgrd failed: {:#}", err);
            ExitCode::FAILURE
        }
    };

    info!("====================================================================");
    info!("flowmgrd shutdown complete");
    info!("====================================================================");
    code
}

fn load_config(args: &Args) -> anyhow::Result<FlowMgrConfig> {
    let mut config = match &args.config {
        Some(path) => FlowMgrConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FlowMgrConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(timeout) = args.transaction_timeout_ms {
        config.transaction_timeout_ms = timeout;
    }
    if let Some(interval) = args.sweep_interval_ms {
        config.sweep_interval_ms = interval;
    }
    if args.no_sync_rules {
        config.features.sync_rules = false;
    }
    if args.no_reflow {
        config.features.reflow_on_switch_activation = false;
    }
    config.validate()?;
    Ok(config)
}

fn load_store(args: &Args) -> anyhow::Result<InMemoryFlowStore> {
    let Some(path) = &args.flows else {
        return Ok(InMemoryFlowStore::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let records: Vec<Flow> = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    let store = InMemoryFlowStore::from_records(records)?;
    info!("Loaded {} stored flow(s) from {}", store.len(), path.display());
    Ok(store)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let store = load_store(&args)?;
    info!("Workers: {}", config.workers);
    info!("Transaction timeout: {}ms", config.transaction_timeout_ms);
    info!("Known links: {}", config.isls.len());
    if !config.features.sync_rules {
        info!("Rule synchronization: DISABLED");
    }
    if !config.features.reflow_on_switch_activation {
        info!("Reflow on switch activation: DISABLED");
    }

    let topology = StaticTopology::new(&config.isls);
    let (speaker, mut commands) = ChannelSpeaker::channel();
    let (reply_tx, mut replies) = mpsc::unbounded_channel();
    let collaborators = Collaborators {
        store: Arc::new(store),
        path_computer: Arc::new(topology),
        speaker: Arc::new(speaker),
    };
    let daemon = FlowDaemon::start(config, collaborators, reply_tx)?;

    let writer = tokio::spawn(async move {
        let mut replies_open = true;
        let mut commands_open = true;
        while replies_open || commands_open {
            tokio::select! {
                reply = replies.recv(), if replies_open => match reply {
                    Some(reply) => emit(&reply),
                    None => replies_open = false,
                },
                command = commands.recv(), if commands_open => match command {
                    Some(command) => emit(&SpeakerLine::new(command)),
                    None => commands_open = false,
                },
            }
        }
    });

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => daemon.submit_raw(&line),
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(err) => {
                    error!("Failed to read input: {}", err);
                    break;
                }
            },
            signal = &mut shutdown => {
                match signal {
                    Ok(()) => warn!("Received SIGINT, shutting down gracefully..."),
                    Err(err) => error!("Failed to listen for ctrl-c: {}", err),
                }
                break;
            }
        }
    }

    let stats = daemon.shutdown().await;
    writer.await.context("output writer")?;
    info!(
        "Replies: {} success, {} failure, {} abandoned, {} malformed",
        stats.successes, stats.failures, stats.dropped, stats.malformed
    );

    let record = AuditRecord::new(AuditCategory::SystemLifecycle, "flowmgrd", "process_exit")
        .with_outcome(AuditOutcome::Success);
    audit_log!(record);
    Ok(())
}

#[derive(serde::Serialize)]
struct SpeakerLine {
    #[serde(rename = "type")]
    message_type: &'static str,
    payload: SpeakerCommand,
}

impl SpeakerLine {
    fn new(payload: SpeakerCommand) -> Self {
        Self {
            message_type: "speaker_command",
            payload,
        }
    }
}

fn emit<T: serde::Serialize>(message: &T) {
    match serde_json::to_string(message) {
        Ok(line) => println!("{}", line),
        Err(err) => error!("Failed to encode output: {}", err),
    }
}
