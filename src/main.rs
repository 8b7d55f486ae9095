// src/main.rs - chitu-host entry point: serial bridge, batch analysis and the analysis worker
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use chitu_rs::analysis::{AnalysisOrchestrator, AnalysisQueue};
use chitu_rs::communication::{BridgeCommand, BridgeError, SerialBridge};
use chitu_rs::config::{self, Config};
use chitu_rs::worker::{DecoderRegistry, run_worker};
use chitu_rs::{FirmwareTranslator, SessionHost};
use chitu_shared::InMemoryMetadataStore;
use chitu_shared::file_manager::{ExtensionRegistry, FileManager};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Parser, Debug)]
#[command(name = "chitu-host", version, about = "Host bridge for ChiTu resin printers.")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "chitu.toml")]
    config: PathBuf,

    /// Log at DEBUG level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the printer and print translated firmware output. Stdin takes
    /// `print <file>`, `pause`, `resume` or raw G-code
    Bridge {
        /// Serial port, overrides the config
        #[arg(long)]
        port: Option<String>,
    },
    /// Analyse sliced files or directories and print the results as JSON
    Analyze {
        /// Defaults to the configured upload directory
        paths: Vec<PathBuf>,
    },
    /// Analysis worker: report on one sliced file
    #[command(name = "sla-analysis")]
    SlaAnalysis { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let level = match (&cli.command, cli.verbose) {
        (_, true) => tracing::Level::DEBUG,
        (Commands::SlaAnalysis { .. }, false) => tracing::Level::WARN,
        _ => tracing::Level::INFO,
    };
    // stdout carries data (translated lines, JSON, worker reports).
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::SlaAnalysis { path } => {
            print!("{}", run_worker(&path, &DecoderRegistry::new()));
            Ok(())
        }
        Commands::Bridge { port } => {
            let config = load(&cli.config)?;
            bridge(config, port).await
        }
        Commands::Analyze { paths } => {
            let config = load(&cli.config)?;
            analyze(config, paths).await
        }
    }
}

fn load(path: &Path) -> Result<Config, BoxError> {
    tracing::info!("Loading configuration from: {}", path.display());
    config::load_config_or_default(path).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", path.display(), e);
        Box::new(e) as BoxError
    })
}

async fn bridge(config: Config, port: Option<String>) -> Result<(), BoxError> {
    let mut serial = config.serial;
    if let Some(port) = port {
        serial.port = port;
        serial.additional_ports.clear();
    }

    let mut bridge = SerialBridge::new(serial);
    bridge.connect()?;
    bridge.hello().await?;

    let (lines_tx, mut lines_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(line) = lines_rx.recv().await {
            println!("{}", line);
        }
    });

    let (commands_tx, commands_rx) = mpsc::unbounded_channel::<BridgeCommand>();
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(input)) = stdin.next_line().await {
            let Some(command) = BridgeCommand::parse(&input) else {
                continue;
            };
            if commands_tx.send(command).is_err() {
                break;
            }
        }
    });

    let mut translator = FirmwareTranslator::new();
    let mut host = SessionHost::new();
    match bridge.run(&mut translator, &mut host, commands_rx, lines_tx).await {
        Ok(()) | Err(BridgeError::Closed) => {
            tracing::info!("Bridge stopped, firmware version {}", translator.firmware_version());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn analyze(config: Config, paths: Vec<PathBuf>) -> Result<(), BoxError> {
    let files = FileManager::new(ExtensionRegistry::parse(&config.files.allowed_extensions));
    let paths = if paths.is_empty() {
        vec![config.files.upload_dir.clone()]
    } else {
        paths
    };

    let mut targets = Vec::new();
    for path in paths {
        let path = std::path::absolute(&path)?;
        if tokio::fs::metadata(&path).await?.is_dir() {
            targets.extend(files.list_sla_files(&path).await?.into_iter().map(|file| file.path));
        } else if files.registry().matches(&path) {
            targets.push(path);
        } else {
            tracing::warn!("Skipping {}, not a recognized sliced file", path.display());
        }
    }
    if targets.is_empty() {
        tracing::warn!("Nothing to analyse");
        return Ok(());
    }

    let orchestrator = Arc::new(AnalysisOrchestrator::from_config(&config.analysis)?);
    let (queue, mut finished) = AnalysisQueue::start(orchestrator, Arc::new(InMemoryMetadataStore::new()));
    for target in &targets {
        queue.enqueue(target.clone())?;
    }

    let mut report = Map::new();
    let mut remaining = targets.len();
    while remaining > 0 {
        let Some(done) = finished.recv().await else {
            break;
        };
        if let Some(record) = done.outcome.to_record()? {
            report.insert(done.path.display().to_string(), Value::Object(record));
            remaining -= 1;
        }
    }
    queue.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&Value::Object(report))?);
    Ok(())
}
