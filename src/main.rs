use anyhow::Context;
use clap::{Parser, Subcommand};
use revdata::config::Settings;
use revdata_api::RestApi;
use revdata_core::{DataFormat, DatasetId, DedupConfig, NewDataset};
use revdata_ingest::{IngestService, Importer};
use revdata_storage::StorageManager;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Dataset ingestion and deduplication service
#[derive(Parser, Debug)]
#[command(name = "revdata")]
#[command(about = "Import, inspect and deduplicate review datasets", long_about = None)]
struct Args {
    /// TOML settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the data directory (overrides the settings file)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and the import workers
    Serve {
        #[arg(long)]
        http_port: Option<u16>,

        #[arg(long)]
        workers: Option<usize>,
    },
    /// Import a file synchronously and print the dataset
    Import {
        file: PathBuf,

        /// Name of the new dataset
        #[arg(long, required_unless_present = "append")]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Append to this dataset instead of creating one
        #[arg(long)]
        append: Option<DatasetId>,

        /// Dedup settings as JSON, stored on a new dataset
        #[arg(long)]
        dedup_config: Option<String>,
    },
    /// Detect fields of a file without importing it
    Preview { file: PathBuf },
    /// Re-normalize every stored item
    Normalize,
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn open_service(settings: &Settings, workers: usize) -> anyhow::Result<IngestService> {
    let storage = StorageManager::open(&settings.data_dir, settings.max_upload_size, settings.upload_chunk_size)
        .with_context(|| format!("opening data directory {}", settings.data_dir.display()))?;
    let importer = Importer::new(storage, settings.import_settings());
    Ok(IngestService::start(importer, workers, settings.queue_capacity))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let service = open_service(&settings, settings.workers)?;
    let report = service.recover().await?;
    info!(requeued = report.requeued, failed = report.failed, "Startup recovery done");

    let http_service = service.clone();
    let http_port = settings.http_port;
    let http_handle = std::thread::spawn(move || {
        let sys = actix_web::rt::System::new();
        sys.block_on(async {
            if let Err(e) = RestApi::start(http_service, http_port).await {
                eprintln!("HTTP server error: {}", e);
            }
        })
    });

    info!("revdata started");
    info!("HTTP API: http://localhost:{}/", http_port);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        _ = tokio::task::spawn_blocking(move || {
            http_handle.join().ok();
        }) => {
            info!("HTTP server stopped");
        }
    }

    info!("Shutting down...");
    service.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(dir) = args.data_dir {
        settings.data_dir = dir;
    }
    info!("revdata v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {:?}", settings.data_dir);

    match args.command {
        Command::Serve { http_port, workers } => {
            if let Some(port) = http_port {
                settings.http_port = port;
            }
            if let Some(workers) = workers {
                settings.workers = workers;
            }
            serve(settings).await
        }
        Command::Import {
            file,
            name,
            description,
            append,
            dedup_config,
        } => {
            let service = open_service(&settings, 1)?;
            let source = File::open(&file).with_context(|| format!("opening {}", file.display()))?;
            let upload = service.storage().spool.spool_reader(&file_name(&file), source)?;
            match append {
                Some(dataset_id) => {
                    let tally = service.append_now(dataset_id, upload).await?;
                    print_json(&tally)
                }
                None => {
                    let dedup_config: DedupConfig = match dedup_config {
                        Some(raw) => serde_json::from_str(&raw).context("parsing --dedup-config")?,
                        None => DedupConfig::default(),
                    };
                    let new = NewDataset {
                        name: name.unwrap_or_default(),
                        description,
                        source_file: file_name(&file),
                        dedup_config,
                        ..Default::default()
                    };
                    let dataset = service.import_now(upload, new).await?;
                    print_json(&dataset)
                }
            }
        }
        Command::Preview { file } => {
            let service = open_service(&settings, 1)?;
            let format = DataFormat::from_path(&file)?;
            let report = service.preview_path(file, format).await?;
            print_json(&report)
        }
        Command::Normalize => {
            let service = open_service(&settings, 1)?;
            let changed = service.normalize_all().await?;
            info!(changed, "Normalization finished");
            println!("{}", changed);
            Ok(())
        }
    }
}
