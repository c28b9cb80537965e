use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cardsweep::config::load_config;
use cardsweep::ingest::{run_pass, VolumeLifecycleManager};
use cardsweep::ledger::SeenVolumeLedger;
use cardsweep::remote::{HttpDeviceConfigService, HttpMediaUploadService};
use cardsweep::volume::{LinuxVolumeServices, VolumeDirectory, VolumeServices};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// cardsweep command line arguments
#[derive(Parser, Debug)]
#[command(name = "cardsweep")]
#[command(version, about = "Ingest recordings from attached body-camera cards", long_about = None)]
struct CliArgs {
    /// JSON program configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// List volumes and ledger decisions without touching any device
    #[arg(long)]
    dry_run: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting cardsweep v{}", env!("CARGO_PKG_VERSION"));

    // Startup failures end the run before any volume is touched
    let config = load_config(&args.config)?;

    let mut ledger = SeenVolumeLedger::open(
        &config.ledger.path,
        Duration::from_secs(config.ledger.ttl_secs),
    );

    let services: Arc<dyn VolumeServices> = Arc::new(LinuxVolumeServices::new(
        config.volume.removable_only,
        config.volume.mount_fs_types.clone(),
    ));
    let directory = VolumeDirectory::new(services.clone());

    if args.dry_run {
        for volume in directory.list_volumes() {
            let seen = ledger.contains(&volume.ledger_key());
            tracing::info!(
                "{} label={} key={} mounts={:?} {}",
                volume.id,
                volume.label,
                volume.ledger_key(),
                volume.mount_points,
                if seen { "seen" } else { "would process" }
            );
        }
        return Ok(());
    }

    tokio::fs::create_dir_all(&config.volume.work_dir).await?;

    let manager = VolumeLifecycleManager::from_config(
        &config,
        services,
        Arc::new(HttpDeviceConfigService::new(&config.remote)?),
        Arc::new(HttpMediaUploadService::new(&config.remote)?),
    );

    run_pass(&directory, &manager, &mut ledger).await;

    tracing::info!("Done");
    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "cardsweep=error,reqwest=error",
        LogLevel::Warn => "cardsweep=warn,reqwest=warn",
        LogLevel::Info => "cardsweep=info,reqwest=warn",
        LogLevel::Verbose => "cardsweep=debug,reqwest=warn",
        LogLevel::Debug => "cardsweep=debug,reqwest=debug",
        LogLevel::Trace => "cardsweep=trace,reqwest=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
