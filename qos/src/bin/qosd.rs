use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand, ValueEnum};
use qos::{
    common::Rate,
    config::Config,
    control::{NodeExecutor, QosController, RecordingExecutor, ShellExecutor},
    probe::{LatencyProbe, PingCommand, SampleLog},
    tc::{Direction, RuleCompiler, ShapingPolicy},
    MarkerFile, MemoryChannel,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Latency-triggered traffic shaping daemon
#[derive(Parser, Debug)]
#[command(name = "qosd", version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "qosd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the latency probe and the controller in one process
    Run {
        /// Log node commands instead of executing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Run only the latency probe
    Probe,
    /// Run only the controller
    Controller {
        /// Log node commands instead of executing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the tc commands for one interface
    Compile {
        /// Link capacity in Mbit/s
        #[arg(long, default_value_t = 100.0)]
        capacity: f64,
        #[arg(long, value_enum, default_value_t = DirectionArg::Forward)]
        direction: DirectionArg,
        /// Interface name
        #[arg(long, default_value = "eth0")]
        dev: String,
    },
    /// Validate the configuration file
    Validate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Forward,
    Backward,
}

impl From<DirectionArg> for Direction {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::Forward => Direction::Forward,
            DirectionArg::Backward => Direction::Backward,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { dry_run } => {
            let config = Config::from_file(&cli.config)?;
            let shutdown = shutdown_signal();

            let probe = build_probe(&config).await?;
            let controller = build_controller(&config, dry_run)?;

            let probe = tokio::spawn(probe.run(shutdown.clone()));
            let controller = tokio::spawn(controller.run(shutdown));

            let (probe, controller) = tokio::join!(probe, controller);
            probe?;
            controller?;
        }
        Commands::Probe => {
            let config = Config::from_file(&cli.config)?;
            let shutdown = shutdown_signal();
            build_probe(&config).await?.run(shutdown).await;
        }
        Commands::Controller { dry_run } => {
            let config = Config::from_file(&cli.config)?;
            let shutdown = shutdown_signal();
            build_controller(&config, dry_run)?.run(shutdown).await;
        }
        Commands::Compile { capacity, direction, dev } => {
            // Use the configured classes if there is a config file, the defaults otherwise.
            let compiler = if cli.config.exists() {
                Config::from_file(&cli.config)?.compiler()?
            } else {
                RuleCompiler::new(ShapingPolicy::default())?
            };

            for command in compiler.compile(&dev, Rate::from_mbit_f64(capacity), direction.into())? {
                println!("{command}");
            }
        }
        Commands::Validate => {
            let config = Config::from_file(&cli.config)?;
            let controller = QosController::new(
                MemoryChannel::new(),
                RecordingExecutor::new(),
                config.registry()?,
                &config.compiler()?,
                config.controller_options(),
            )?;

            println!(
                "{}: ok ({} nodes, {} managed interfaces)",
                cli.config.display(),
                controller.registry().len(),
                controller.managed_interfaces()
            );
        }
    }

    Ok(())
}

/// Flips to `true` on the first interrupt.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(err = %e, "failed to listen for interrupts");
            // Keep the sender alive, otherwise the loops would read its drop as a shutdown.
            std::future::pending::<()>().await;
        }

        info!("interrupted, shutting down");
        let _ = tx.send(true);
    });

    rx
}

async fn build_probe(config: &Config) -> anyhow::Result<LatencyProbe<PingCommand, MarkerFile>> {
    let channel = MarkerFile::new(&config.alert.marker_path);
    let mut probe = LatencyProbe::new(config.pinger(), channel, config.probe_options());
    probe.clear_stale_alert().await;

    if let Some(path) = &config.probe.sample_log {
        probe = probe.with_sample_log(SampleLog::open(path).await?);
    }

    Ok(probe)
}

fn build_controller(
    config: &Config,
    dry_run: bool,
) -> anyhow::Result<QosController<MarkerFile, Arc<dyn NodeExecutor>>> {
    let executor: Arc<dyn NodeExecutor> = if dry_run {
        info!("dry run, node commands are logged and not executed");
        Arc::new(RecordingExecutor::new())
    } else {
        Arc::new(ShellExecutor::new(config.command_timeout()))
    };

    let controller = QosController::new(
        MarkerFile::new(&config.alert.marker_path),
        executor,
        config.registry()?,
        &config.compiler()?,
        config.controller_options(),
    )?
    .with_verifier(config.verifier());

    Ok(controller)
}
