use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::{error, info, warn};

use ioncount::{
    enumerate_devices, BatchSource, DeviceBuilder, IonCountConfig, KeyboardInputHandler,
    RunReport, SessionController,
};

#[derive(Parser, Debug)]
#[command(name = "ioncount")]
#[command(about = "Count particle-impact events across image batches and live camera streams")]
#[command(version)]
#[command(long_about = "Detects local-maximum impact events in 2-D intensity frames and \
accumulates a weighted event map, either over a directory of images or over a live, \
trigger-driven device stream. Results are written as CSV grids plus a JSON metadata record.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ioncount.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Override the output directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every image under a directory
    Batch {
        /// Directory holding the sample images
        input: PathBuf,

        /// Background directory; exports `sample - background * magnification`
        #[arg(long)]
        background: Option<PathBuf>,

        /// Worker threads (0 = available parallelism)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Acquire frames from a device until the cap, a stop request or end of stream
    Acquire {
        /// Device index as printed by `list-devices`
        #[arg(long)]
        device: Option<usize>,

        /// Stop after this many contributed frames
        #[arg(long)]
        frame_cap: Option<u64>,

        /// Free-run instead of waiting for triggers
        #[arg(long)]
        free_run: bool,

        /// Disable ENTER/q keyboard control
        #[arg(long)]
        no_keyboard: bool,
    },

    /// List available imaging devices
    ListDevices,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting ioncount v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match IonCountConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Some(output) = &args.output {
        config.output.path = output.clone();
    }

    let report = match args.command {
        None => {
            Args::command().print_help()?;
            return Ok(());
        }
        Some(Command::ListDevices) => {
            list_devices();
            return Ok(());
        }
        Some(Command::Batch {
            input,
            background,
            workers,
        }) => {
            if let Some(workers) = workers {
                config.batch.workers = workers;
            }
            run_batch(config, input, background).await?
        }
        Some(Command::Acquire {
            device,
            frame_cap,
            free_run,
            no_keyboard,
        }) => {
            if let Some(device) = device {
                config.acquisition.device_index = device;
            }
            if frame_cap.is_some() {
                config.acquisition.frame_cap = frame_cap;
            }
            if free_run {
                config.acquisition.trigger_mode = false;
            }
            if no_keyboard {
                config.acquisition.keyboard_control = false;
            }
            run_acquire(config).await?
        }
    };

    println!(
        "{} frames, {} events, {} skipped ({}) in {:.3}s",
        report.metadata.frames,
        report.metadata.events,
        report.metadata.skipped,
        report
            .metadata
            .termination_reason
            .map(|reason| reason.to_string())
            .unwrap_or_default(),
        report.metadata.elapsed_seconds()
    );

    Ok(())
}

async fn run_batch(
    config: IonCountConfig,
    input: PathBuf,
    background: Option<PathBuf>,
) -> Result<RunReport> {
    let source = BatchSource::from_dir(&input, &config.batch.extensions)?;
    let background = background
        .map(|dir| BatchSource::from_dir(dir, &config.batch.extensions))
        .transpose()?;

    let controller = SessionController::new(config).map_err(|e| {
        error!("Failed to configure session: {}", e);
        e
    })?;

    let report = controller.run_batch(source, background).await.map_err(|e| {
        error!("Batch run failed: {}", e);
        e
    })?;
    Ok(report)
}

async fn run_acquire(config: IonCountConfig) -> Result<RunReport> {
    let keyboard = config.acquisition.keyboard_control && std::io::stdin().is_terminal();
    let device = DeviceBuilder::new()
        .config(config.acquisition.clone())
        .build()?;

    let controller = SessionController::new(config)?.with_signal_handling(true);

    let (handler, controls) = if keyboard {
        let (handler, rx) = KeyboardInputHandler::channel();
        handler.start().await?;
        (Some(handler), Some(rx))
    } else {
        (None, None)
    };

    let result = controller.run_streaming(device, controls).await;

    if let Some(handler) = handler {
        if let Err(e) = handler.stop().await {
            warn!("Failed to stop keyboard handler: {}", e);
        }
    }

    result.map_err(|e| {
        error!("Acquisition failed: {}", e);
        e.into()
    })
}

fn list_devices() {
    let devices = enumerate_devices();
    if devices.is_empty() {
        println!("No devices found");
        return;
    }
    for device in devices {
        println!("{}", device);
    }
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ioncount={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# ioncount configuration file");
    println!("# Every key is optional; IONCOUNT_<SECTION>__<KEY> environment variables override it");
    println!();
    print!("{}", toml::to_string_pretty(&IonCountConfig::default())?);
    Ok(())
}
