use clap::{Parser, Subcommand};
use rebind::capture::{AfPacketEngine, CaptureEngine, CaptureLog, PcapWriter, RECEIVE_DEVICE};
use rebind::config::{self, Config, Overrides};
use rebind::dataplane::{RebindConfig, RebindEngine, Session};
use rebind::host::{AdapterEnumerator, HostAdapter, LinuxAdapters};
use rebind::process::{ProcessTable, ProcfsTable};
use rebind::telemetry::{init_logging, RebindStats};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "rebind.toml";

#[derive(Parser)]
#[command(name = "rebind")]
#[command(about = "Move one application's traffic to another network adapter")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite the application's frames until interrupted
    Run {
        /// Path to rebind.toml (optional when every value is given as a flag)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Substring of the target process name
        #[arg(long = "app")]
        application: Option<String>,

        /// Adapter the application's traffic is moved to
        #[arg(long)]
        adapter: Option<String>,

        /// Adapter the traffic normally leaves through
        #[arg(long)]
        default_adapter: Option<String>,
    },
    /// List the default adapter and the alternatives
    Adapters {
        /// Destination used to rank adapters
        #[arg(long, default_value_t = config::DEFAULT_PROBE)]
        probe: Ipv4Addr,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate rebind.toml
    Validate {
        /// Path to rebind.toml
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config: config_path,
            application,
            adapter,
            default_adapter,
        } => cmd_run(
            config_path.as_deref(),
            Overrides {
                application,
                adapter,
                default_adapter,
            },
        ),
        Commands::Adapters { probe } => {
            init_logging(None);
            cmd_adapters(probe)
        }
        Commands::Config {
            action: ConfigAction::Validate {
                config: config_path,
            },
        } => {
            init_logging(None);
            cmd_config_validate(&config_path)
        }
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

/// Load the explicit config file, or rebind.toml when present, or defaults
fn load_config(path: Option<&Path>) -> Result<Config, String> {
    match path {
        Some(path) => config::load(path).map_err(|e| format!("Failed to load config: {}", e)),
        None if Path::new(DEFAULT_CONFIG).exists() => config::load(DEFAULT_CONFIG)
            .map_err(|e| format!("Failed to load config: {}", e)),
        None => Ok(Config::default()),
    }
}

fn cmd_run(config_path: Option<&Path>, overrides: Overrides) -> Result<(), String> {
    let mut cfg = load_config(config_path)?;
    cfg.apply(overrides);

    let validation = config::validate(&cfg);
    validation.print_diagnostics();
    if validation.has_errors() {
        return Err("Validation failed".to_string());
    }

    init_logging(Some(&cfg.logging));

    let adapters = LinuxAdapters::new();
    let default_adapter = match &cfg.rebind.default_adapter {
        Some(name) => adapters.adapter(name).map_err(|e| e.to_string())?,
        None => adapters
            .best_adapter(cfg.rebind.probe)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("No adapter routes to {}", cfg.rebind.probe))?,
    };
    let rebind_adapter = adapters
        .adapter(&cfg.rebind.adapter)
        .map_err(|e| e.to_string())?;

    let stats = Arc::new(RebindStats::new());
    let mut capture = AfPacketEngine::new(Arc::clone(&stats))
        .map_err(|e| format!("Failed to open capture engine: {}", e))?;

    let rebind_config = RebindConfig::resolve(
        capture.interfaces(),
        &default_adapter,
        &rebind_adapter,
        &cfg.rebind.application,
    )
    .map_err(|e| e.to_string())?;
    println!("{}", rebind_config);

    capture.open_receive_path(RECEIVE_DEVICE).map_err(|e| {
        format!(
            "Failed to create receive path device {}: {}. Run with root privileges.",
            RECEIVE_DEVICE, e
        )
    })?;

    let table: Arc<dyn ProcessTable> = Arc::new(
        ProcfsTable::load().map_err(|e| format!("Failed to read process table: {}", e))?,
    );

    let mut engine = RebindEngine::new(Arc::new(rebind_config), table, Arc::clone(&stats));
    if cfg.capture_log.enabled {
        let writer = PcapWriter::create(&cfg.capture_log.path).map_err(|e| {
            format!(
                "Failed to create capture log {}: {}",
                cfg.capture_log.path.display(),
                e
            )
        })?;
        let log: Arc<dyn CaptureLog> = Arc::new(writer);
        engine = engine.with_capture_log(log);
        info!("Logging rewritten frames to {}", cfg.capture_log.path.display());
    }

    let capture: Arc<dyn CaptureEngine> = Arc::new(capture);
    let session = Session::new(capture, Arc::new(engine));
    session
        .start()
        .map_err(|e| format!("{}. Run with root privileges.", e))?;

    println!("Filtering started. Press Ctrl-C to stop.");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to create runtime: {}", e))?;
    if let Err(e) = rt.block_on(tokio::signal::ctrl_c()) {
        warn!("Failed to wait for Ctrl-C: {}", e);
    }

    session.stop();

    for (name, value) in stats.export() {
        info!("{}: {}", name, value);
    }
    Ok(())
}

fn cmd_adapters(probe: Ipv4Addr) -> Result<(), String> {
    let adapters = LinuxAdapters::new();

    let default = adapters.best_adapter(probe).map_err(|e| e.to_string())?;
    let routable = adapters
        .routable_adapters(probe)
        .map_err(|e| e.to_string())?;

    match &default {
        Some(adapter) => {
            println!("Default adapter:");
            print!("{}", adapter);
        }
        None => println!("No adapter routes to {}", probe),
    }

    let alternatives: Vec<&HostAdapter> = routable
        .iter()
        .filter(|adapter| {
            default
                .as_ref()
                .is_none_or(|d| d.adapter_name != adapter.adapter_name)
        })
        .collect();

    if !alternatives.is_empty() {
        println!();
        println!("Alternative adapters:");
        for adapter in alternatives {
            print!("{}", adapter);
        }
    }
    Ok(())
}

fn cmd_config_validate(config_path: &Path) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}
