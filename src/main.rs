use clap::{Parser, Subcommand};
use lanza::config::{Config, ConfigError, LoggingConfig};
use lanza::record::{self, LaunchRecord};
use lanza::topology::builder::TopologyBuilder;
use lanza::topology::{HostKind, LaunchContext, Shard};
use lanza::Launcher;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "lanza")]
#[command(about = "Provision and bootstrap MongoDB standalones, replica sets and sharded clusters")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Lanza Team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision hosts and start the configured topologies
    Launch {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/launch.toml")]
        config: PathBuf,
        /// Rehearse against the in-crate simulated provider and driver
        #[arg(long)]
        simulate: bool,
    },
    /// Resolve placement and print the startup plan without launching
    Plan {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/launch.toml")]
        config: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Generate example configuration files
    Config {
        /// Topology kind (standalone, replicaset or sharded)
        #[arg(short, long)]
        mode: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Terminate the instances of the last recorded launch
    Terminate {
        /// Rehearse against the in-crate simulated provider
        #[arg(long)]
        simulate: bool,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Launch { config, simulate } => {
            run_launch(config, simulate).await?;
        }
        Commands::Plan { config } => {
            run_plan(config)?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
        Commands::Config { mode, output } => {
            generate_config(mode, output)?;
        }
        Commands::Terminate { simulate } => {
            run_terminate(simulate).await?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

async fn run_launch(config_path: PathBuf, simulate: bool) -> anyhow::Result<()> {
    let config = Config::load_from_file(&config_path)
        .map_err(|e| anyhow::anyhow!("failed to load config from {:?}: {}", config_path, e))?;

    init_logging(&config.logging)?;

    info!("starting lanza v{}", env!("CARGO_PKG_VERSION"));
    info!("configuration loaded from {:?}", config_path);

    let topology = TopologyBuilder::new(config.clone()).build()?;

    if !simulate {
        anyhow::bail!(
            "no compute provider integration is wired into this binary; \
             pass --simulate to rehearse the launch, or embed lanza as a \
             library with your own Provisioner and MongoDriver"
        );
    }

    let mut ctx = LaunchContext::simulated(config.provision.clone());
    // A rehearsal should not crawl through real one-second poll delays
    ctx.retry = lanza::poll::RetryPolicy::new(240, Duration::from_millis(50));
    ctx.record_path = Some(record::default_path());

    let launcher = Launcher::new(topology, ctx);
    let summary = launcher.launch().await?;

    println!();
    println!("Done. Setup took {:.1} seconds", summary.elapsed_secs);
    println!("Started the following hosts:");
    for (id, hostname) in &summary.hosts {
        println!("{}\t{}", id, hostname);
    }

    Ok(())
}

fn run_plan(config_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::load_from_file(&config_path)
        .map_err(|e| anyhow::anyhow!("failed to load config from {:?}: {}", config_path, e))?;
    let topology = TopologyBuilder::new(config).build()?;

    println!("Hosts:");
    for host in topology.hosts() {
        let kind = match host.kind() {
            HostKind::CloudInstance { image, .. } => format!("instance of {}", image),
            HostKind::ExistingMachine { address, .. } => format!("machine at {}", address),
        };
        println!("  {} ({})", host.id(), kind);
        for process_id in host.processes() {
            let process = topology.process(&process_id)?;
            println!(
                "    {} {} on port {}",
                process.role().bin(),
                process.id(),
                process.port()
            );
        }
    }

    for rs in topology.replica_sets() {
        println!("Replica set {} ({} members):", rs.name(), rs.members().len());
        for member in rs.members() {
            println!("  {}", member);
        }
    }

    for cluster in topology.clusters() {
        let router = topology.process(cluster.router())?;
        println!(
            "Sharded cluster {}: router {} with {} config server(s)",
            cluster.id(),
            router.id(),
            router.config_servers().len()
        );
        println!("  shards in registration order:");
        for shard in cluster.shards() {
            match shard {
                Shard::Standalone(id) => println!("    standalone {}", id),
                Shard::ReplicaSet(id) => println!("    replica set {}", id),
            }
        }
    }

    Ok(())
}

fn generate_config(mode: String, output: PathBuf) -> anyhow::Result<()> {
    println!("Generating {} configuration file: {:?}", mode, output);

    Config::create_example_config(&output, &mode)
        .map_err(|e| anyhow::anyhow!("failed to generate config: {}", e))?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  lanza launch --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Machines: {}", config.machines.len());
            println!("  Instances: {}", config.instances.len());
            println!("  Processes: {}", config.processes.len());
            println!("  Replica sets: {}", config.replica_sets.len());
            println!("  Sharded clusters: {}", config.clusters.len());
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::Io(msg) => eprintln!("  File error: {}", msg),
                ConfigError::Parse(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::Validation(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::Serialize(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

async fn run_terminate(simulate: bool) -> anyhow::Result<()> {
    let path = record::default_path();
    let record = LaunchRecord::load(&path)?;

    if !simulate {
        anyhow::bail!(
            "no compute provider integration is wired into this binary; \
             pass --simulate to rehearse the termination"
        );
    }

    let provisioner = lanza::provision::SimulatedProvisioner::new();
    record.terminate(&provisioner).await?;
    println!("Requested termination of {} instance(s)", record.handles.len());

    Ok(())
}

fn show_version() {
    println!("lanza v{}", env!("CARGO_PKG_VERSION"));
    println!("Provision and bootstrap MongoDB standalones, replica sets and sharded clusters");
    println!();
    println!("Features:");
    println!("  • Placement resolution with config-server colocation");
    println!("  • Dependency-ordered startup with bounded availability polling");
    println!("  • Bootstrap payload generation for Linux and Windows images");
    println!("  • Launch record for later bulk termination");
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    match &logging.file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!("logging initialized at level {}", logging.level);
    Ok(())
}
