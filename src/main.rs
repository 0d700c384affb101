use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use depgraph::config::Config;
use depgraph::discovery::{ManifestDiscovery, MirrorDiscovery};
use depgraph::graph::{FileBackend, GraphStore, StoreError};
use depgraph::logging::{init_logging, parse_level, LoggingConfig};
use depgraph::metrics::Metrics;
use depgraph::pipeline::{Cancellation, Pipeline, RunReport, UnresolvedPolicy};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "depgraph")]
#[command(author = "William Perron")]
#[command(version)]
#[command(about = "Builds the dependency graph of a module registry", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover packages and ingest their dependency graph
    Ingest(IngestArgs),
    /// Look up a node by specifier in a persisted store
    Lookup {
        /// Specifier to look up, e.g. x/oak@12.0.0/mod.ts
        specifier: String,

        /// Graph store file
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Show version information
    Version,
}

#[derive(Args)]
struct IngestArgs {
    /// JSON manifest of packages to ingest
    #[arg(long, conflicts_with = "mirror", required_unless_present = "mirror")]
    manifest: Option<PathBuf>,

    /// Local registry mirror laid out as <name>/<version>/...
    #[arg(long)]
    mirror: Option<PathBuf>,

    /// Graph store file
    #[arg(long)]
    store: Option<PathBuf>,

    /// Registry host used to build locators
    #[arg(long)]
    host: Option<String>,

    /// Dedup queue capacity (0 = synchronous hand-off)
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Packages analysed concurrently
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Analyzer program
    #[arg(long)]
    analyzer: Option<PathBuf>,

    /// Per-file analyzer timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// What to record for files that fail analysis (skip, placeholder)
    #[arg(long)]
    unresolved: Option<UnresolvedPolicy>,

    /// Serve Prometheus metrics on this address, e.g. 127.0.0.1:9090
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

impl IngestArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(store) = &self.store {
            config.store_path = store.clone();
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(max) = self.max_concurrent {
            config.max_concurrent_packages = max;
        }
        if let Some(analyzer) = &self.analyzer {
            config.analyzer_program = analyzer.clone();
        }
        if let Some(timeout) = self.timeout {
            config.analyzer_timeout_secs = timeout;
        }
        if let Some(policy) = self.unresolved {
            config.unresolved = policy;
        }
        if let Some(addr) = self.metrics_addr {
            config.metrics_addr = Some(addr);
        }
    }
}

fn init(cli: &Cli, config: &mut Config) -> Result<()> {
    if let Some(level) = &cli.log_level {
        config.log_level = level.to_lowercase();
    }
    config.log_json |= cli.log_json;
    config.validate()?;

    let level = parse_level(&config.log_level).unwrap_or(tracing::Level::INFO);
    init_logging(LoggingConfig {
        level,
        use_json: config.log_json,
        ..Default::default()
    });
    Ok(())
}

fn print_report(report: &RunReport, store: &Path, nodes: usize, edges: usize) {
    let summary = &report.summary;
    println!("Packages:        {}", summary.packages);
    println!("Versions:        {}", summary.versions);
    println!("Files analyzed:  {}", summary.files_analyzed);
    println!("Files skipped:   {}", summary.files_skipped);
    if summary.placeholders > 0 {
        println!("Placeholders:    {}", summary.placeholders);
    }
    println!(
        "Nodes:           {} created, {} existing",
        summary.nodes_created, summary.nodes_existing
    );
    println!(
        "Edges:           {} created, {} existing",
        summary.edges_created, summary.edges_existing
    );

    let by_stage: Vec<String> = report
        .errors
        .iter()
        .map(|(stage, count)| format!("{}: {}", stage, count))
        .collect();
    if by_stage.is_empty() {
        println!("Errors:          0");
    } else {
        println!("Errors:          {} ({})", report.error_count(), by_stage.join(", "));
    }
    println!("Store:           {} ({} nodes, {} edges)", store.display(), nodes, edges);
}

async fn ingest(cli: &Cli, args: &IngestArgs) -> Result<ExitCode> {
    let mut config = Config::from_env()?;
    args.apply(&mut config);
    init(cli, &mut config)?;

    let store = GraphStore::new(Arc::new(FileBackend::new(&config.store_path)));
    let mut pipeline = Pipeline::new(
        store.clone(),
        Arc::new(config.analyzer()),
        config.layout(),
        config.pipeline_options(),
    );

    let mut exporter = None;
    if let Some(addr) = config.metrics_addr {
        let metrics = Metrics::new()?;
        let (_, handle) = metrics
            .serve(addr)
            .context("Failed to start metrics endpoint")?;
        exporter = Some(handle);
        pipeline = pipeline.with_metrics(metrics);
    }

    let cancel = Cancellation::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    let report = match (&args.manifest, &args.mirror) {
        (Some(manifest), _) => pipeline.run(ManifestDiscovery::new(manifest), cancel).await,
        (None, Some(mirror)) => {
            let discovery = MirrorDiscovery::new(mirror).with_entry_names(config.entry_names.clone());
            pipeline.run(discovery, cancel).await
        }
        (None, None) => bail!("one of --manifest or --mirror is required"),
    }
    .context("Pipeline failed to start")?;

    if let Some(handle) = exporter {
        handle.abort();
    }

    if report.cancelled {
        warn!("Run cancelled; the store holds everything written so far");
        return Ok(ExitCode::from(130));
    }

    let counts = store.counts().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &config.store_path, counts.nodes, counts.edges);
    }
    info!(errors = report.error_count(), "Ingestion finished");
    Ok(ExitCode::SUCCESS)
}

async fn lookup(cli: &Cli, specifier: &str, store_path: Option<&PathBuf>) -> Result<ExitCode> {
    let mut config = Config::from_env()?;
    if let Some(path) = store_path {
        config.store_path = path.clone();
    }
    init(cli, &mut config)?;

    if !config.store_path.exists() {
        bail!("No graph store at {}", config.store_path.display());
    }
    let store = GraphStore::new(Arc::new(FileBackend::new(&config.store_path)));
    store
        .init_schema()
        .await
        .with_context(|| format!("Failed to open {}", config.store_path.display()))?;

    match store.lookup_by_specifier(specifier).await {
        Ok(Some(node)) => {
            println!("{}", serde_json::to_string_pretty(&node)?);
            Ok(ExitCode::SUCCESS)
        }
        Ok(None) => {
            eprintln!("No node for {}", specifier);
            Ok(ExitCode::from(1))
        }
        Err(err @ StoreError::Integrity { .. }) => {
            eprintln!("Error: {}", err);
            Ok(ExitCode::from(2))
        }
        Err(err) => Err(err.into()),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match &cli.command {
        Some(Commands::Ingest(args)) => ingest(&cli, args).await,
        Some(Commands::Lookup { specifier, store }) => lookup(&cli, specifier, store.as_ref()).await,
        Some(Commands::Version) => {
            println!("depgraph v{}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("depgraph - registry dependency-graph ingestion");
            println!("Run 'depgraph ingest --manifest FILE' to ingest a package list");
            println!("Run 'depgraph --help' for more information");
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
