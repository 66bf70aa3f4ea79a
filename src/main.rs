//! Leaf Topology
//!
//! Serves the leafnode topology of a set of NATS servers over REST, next to
//! a per-key locked account ledger and project counters. The demo
//! subcommands run the concurrent workloads from the command line.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use leaf_topology::demo::{self, AccountWorkload, RaceSettings};
use leaf_topology::{
    AccountLedger, ApiServer, ApiServerConfig, Error, Metrics, ProjectCounters, Result,
    TopologyConfig, TopologyService,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Leaf Topology - keyed state manager and fan-out topology aggregator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the REST API and health servers
    Serve(ServeArgs),
    /// Run one topology round and print it as JSON
    Topology(TopologyArgs),
    /// Concurrent deposits and withdrawals on one balance, with and without locking
    RaceDemo(RaceArgs),
    /// Concurrent deposits across many accounts
    AccountDemo(AccountArgs),
    /// Concurrent increments across many project counters
    ProjectDemo(ProjectArgs),
}

/// Where the target list comes from; flags override the file
#[derive(Args, Debug, Clone)]
struct TargetArgs {
    /// YAML config file
    #[arg(long, short, env = "TOPOLOGY_CONFIG")]
    config: Option<PathBuf>,

    /// Comma-separated server monitoring addresses
    #[arg(long, env = "TOPOLOGY_SERVERS", value_delimiter = ',')]
    servers: Vec<String>,

    /// Endpoint path queried on every server
    #[arg(long, env = "TOPOLOGY_QUERY")]
    query: Option<String>,

    /// Per-probe timeout in milliseconds
    #[arg(long, env = "PROBE_TIMEOUT_MS")]
    probe_timeout_ms: Option<u64>,

    /// Bound on a whole round in milliseconds
    #[arg(long, env = "ROUND_DEADLINE_MS")]
    round_deadline_ms: Option<u64>,

    /// Port reported for master nodes
    #[arg(long, env = "CONTROL_PORT")]
    control_port: Option<u16>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[command(flatten)]
    targets: TargetArgs,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8080")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,
}

#[derive(Args, Debug)]
struct TopologyArgs {
    #[command(flatten)]
    targets: TargetArgs,

    /// Print the full snapshot, including failed targets
    #[arg(long)]
    full: bool,
}

#[derive(Args, Debug)]
struct RaceArgs {
    /// Number of runs for each mode
    #[arg(long, default_value = "5")]
    runs: usize,

    /// Starting balance
    #[arg(long, default_value = "100")]
    initial: u64,

    /// Amount per deposit and withdrawal
    #[arg(long, default_value = "10")]
    amount: u64,

    /// Number of concurrent deposits
    #[arg(long, default_value = "5")]
    deposits: usize,

    /// Number of concurrent withdrawals
    #[arg(long, default_value = "5")]
    withdrawals: usize,

    /// Pause between read and write, in milliseconds
    #[arg(long, default_value = "5")]
    settle_ms: u64,
}

#[derive(Args, Debug)]
struct AccountArgs {
    #[arg(long, default_value = "10")]
    accounts: usize,

    #[arg(long, default_value = "1000")]
    initial: u64,

    #[arg(long, default_value = "5")]
    deposits: usize,

    #[arg(long, default_value = "10")]
    amount: u64,
}

#[derive(Args, Debug)]
struct ProjectArgs {
    #[arg(long, default_value = "100")]
    projects: usize,

    #[arg(long, default_value = "1000")]
    tasks: usize,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli);

    let result = match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Topology(args) => topology(args).await,
        Command::RaceDemo(args) => race_demo(args).await,
        Command::AccountDemo(args) => account_demo(args).await,
        Command::ProjectDemo(args) => project_demo(args).await,
    };

    if let Err(e) = &result {
        error!(error = %e, fatal = e.is_fatal(), "command failed");
    }
    result
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = resolve_config(&args.targets)?;

    let api_config = ApiServerConfig {
        rest_addr: args.api_addr.parse().map_err(|e| {
            Error::Configuration(format!("Invalid REST API address: {}", e))
        })?,
        health_addr: args.health_addr.parse().map_err(|e| {
            Error::Configuration(format!("Invalid health server address: {}", e))
        })?,
    };

    info!("Starting Leaf Topology");
    info!("  Version: {}", leaf_topology::VERSION);
    info!("  REST API: {}", api_config.rest_addr);
    info!("  Health: {}", api_config.health_addr);
    info!("  Targets: {}", config.servers.join(", "));

    let metrics = Arc::new(Metrics::new()?);
    let topology = Arc::new(TopologyService::from_config(&config)?.with_metrics(metrics.clone()));
    let ledger = Arc::new(AccountLedger::new().with_metrics(metrics.clone()));
    let counters = Arc::new(ProjectCounters::new());

    let ready = Arc::new(AtomicBool::new(false));
    let health_addr = api_config.health_addr;
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_ready).await {
            error!("Health server error: {}", e);
        }
    });

    let server = Arc::new(ApiServer::new(api_config, topology, ledger, counters, metrics));
    let listener = tokio::net::TcpListener::bind(server.rest_addr())
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;
    ready.store(true, Ordering::SeqCst);

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, shutting down");
            signal_server.shutdown();
        }
    });

    server.serve(listener).await?;
    info!("Shutdown complete");
    Ok(())
}

async fn topology(args: TopologyArgs) -> Result<()> {
    let config = resolve_config(&args.targets)?;
    let service = TopologyService::from_config(&config)?;
    let snapshot = service.fetch().await?;

    let json = if args.full {
        serde_json::to_string_pretty(&snapshot)?
    } else {
        serde_json::to_string_pretty(&snapshot.graph)?
    };
    println!("{}", json);
    Ok(())
}

async fn race_demo(args: RaceArgs) -> Result<()> {
    let settings = RaceSettings {
        initial: args.initial,
        amount: args.amount,
        deposits: args.deposits,
        withdrawals: args.withdrawals,
        settle_delay: std::time::Duration::from_millis(args.settle_ms),
    };

    for guarded in [true, false] {
        let mut consistent = 0;
        for run in 1..=args.runs {
            let report = demo::balance_race(guarded, &settings).await?;
            if report.consistent {
                consistent += 1;
            }
            println!(
                "{} run {}: expected {} got {}",
                if guarded { "guarded" } else { "unguarded" },
                run,
                report.expected,
                report.final_balance
            );
        }
        println!(
            "{}: {}/{} runs consistent",
            if guarded { "guarded" } else { "unguarded" },
            consistent,
            args.runs
        );
    }
    Ok(())
}

async fn account_demo(args: AccountArgs) -> Result<()> {
    let workload = AccountWorkload {
        accounts: args.accounts,
        initial: args.initial,
        deposits_per_account: args.deposits,
        amount: args.amount,
    };
    let report = demo::account_workload(Arc::new(AccountLedger::new()), &workload).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn project_demo(args: ProjectArgs) -> Result<()> {
    let report =
        demo::project_workload(Arc::new(ProjectCounters::new()), args.projects, args.tasks).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// File first, then flags, then validation
fn resolve_config(args: &TargetArgs) -> Result<TopologyConfig> {
    let mut config = match &args.config {
        Some(path) => TopologyConfig::read(path)?,
        None => TopologyConfig::default(),
    };

    if !args.servers.is_empty() {
        config.servers = args.servers.clone();
    }
    if let Some(query) = &args.query {
        config.query = query.clone();
    }
    if let Some(ms) = args.probe_timeout_ms {
        config.probe_timeout_ms = ms;
    }
    if args.round_deadline_ms.is_some() {
        config.round_deadline_ms = args.round_deadline_ms;
    }
    if let Some(port) = args.control_port {
        config.control_port = port;
    }

    config.normalise();
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info", "tower=warn", "tower_http=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: SocketAddr, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::SeqCst);
                async move {
                    let (status, body) = match req.uri().path() {
                        "/healthz" | "/livez" => (StatusCode::OK, "ok"),
                        "/readyz" if ready => (StatusCode::OK, "ready"),
                        "/readyz" => (StatusCode::SERVICE_UNAVAILABLE, "starting"),
                        _ => (StatusCode::NOT_FOUND, "not found"),
                    };
                    let mut response = Response::new(Body::from(body));
                    *response.status_mut() = status;
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind health server: {}", e)))?
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}
