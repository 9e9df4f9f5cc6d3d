//! Param-Sweep - brute-force parameter optimization for strategy backtests
//!
//! Usage:
//!   param-sweep run --strategy rsi --data-file btc.csv   - Sweep from CLI
//!   param-sweep strategies                               - List built-in strategies
//!   param-sweep serve --port 3001                        - Launch HTTP API

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use sweep_engine::{
    iteration_limit_message, parse_param_spec, BacktestConfig, CombinationCount, DataSource,
    ParameterOverride, RankedResult, SortCriterion, StrategyInvoker, StrategyRegistry,
    SweepCanceller, SweepEvent, SweepProgress, SweepRequest, SweepRunner, SweepState,
    DEFAULT_MAX_ITERATIONS, DEFAULT_MIN_TRADES,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));
const DATA_FILE_ENV: &str = "PARAM_SWEEP_DATA_FILE";

#[derive(Parser)]
#[command(name = "param-sweep", version = APP_VERSION)]
#[command(about = "Brute-force parameter sweep for strategy backtests", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sweep from the CLI and print the ranked results
    Run(RunArgs),
    /// List built-in strategies with their default parameter ranges
    Strategies,
    /// Launch the sweep HTTP API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Strategy id (see `param-sweep strategies`)
    #[arg(long)]
    strategy: Option<String>,
    /// Historical CSV file (falls back to $PARAM_SWEEP_DATA_FILE)
    #[arg(long)]
    data_file: Option<PathBuf>,
    /// Binance symbol to download, e.g. BTCUSDT
    #[arg(long)]
    symbol: Option<String>,
    /// Binance kline interval
    #[arg(long, default_value = "1h")]
    interval: String,
    /// Days of Binance history
    #[arg(long, default_value_t = 30)]
    days: u32,
    /// Use a seeded random walk of this many bars
    #[arg(long)]
    synthetic_bars: Option<usize>,
    /// Seed for --synthetic-bars
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Parameter range override, name=min:max:step (repeatable)
    #[arg(long = "param")]
    params: Vec<String>,
    /// Discard results with fewer trades
    #[arg(long)]
    min_trades: Option<u32>,
    /// profit_factor, total_profit, max_drawdown or true_kelly
    #[arg(long)]
    sort_by: Option<String>,
    /// Reject sweeps with more combinations than this
    #[arg(long)]
    max_iterations: Option<u64>,
    /// Number of ranked results to print
    #[arg(long, default_value_t = 10)]
    top: usize,
    /// Optional JSON export path
    #[arg(long)]
    export: Option<String>,
    /// Load the sweep request from a JSON file; flags override its fields
    #[arg(long)]
    request: Option<PathBuf>,
}

#[derive(Clone)]
struct AppState {
    registry: Arc<StrategyRegistry>,
    progress: Arc<SweepProgress>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,sweep_engine=debug,param_sweep=debug")
    } else {
        EnvFilter::new("info,sweep_engine=info,param_sweep=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Run(args) => cmd_run(args).await?,
        Commands::Strategies => cmd_strategies()?,
        Commands::Serve { host, port } => cmd_serve(&host, port).await?,
    }

    Ok(())
}

// ============================================================================
// Run command - CLI mode
// ============================================================================

/// Merge the optional request file with command-line flags.
fn build_request(args: &RunArgs) -> anyhow::Result<SweepRequest> {
    let base = match &args.request {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            Some(serde_json::from_str::<SweepRequest>(&json)?)
        }
        None => None,
    };

    let strategy = args
        .strategy
        .clone()
        .or_else(|| base.as_ref().map(|r| r.strategy.clone()))
        .ok_or_else(|| anyhow::anyhow!("--strategy is required"))?;

    let data = if let Some(path) = &args.data_file {
        DataSource::File {
            path: path.display().to_string(),
        }
    } else if let Some(symbol) = &args.symbol {
        DataSource::Binance {
            symbol: symbol.to_uppercase(),
            interval: args.interval.clone(),
            days: args.days,
        }
    } else if let Some(bars) = args.synthetic_bars {
        DataSource::Synthetic {
            bars,
            seed: args.seed,
            start_price: Decimal::ONE_HUNDRED,
        }
    } else if let Some(data) = base.as_ref().map(|r| r.data.clone()) {
        data
    } else if let Ok(path) = std::env::var(DATA_FILE_ENV) {
        DataSource::File { path }
    } else {
        anyhow::bail!(
            "no historical data: pass --data-file, --symbol or --synthetic-bars, or set {}",
            DATA_FILE_ENV
        );
    };

    let mut parameters = base
        .as_ref()
        .map(|r| r.parameters.clone())
        .unwrap_or_default();
    for spec in &args.params {
        let param = parse_param_spec(spec)?;
        parameters.retain(|p| p.name != param.name);
        parameters.push(ParameterOverride {
            name: param.name,
            min: param.min,
            max: param.max,
            step: param.step,
        });
    }

    let sort_by = match &args.sort_by {
        Some(s) => s.parse::<SortCriterion>()?,
        None => base.as_ref().map(|r| r.sort_by).unwrap_or_default(),
    };

    Ok(SweepRequest {
        strategy,
        data,
        parameters,
        min_trades: args
            .min_trades
            .or_else(|| base.as_ref().map(|r| r.min_trades))
            .unwrap_or(DEFAULT_MIN_TRADES),
        sort_by,
        max_iterations: args
            .max_iterations
            .or_else(|| base.as_ref().map(|r| r.max_iterations))
            .unwrap_or(DEFAULT_MAX_ITERATIONS),
    })
}

#[derive(Serialize)]
struct SweepExport<'a> {
    strategy: &'a str,
    exported_at: String,
    state: SweepState,
    combinations: CombinationCount,
    processed: u64,
    failed: u64,
    sort_by: SortCriterion,
    min_trades: u32,
    results: &'a [RankedResult],
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    println!("\n=== Param-Sweep v{} ===", APP_VERSION);

    let request = build_request(&args)?;
    let registry = StrategyRegistry::builtin();
    let (config, entry) = request.into_config(&registry)?;

    let combinations = config.space.combination_count();
    println!("Strategy: {} ({})", entry.name, entry.id);
    println!("Data: {}", request.data.describe());
    for param in config.space.parameters() {
        println!(
            "  {:<12} {} .. {} step {}",
            param.name, param.min, param.max, param.step
        );
    }
    println!(
        "Combinations: {} | Min trades: {} | Sort: {} | Limit: {}",
        combinations, config.min_trades, config.sort_by, config.max_iterations
    );

    // Reject oversized sweeps before paying for the data download
    if config.exceeds_iteration_limit() {
        anyhow::bail!(iteration_limit_message(combinations, config.max_iterations));
    }
    println!("Press Ctrl+C to cancel\n");

    let klines = Arc::new(request.data.load().await?);
    let invoker = StrategyInvoker::new(entry.clone(), klines, BacktestConfig::default());
    let sort_by = config.sort_by;
    let min_trades = config.min_trades;
    let runner = SweepRunner::new(config, invoker);

    // Ctrl+C requests a cooperative stop
    let canceller = runner.canceller();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, requesting cancel...");
        canceller.cancel();
    });

    let mut handle = runner.run()?;
    let mut processed = 0;
    let mut failed = 0;
    let mut finished: Option<(SweepState, Vec<RankedResult>)> = None;
    let mut rejection: Option<String> = None;

    while let Some(event) = handle.recv().await {
        match event {
            SweepEvent::IterationLimitExceeded {
                combinations,
                ceiling,
            } => {
                rejection = Some(iteration_limit_message(combinations, ceiling));
            }
            SweepEvent::InvocationFailed { .. } => failed += 1,
            SweepEvent::Progress {
                processed: done,
                total,
                estimated_remaining,
            } => {
                processed = done;
                print_progress(done, total, estimated_remaining);
            }
            SweepEvent::Finished { state, results } => {
                finished = Some((state, results));
            }
        }
    }
    let report = handle.wait().await?;

    let Some((state, results)) = finished else {
        anyhow::bail!(rejection.unwrap_or_else(|| "sweep ended without results".to_string()));
    };

    match state {
        SweepState::Cancelled => println!(
            "\n  Cancelled after {} combinations ({} failed)",
            processed, failed
        ),
        _ => println!(
            "\n  Complete! {} combinations tested ({} failed, {} kept)",
            processed,
            failed,
            results.len()
        ),
    }

    if results.is_empty() {
        println!("\nNo results with at least {} trades.", min_trades);
    } else {
        print_results(&results, args.top);
    }

    if let Some(export_path) = args.export {
        let export = SweepExport {
            strategy: entry.id,
            exported_at: Utc::now().to_rfc3339(),
            state: report.state,
            combinations,
            processed,
            failed,
            sort_by,
            min_trades,
            results: &results,
        };
        let json = serde_json::to_string_pretty(&export)?;
        std::fs::write(&export_path, &json)?;
        println!("\nResults exported to {}", export_path);
    }

    Ok(())
}

fn print_progress(done: u64, total: u64, eta: Option<Duration>) {
    let pct = if total == 0 {
        100.0
    } else {
        done as f64 / total as f64 * 100.0
    };
    let bar_len = 30;
    let filled = ((pct as usize) * bar_len / 100).min(bar_len);
    let bar: String = "=".repeat(filled) + &" ".repeat(bar_len - filled);
    let eta = eta.map(format_duration).unwrap_or_else(|| "--".to_string());

    print!(
        "\r  [{}] {:>5.1}% ({}/{}) - remaining {}      ",
        bar, pct, done, total, eta
    );
    std::io::stdout().flush().ok();
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

fn print_results(results: &[RankedResult], top: usize) {
    println!("\nTop {} Results:", results.len().min(top));
    println!(
        "  {:>3}  {:<36} {:>6} {:>8} {:>10} {:>10} {:>8}",
        "#", "Parameters", "Trades", "PF", "PnL", "MaxDD", "Kelly%"
    );
    println!("  {}", "-".repeat(88));
    for r in results.iter().take(top) {
        let m = &r.result.metrics;
        println!(
            "  {:>3}  {:<36} {:>6} {:>8.2} {:>+10.2} {:>10.2} {:>8.2}",
            r.rank,
            r.result.assignment.label(),
            m.total_trades,
            m.profit_factor,
            m.net_profit,
            m.max_drawdown,
            m.true_kelly,
        );
    }
}

// ============================================================================
// Strategies command
// ============================================================================

fn cmd_strategies() -> anyhow::Result<()> {
    let registry = StrategyRegistry::builtin();
    println!("\nBuilt-in strategies:\n");
    for info in registry.list()? {
        println!("  {:<14} {} - {}", info.id, info.name, info.description);
        for param in &info.parameters {
            println!(
                "      {:<12} {} .. {} step {}",
                param.name, param.min, param.max, param.step
            );
        }
        println!("      {} combinations by default\n", info.combinations);
    }
    Ok(())
}

// ============================================================================
// Serve command - Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("Param-Sweep v{} starting...", APP_VERSION);

    let state = AppState {
        registry: Arc::new(StrategyRegistry::builtin()),
        progress: Arc::new(SweepProgress::new()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/strategies", get(api_strategies))
        .route("/sweep", post(api_start_sweep))
        .route("/sweep/status", get(api_sweep_status))
        .route("/sweep/cancel", post(api_cancel_sweep))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Param-Sweep v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check");
    println!("  GET  /api/strategies          - Built-in strategies and default ranges");
    println!("  POST /api/sweep               - Start a parameter sweep");
    println!("  GET  /api/sweep/status        - Poll sweep progress (?top=N)");
    println!("  POST /api/sweep/cancel        - Cancel the running sweep");
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "param-sweep",
        "version": APP_VERSION,
    }))
}

/// GET /api/strategies
async fn api_strategies(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let list = state.registry.list().map_err(|e| {
        error!("Invalid built-in strategy defaults: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(serde_json::json!({ "strategies": list })))
}

/// POST /api/sweep - validate, load data, then run in the background
async fn api_start_sweep(
    State(state): State<AppState>,
    Json(request): Json<SweepRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let (config, entry) = match request.into_config(&state.registry) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!("Rejected sweep request: {}", e);
            return Ok(Json(serde_json::json!({
                "success": false,
                "message": e.to_string(),
            })));
        }
    };
    let combinations = config.space.combination_count();

    // Registered before loading so a cancel during the download is kept
    let canceller = SweepCanceller::default();
    if !state.progress.try_start(entry.id, canceller.clone()) {
        let pct = state.progress.progress_pct();
        return Ok(Json(serde_json::json!({
            "success": false,
            "message": format!("Sweep already in progress ({:.0}% complete)", pct),
        })));
    }

    if config.exceeds_iteration_limit() {
        let message = iteration_limit_message(combinations, config.max_iterations);
        warn!(
            strategy = entry.id,
            combinations = %combinations,
            "Sweep rejected: too many combinations"
        );
        state.progress.apply(&SweepEvent::IterationLimitExceeded {
            combinations,
            ceiling: config.max_iterations,
        });
        return Ok(Json(serde_json::json!({
            "success": false,
            "message": message,
        })));
    }

    info!(
        strategy = entry.id,
        data = %request.data.describe(),
        combinations = %combinations,
        "Starting sweep from API"
    );

    let klines = match request.data.load().await {
        Ok(k) => Arc::new(k),
        Err(e) => {
            error!("Failed to load data for sweep: {:#}", e);
            state.progress.fail(format!("Failed to load data: {}", e));
            return Ok(Json(serde_json::json!({
                "success": false,
                "message": format!("Failed to load data: {}", e),
            })));
        }
    };

    if canceller.is_cancelled() {
        info!(strategy = entry.id, "Sweep cancelled while loading data");
        state.progress.apply(&SweepEvent::Finished {
            state: SweepState::Cancelled,
            results: Vec::new(),
        });
        return Ok(Json(serde_json::json!({
            "success": false,
            "message": "Sweep cancelled before it started",
        })));
    }

    let invoker = StrategyInvoker::new(entry.clone(), klines, BacktestConfig::default());
    let runner = SweepRunner::new(config, invoker).with_canceller(canceller);

    let mut handle = match runner.run() {
        Ok(h) => h,
        Err(e) => {
            state.progress.fail(e.to_string());
            return Ok(Json(serde_json::json!({
                "success": false,
                "message": e.to_string(),
            })));
        }
    };

    let progress = state.progress.clone();
    tokio::spawn(async move {
        while let Some(event) = handle.recv().await {
            progress.apply(&event);
        }
        if let Err(e) = handle.wait().await {
            error!("Sweep worker failed: {}", e);
            progress.fail(e.to_string());
        }
    });

    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("Sweep started: {} combinations", combinations),
        "combinations": combinations.to_string(),
    })))
}

/// GET /api/sweep/status
async fn api_sweep_status(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let top = params
        .get("top")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(50);
    Json(serde_json::json!(state.progress.snapshot(top)))
}

/// POST /api/sweep/cancel
async fn api_cancel_sweep(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cancelled = state.progress.cancel();
    Json(serde_json::json!({
        "success": cancelled,
        "message": if cancelled { "Cancellation requested" } else { "No sweep running" },
    }))
}
