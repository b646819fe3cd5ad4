//! windroute operator CLI
//!
//! Reads config from env vars (a `.env` file is honoured):
//!   WINDROUTE_BACKEND_URL         - routing backend base URL (default: http://127.0.0.1:8000/)
//!   WINDROUTE_REQUEST_TIMEOUT_MS  - per-request timeout (default: 5000)
//!   WINDROUTE_POLL_INTERVAL_MS    - reconciliation period (default: 2000)
//!   WINDROUTE_AUTHORITY           - `backend` or `grace:<ms>` (default: backend)
//!   WINDROUTE_LAYOUT              - facility layout YAML (optional)
//!
//! # Usage
//!
//! ```bash
//! windroute zones
//! windroute activate --zone A --wind north
//! windroute path --zone 3 --wind northwest
//! windroute watch
//! windroute demo
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;

use windroute::client::{ControlBackend, HttpBackend, InMemoryBackend};
use windroute::engine::{EngineSnapshot, RouteEngine, SelectionState};
use windroute::layout::{Layout, Waypoint};
use windroute::path::PathBuilder;
use windroute::policy::{PolicyResolver, PolicyStore};
use windroute::ConsoleConfig;

#[derive(Parser)]
#[command(name = "windroute")]
#[command(version)]
#[command(about = "Activate wind-dependent routes and render their paths")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "pretty", value_enum)]
    format: OutputFormat,

    /// Backend base URL (overrides WINDROUTE_BACKEND_URL)
    #[arg(long, global = true, env = "WINDROUTE_BACKEND_URL")]
    backend: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// List zones and wind directions that have registered routes
    Zones,

    /// Activate the route for a zone and wind direction
    Activate {
        #[arg(short, long)]
        zone: String,
        #[arg(short, long)]
        wind: String,
    },

    /// Deactivate a zone
    Deactivate {
        #[arg(short, long)]
        zone: String,
    },

    /// Deactivate every active zone
    Clear,

    /// Resolve and render a route without activating it
    Path {
        #[arg(short, long)]
        zone: String,
        #[arg(short, long)]
        wind: String,
    },

    /// Follow the backend and print every change in the local view
    Watch,

    /// Run a scripted session against an in-memory backend
    Demo,
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,windroute=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {:#}", "error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = ConsoleConfig::from_env()?;
    if let Some(url) = cli.backend {
        config = config.backend_url(url);
    }
    let format = cli.format;

    if let Commands::Demo = cli.command {
        return cmd_demo(&config, format).await;
    }

    let layout = Arc::new(match &config.layout_path {
        Some(path) => Layout::load(path)?,
        None => {
            tracing::warn!("WINDROUTE_LAYOUT not set; paths will render blank");
            Layout::default()
        }
    });
    let backend: Arc<dyn ControlBackend> = Arc::new(
        HttpBackend::new(&config.backend_url, config.request_timeout)
            .context("Failed to build backend client")?,
    );

    match cli.command {
        Commands::Zones => cmd_zones(backend, format).await,
        Commands::Activate { zone, wind } => {
            let mut engine = RouteEngine::new(backend, layout, &config);
            engine.refresh().await?;
            let outcome = engine.activate(Some(&zone), Some(&wind)).await?;
            print_status(&engine.snapshot().await, format)?;
            tracing::debug!(route_id = outcome.route_id, source = ?outcome.source, "Activated");
            Ok(())
        }
        Commands::Deactivate { zone } => {
            let mut engine = RouteEngine::new(backend, layout, &config);
            engine.refresh().await?;
            engine.deactivate(&zone).await?;
            print_status(&engine.snapshot().await, format)
        }
        Commands::Clear => {
            let mut engine = RouteEngine::new(backend, layout, &config);
            engine.refresh().await?;
            engine.clear().await;
            print_status(&engine.snapshot().await, format)
        }
        Commands::Path { zone, wind } => cmd_path(backend, layout, &zone, &wind, format).await,
        Commands::Watch => cmd_watch(backend, layout, &config, format).await,
        Commands::Demo => Ok(()),
    }
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

async fn cmd_zones(backend: Arc<dyn ControlBackend>, format: OutputFormat) -> Result<()> {
    let store = PolicyStore::new(backend);
    let index = store.load().await?;

    #[derive(Serialize)]
    struct Listing<'a> {
        zones: &'a [windroute::policy::ZoneOption],
        winds: &'a [String],
        routes: usize,
    }

    match format {
        OutputFormat::Json => print_json(&Listing {
            zones: index.available_zones(),
            winds: index.available_winds(),
            routes: index.route_count(),
        }),
        OutputFormat::Pretty => {
            println!("{}", "Zones".cyan().bold());
            for zone in index.available_zones() {
                println!("  {:<6} {} (id {})", zone.label.green(), zone.zone_name, zone.zone_id);
            }
            println!("{}", "Winds".cyan().bold());
            for wind in index.available_winds() {
                println!("  {}", wind);
            }
            println!("{} route(s) registered", index.route_count());
            Ok(())
        }
    }
}

async fn cmd_path(
    backend: Arc<dyn ControlBackend>,
    layout: Arc<Layout>,
    zone: &str,
    wind: &str,
    format: OutputFormat,
) -> Result<()> {
    let store = Arc::new(PolicyStore::new(Arc::clone(&backend)));
    store.load().await?;
    let resolver = PolicyResolver::new(store, backend);
    let paths = PathBuilder::new(layout);

    let (entry, policy) = resolver.resolve_with_policy(zone, wind).await?;
    let rendered = paths.render_route(zone, &policy);

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "route_id": entry.route_id,
            "zone": zone,
            "wind": wind,
            "policy": policy,
            "path": rendered.description,
        })),
        OutputFormat::Pretty => {
            println!(
                "{} route {} for zone {} ({})",
                "OK".green(),
                entry.route_id,
                zone,
                wind
            );
            for (i, step) in policy.iter().enumerate() {
                println!("  [{}] device {} -> {}", i, step.device_id, step.direction);
            }
            if rendered.is_blank() {
                println!("  {}", "(no drawable path)".dimmed());
            } else {
                println!("  {}", rendered.description);
            }
            Ok(())
        }
    }
}

async fn cmd_watch(
    backend: Arc<dyn ControlBackend>,
    layout: Arc<Layout>,
    config: &ConsoleConfig,
    format: OutputFormat,
) -> Result<()> {
    let handle = RouteEngine::new(backend, layout, config).spawn();
    let mut updates = handle.subscribe();
    print_status(&handle.snapshot(), format)?;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                print_status(&snapshot, format)?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }
    handle.shutdown().await;
    Ok(())
}

async fn cmd_demo(config: &ConsoleConfig, format: OutputFormat) -> Result<()> {
    let backend = Arc::new(InMemoryBackend::demo());
    let layout = Arc::new(demo_layout());
    let mut engine = RouteEngine::new(backend.clone(), layout, config);

    println!("{}: in-memory facility", "Demo".cyan().bold());
    engine.refresh().await?;
    print_status(&engine.snapshot().await, format)?;

    engine.select_zone(Some("A".into()));
    engine.select_wind(Some("north".into()));
    engine.activate_selected().await?;
    print_status(&engine.snapshot().await, format)?;

    println!("{}", "Another console activates zone B".cyan());
    backend.force_active(2, "north").await;
    engine.tick().await?;
    print_status(&engine.snapshot().await, format)?;

    engine.activate(Some("3"), Some("northwest")).await?;
    print_status(&engine.snapshot().await, format)?;

    engine.clear().await;
    print_status(&engine.snapshot().await, format)?;
    println!("{} Demo complete", "OK".green().bold());
    Ok(())
}

fn demo_layout() -> Layout {
    Layout::default()
        .with_entry(Waypoint::new(0.0, 0.0))
        .with_device(1, Waypoint::new(10.0, 0.0))
        .with_device(2, Waypoint::new(10.0, 10.0))
        .with_device(3, Waypoint::new(20.0, 0.0))
        .with_device(4, Waypoint::new(20.0, 10.0))
        .with_zone("A", Waypoint::new(30.0, 10.0))
        .with_zone("B", Waypoint::new(30.0, 20.0))
        .with_zone("3", Waypoint::new(30.0, 0.0))
}

// =============================================================================
// OUTPUT
// =============================================================================

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("JSON serialization failed")?
    );
    Ok(())
}

fn print_status(snapshot: &EngineSnapshot, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(snapshot);
    }

    let reach = if snapshot.backend_reachable {
        "online".green()
    } else {
        "offline".red()
    };
    println!("[{}] {}", reach, snapshot.status.bold());
    print_selection(&snapshot.selection);
    Ok(())
}

fn print_selection(selection: &SelectionState) {
    let zone = selection.selected_zone.as_deref().unwrap_or("-");
    let wind = selection.selected_wind.as_deref().unwrap_or("-");
    match &selection.active_route {
        Some(route) => println!(
            "  zone {} wind {} route {}",
            zone.green(),
            wind.green(),
            route.route_id
        ),
        None => println!("  zone {} wind {} {}", zone, wind, "(no active route)".dimmed()),
    }
    if !selection.rendered_path.is_blank() {
        println!("  {}", selection.path_description());
    }
}
