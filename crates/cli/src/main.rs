//! Command-line client for a Viewfinder server.

mod api_client;

use anyhow::Result;
use api_client::{ApiClient, CacheStatsResponse, ViewportQuery};
use clap::{Args, Parser, Subcommand};
use viewfinder_core::StreamEvent;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8080";

#[derive(Parser)]
#[command(name = "viewfinderctl")]
#[command(about = "Command-line client for Viewfinder")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server API URL
    #[arg(long, env = "VIEWFINDER_SERVER", default_value = DEFAULT_SERVER)]
    server: String,
}

#[derive(Args, Clone)]
struct ViewportArgs {
    /// Latitude of the top-left (north-west) corner
    #[arg(long, allow_hyphen_values = true)]
    top_left_lat: f64,
    /// Longitude of the top-left (north-west) corner
    #[arg(long, allow_hyphen_values = true)]
    top_left_lon: f64,
    /// Latitude of the bottom-right (south-east) corner
    #[arg(long, allow_hyphen_values = true)]
    bottom_right_lat: f64,
    /// Longitude of the bottom-right (south-east) corner
    #[arg(long, allow_hyphen_values = true)]
    bottom_right_lon: f64,
    /// Caller identity used for rate limiting and hidden content
    #[arg(long, env = "VIEWFINDER_CLIENT_ID", default_value = "viewfinderctl")]
    client_id: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health and version
    Health {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Cache statistics
    Stats {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Stream photos for a viewport and print each event
    Stream {
        #[command(flatten)]
        viewport: ViewportArgs,
        /// Print raw NDJSON lines instead of a summary
        #[arg(long, default_value_t = false)]
        json: bool,
        #[command(flatten)]
        api: ApiArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Health { api } => handle_health_command(&api).await,
        Commands::Stats { api } => handle_stats_command(&api).await,
        Commands::Stream {
            viewport,
            json,
            api,
        } => handle_stream_command(&api, &viewport, json).await,
    }
}

fn get_api_client(api: &ApiArgs) -> Result<ApiClient> {
    let base_url = normalize_base_url(&api.server)?;
    ApiClient::new(&base_url)
}

fn normalize_base_url(url: &str) -> Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("server URL must start with http:// or https://");
    }
    Ok(url.trim_end_matches('/').to_string())
}

async fn handle_health_command(api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api)?;
    let health = client.health().await?;

    println!("Status: {}", health.status);
    println!("Server version: {}", health.version);
    println!("Client version: {}", env!("CARGO_PKG_VERSION"));

    if health.version != env!("CARGO_PKG_VERSION") {
        eprintln!(
            "Warning: version mismatch (server: {}, client: {})",
            health.version,
            env!("CARGO_PKG_VERSION")
        );
    }
    Ok(())
}

async fn handle_stats_command(api: &ApiArgs) -> Result<()> {
    let client = get_api_client(api)?;
    let stats = client.stats().await?;
    print!("{}", render_stats(&stats));
    Ok(())
}

fn render_stats(stats: &CacheStatsResponse) -> String {
    format!(
        "Cache Statistics:\n  \
         Cached photos: {}\n  \
         Cached regions: {}\n  \
         Complete regions: {}\n  \
         Cache efficiency: {:.1}%\n",
        stats.total_cached_photos,
        stats.total_cached_regions,
        stats.complete_cached_regions,
        stats.cache_efficiency,
    )
}

async fn handle_stream_command(api: &ApiArgs, viewport: &ViewportArgs, json: bool) -> Result<()> {
    let client = get_api_client(api)?;
    let query = ViewportQuery {
        top_left_lat: viewport.top_left_lat,
        top_left_lon: viewport.top_left_lon,
        bottom_right_lat: viewport.bottom_right_lat,
        bottom_right_lon: viewport.bottom_right_lon,
        client_id: viewport.client_id.clone(),
    };

    let mut completed = false;
    client
        .stream_viewport(&query, |event| {
            completed |= event.is_terminal();
            if json {
                println!("{}", serde_json::to_string(&event)?);
            } else {
                println!("{}", describe_event(&event));
            }
            Ok(())
        })
        .await?;

    if !completed {
        anyhow::bail!("stream ended without stream_complete");
    }
    Ok(())
}

fn describe_event(event: &StreamEvent) -> String {
    match event {
        StreamEvent::Photos {
            photos,
            has_next,
            is_complete_coverage,
        } => {
            let source = match is_complete_coverage {
                Some(true) => "cached, complete coverage",
                Some(false) => "cached, partial coverage",
                None => "live",
            };
            format!(
                "photos: {} ({source}){}",
                photos.len(),
                if *has_next { ", more to come" } else { "" }
            )
        }
        StreamEvent::RegionComplete {
            region,
            photos_count,
        } => format!("region complete: {region} ({photos_count} photos)"),
        StreamEvent::Error { message } => format!("error: {message}"),
        StreamEvent::StreamComplete {
            total_live_photos,
            total_cached_photos,
            total_all_photos,
        } => format!(
            "done: {total_all_photos} photos ({total_cached_photos} cached, {total_live_photos} live)"
        ),
    }
}
