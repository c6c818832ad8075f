use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    Method,
};
use clap::Parser;
use functron_cli::{FunctronCliResult, FunctronServerArgs};
use functron_core::{
    config::Configuration, management::ImageStore, runtime::DockerRuntime,
};
use functron_server::{route, state::AppState, Config};
use functron_utils::{CHECKMARK, DEFAULT_SERVER_PORT};
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Log filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "functron_server=info,functron_core=info";

//--------------------------------------------------------------------------------------------------
// Functions: Main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
pub async fn main() -> FunctronCliResult<()> {
    // Load .env before anything reads the environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    // Parse command line arguments
    let args = FunctronServerArgs::parse();

    // Read the configuration file, if any
    let configuration = match &args.config {
        Some(path) => Configuration::read(path)
            .await
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Configuration::default(),
    };

    // Flags win over the configuration file
    let port = args
        .port
        .or(*configuration.get_port())
        .unwrap_or(DEFAULT_SERVER_PORT);

    let config = Arc::new(
        Config::new(
            args.host,
            port,
            args.db_path,
            args.scratch_dir,
            Duration::from_secs(args.poll_interval_secs),
            args.seed,
        )?
        .with_configuration(&configuration),
    );

    // Open the image store
    let store = ImageStore::open(config.get_db_path()).await?;

    // Create the container runtime
    let runtime = match configuration.get_cmd_prefix() {
        Some(prefix) => {
            tracing::info!("prefixing runtime commands with `{}`", prefix);
            DockerRuntime::new().with_command_prefix(prefix)
        }
        None => DockerRuntime::new(),
    };

    // Create application state
    let state = AppState::new(config.clone(), store, Arc::new(runtime));

    // Start the build scheduler
    if args.no_scheduler {
        tracing::info!("build scheduler disabled");
    } else {
        let scheduler = state.build_scheduler();
        let wakeup = state.get_scheduler_wakeup().clone();
        tokio::spawn(async move { scheduler.run(wakeup).await });
        println!("{} Build scheduler running", &*CHECKMARK);
    }

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([ACCEPT, CONTENT_TYPE])
        .allow_origin(Any);

    // Build application
    let app = route::create_router(state).layer(cors);

    // Start server
    tracing::info!("starting server on {}", config.get_addr());
    println!(
        "{} Server listening on {}",
        &*CHECKMARK,
        console::style(config.get_addr()).yellow()
    );

    let listener = tokio::net::TcpListener::bind(config.get_addr()).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
