//! Parley: multi-provider chat and RAG server.

use std::sync::Arc;

use parley_core::ParleyConfig;
use parley_server::{build_router, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_help() {
    println!("Parley: chat and retrieval-augmented generation over local or hosted models");
    println!();
    println!("Usage: parley [help]");
    println!();
    println!("Environment:");
    println!("  HOST, PORT                 Bind address (default 0.0.0.0:8000)");
    println!("  OLLAMA_HOST                Local runtime URL (default http://localhost:11434)");
    println!("  OLLAMA_DEFAULT_MODEL       Model used when a request names none (default llama3)");
    println!("  OPENAI_BASE_URL            OpenAI-compatible base URL");
    println!("  ANTHROPIC_BASE_URL         Anthropic-compatible base URL");
    println!("  FRONTEND_URL               Extra CORS origin (default http://localhost:3000)");
    println!("  REQUEST_TIMEOUT_SECS       Chat and embedding timeout (default 120)");
    println!("  PULL_TIMEOUT_SECS          Model pull timeout (default 600)");
    println!("  DEBUG                      Verbose logs and stream telemetry (default false)");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--help" | "-h" | "help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("Unknown command: {}. Use 'parley help' for usage.", arg);
                std::process::exit(1);
            }
        }
    }

    let config = ParleyConfig::from_env();

    let default_filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    info!(
        "Local runtime at {}, default model {}",
        config.providers.ollama_host, config.providers.default_model
    );

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config)?);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Parley server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
