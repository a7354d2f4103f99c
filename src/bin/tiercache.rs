use axum::middleware;
use axum::Router;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tiercache::{response_cache, CacheConfig, CacheError};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "tiercache", about = "Tiered cache tool", version)]
struct Args {
  #[arg(short, long, env = "TIERCACHE_CONFIG")]
  config: Option<String>,
  #[arg(long)]
  log_level: Option<String>,
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Print the value stored under KEY as JSON
  Get { key: String },
  /// Store VALUE (JSON, or a plain string) under KEY in every tier
  Set { key: String, value: String },
  /// Remove KEY from every tier
  Del { key: String },
  /// Serve a directory through the response cache
  Serve {
    #[arg(short, long, default_value = ".")]
    dir: String,
    #[arg(short, long)]
    port: Option<u16>,
    #[arg(long)]
    host: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = Args::parse();

  // Load config: explicit path > auto-detect > defaults
  let mut config = if let Some(path) = &args.config {
    CacheConfig::from_file(path)?
  } else {
    CacheConfig::find_and_load()?.unwrap_or_default()
  };

  if let Some(level) = args.log_level {
    config.logging.level = level;
  }

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into()),
    )
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();

  let cache = config.build_cache().await?;

  match args.command {
    Command::Get { key } => match cache.get::<serde_json::Value>(&key).await {
      Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
      Err(e @ (CacheError::NotFound | CacheError::Expired)) => {
        eprintln!("{}: {}", key, e);
        std::process::exit(1);
      }
      Err(e) => return Err(e.into()),
    },
    Command::Set { key, value } => {
      let value = serde_json::from_str::<serde_json::Value>(&value)
        .unwrap_or(serde_json::Value::String(value));
      cache.set(&key, &value).await?;
      tracing::info!("Stored {}", key);
    }
    Command::Del { key } => {
      cache.del(&key).await?;
      tracing::info!("Deleted {}", key);
    }
    Command::Serve { dir, port, host } => {
      if let Some(port) = port {
        config.server.port = port;
      }
      if let Some(host) = host {
        config.server.host = host;
      }

      let app = Router::new()
        .fallback_service(ServeDir::new(&dir))
        .layer(middleware::from_fn_with_state(
          Arc::new(cache),
          response_cache,
        ))
        .layer(TraceLayer::new_for_http());

      let listener = tokio::net::TcpListener::bind(config.address()).await?;
      tracing::info!("Serving {} on http://{}", dir, config.address());
      axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    }
  }

  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!("Failed to install Ctrl+C handler: {}", e);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(e) => {
        tracing::error!("Failed to install SIGTERM handler: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => tracing::info!("Received SIGINT"),
    _ = terminate => tracing::info!("Received SIGTERM"),
  }
}
